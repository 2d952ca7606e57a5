//! Generated Capabilities
//!
//! Capabilities the agent writes for itself when it fails a task.
//!
//! # Lifecycle
//!
//! ```text
//! Generator source → Validator → Library (unverified) → retry run
//!                        ↓                                  ↓
//!                   rejected, retry              pass: mark verified
//!                                                fail: evict
//! ```
//!
//! Verified entries are loaded into every later agent run.

pub mod library;
pub mod script;
pub mod types;
pub mod validator;

pub use library::{digest, CapabilityLibrary, LibraryError, LoadedCapabilities, SkippedEntry};
pub use script::{sandboxed_engine, ScriptCapability, ScriptError, ScriptLimits};
pub use types::{
    validate_name, ArgumentError, CapabilityDescriptor, CapabilityEntry, CapabilitySummary,
    NameError, NewCapability, ParameterType, BUILTIN_NAMES,
};
pub use validator::{ValidationOutcome, Validator};
