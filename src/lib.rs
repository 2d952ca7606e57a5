//! Toolsmith
//!
//! Failure-driven capability synthesis for tool-using LLM agents.
//!
//! # Features
//!
//! - **Agent Loop**: bounded tool-calling conversation over an OpenAI-compatible endpoint
//! - **Capability Library**: persistent registry of generated Rhai capabilities
//! - **Generator**: a strong model writes a capability after the cheap model fails
//! - **Validator**: structural checks in a sandboxed script engine
//! - **Pipeline**: generate, validate, register, retry, and keep what works
//! - **Event Log**: JSONL record of every run and generation attempt
//!
//! # Architecture
//!
//! ```text
//! Task ──► TaskHarness ──► Agent ──► InferenceClient (cheap)
//!   │                        │
//!   │                        └── Toolbox ── read_file / write_file / run_shell
//!   │                                   └── library capabilities (Rhai)
//!   │
//!   └── Pipeline ── FAIL ──► Generator (strong) ──► Validator ──► CapabilityLibrary
//!                                                                     │
//!                             retry with candidate ◄──────────────────┘
//! ```

pub mod agent;
pub mod capability;
pub mod config;
pub mod event_log;
pub mod generator;
pub mod inference;
pub mod pipeline;
pub mod sandbox;
pub mod task;

pub use agent::{Agent, CapabilityResolver, RunOutcome, Termination, Toolbox, TrajectoryStep};
pub use capability::{
    CapabilityDescriptor, CapabilityEntry, CapabilityLibrary, LibraryError, LoadedCapabilities,
    ScriptCapability, ValidationOutcome, Validator,
};
pub use config::Config;
pub use event_log::{EventLog, PipelineEvent};
pub use generator::{GenerationRequest, Generator, RetryContext};
pub use inference::{ChatResponse, InferenceClient, InferenceError, OpenAiClient, ScriptedClient};
pub use pipeline::{
    AttemptOutcome, BatchReport, Pipeline, PipelineConfig, PipelineReport, PipelineStatus,
    ReuseRecord,
};
pub use sandbox::{CommandOutput, CommandRunner, HostCommandRunner, SandboxConfig};
pub use task::{Task, TaskHarness, TaskManifest, TaskResult, VerifyResult};
