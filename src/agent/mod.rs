//! Tool-Using Agent
//!
//! ```text
//! prompt → model ─┬─ content only ──────────────→ RunOutcome
//!                 └─ invocations → Toolbox → tool results → model ...
//! ```
//!
//! The loop is bounded by a turn budget; every dispatch is recorded in the
//! trajectory returned with the outcome.

pub mod builtin;
pub mod conversation;
pub mod resolver;
pub mod runner;

pub use builtin::{resolve_in_workspace, Builtin};
pub use conversation::{InvocationRequest, Message, RunOutcome, Termination, TrajectoryStep};
pub use resolver::{Capability, CapabilityResolver, Toolbox, DEFAULT_SHELL_TIMEOUT};
pub use runner::{
    augmented_system_prompt, Agent, BASE_SYSTEM_PROMPT, DEFAULT_MAX_TURNS, EMPTY_RESPONSE,
    INCOMPLETE_SENTINEL,
};
