//! Tasks and the Evaluation Harness
//!
//! A task is a prompt plus a hidden check. The harness gives each agent attempt a
//! fresh `eval_<id>_*` workspace, runs the task's setup, drives the agent and records
//! the verification result. The workspace is removed when the attempt ends.

pub mod manifest;
pub mod verifier;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::agent::{
    augmented_system_prompt, Agent, Termination, Toolbox, TrajectoryStep, DEFAULT_MAX_TURNS,
    DEFAULT_SHELL_TIMEOUT,
};
use crate::capability::LoadedCapabilities;
use crate::inference::InferenceClient;
use crate::sandbox::CommandRunner;

pub use manifest::{ManifestTask, TaskManifest, TaskSpec};
pub use verifier::Verifier;

/// Outcome of a task's own check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub passed: bool,
    pub message: String,
}

impl VerifyResult {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }
}

/// A task the agent can attempt
#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> &str;

    fn prompt(&self) -> &str;

    fn tags(&self) -> &[String] {
        &[]
    }

    /// Prepare the workspace before the agent starts
    async fn setup(&self, workspace: &Path) -> anyhow::Result<()>;

    /// Hidden check run after the agent finishes
    async fn verify(&self, workspace: &Path) -> VerifyResult;
}

/// Result of one agent attempt at one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub passed: bool,
    pub verify_message: String,
    pub trajectory: Vec<TrajectoryStep>,
    pub final_response: String,
    pub termination: Termination,
    pub duration_ms: u64,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Agent runtime or setup error
    pub error: Option<String>,
}

impl TaskResult {
    pub fn num_tool_calls(&self) -> usize {
        self.trajectory.len()
    }

    fn setup_failed(task_id: &str, model: &str, error: String) -> Self {
        Self {
            task_id: task_id.to_string(),
            passed: false,
            verify_message: "Setup failed".to_string(),
            trajectory: Vec::new(),
            final_response: String::new(),
            termination: Termination::Aborted {
                error: error.clone(),
            },
            duration_ms: 0,
            model: model.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            error: Some(error),
        }
    }
}

/// Runs single agent attempts in disposable workspaces
pub struct TaskHarness {
    client: Arc<dyn InferenceClient>,
    runner: Arc<dyn CommandRunner>,
    max_turns: usize,
    shell_timeout: Duration,
}

impl TaskHarness {
    pub fn new(client: Arc<dyn InferenceClient>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            client,
            runner,
            max_turns: DEFAULT_MAX_TURNS,
            shell_timeout: DEFAULT_SHELL_TIMEOUT,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_shell_timeout(mut self, timeout: Duration) -> Self {
        self.shell_timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Run one attempt with the built-ins plus `capabilities`
    pub async fn run(&self, task: &dyn Task, capabilities: &LoadedCapabilities) -> TaskResult {
        let model = self.client.model().to_string();

        let workspace = match tempfile::Builder::new()
            .prefix(&format!("eval_{}_", task.id()))
            .tempdir()
        {
            Ok(dir) => dir,
            Err(e) => {
                return TaskResult::setup_failed(task.id(), &model, format!("workspace: {}", e))
            }
        };

        if let Err(e) = task.setup(workspace.path()).await {
            warn!("Setup failed for {}: {:#}", task.id(), e);
            return TaskResult::setup_failed(task.id(), &model, format!("{:#}", e));
        }

        let toolbox = Toolbox::new(workspace.path(), Arc::clone(&self.runner))
            .with_shell_timeout(self.shell_timeout)
            .with_scripts(capabilities.iter().cloned());

        let mut agent = Agent::new(Arc::clone(&self.client)).with_max_turns(self.max_turns);
        if !capabilities.is_empty() {
            agent = agent.with_system_prompt(augmented_system_prompt(&capabilities.usage_examples()));
        }

        info!(
            "Task {} with {} ({} library capabilities)",
            task.id(),
            model,
            capabilities.len()
        );

        let start = Instant::now();
        let outcome = agent
            .run(task.prompt(), &toolbox.descriptors(), &toolbox)
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let verify = task.verify(workspace.path()).await;

        info!(
            "{} {} -- {} tool calls, {:.1}s",
            if verify.passed { "PASS" } else { "FAIL" },
            task.id(),
            outcome.trajectory.len(),
            duration_ms as f64 / 1000.0
        );

        TaskResult {
            task_id: task.id().to_string(),
            passed: verify.passed,
            verify_message: verify.message,
            error: outcome.runtime_error().map(str::to_string),
            trajectory: outcome.trajectory,
            final_response: outcome.content,
            termination: outcome.termination,
            duration_ms,
            model,
            input_tokens: outcome.input_tokens,
            output_tokens: outcome.output_tokens,
        }
    }
}
