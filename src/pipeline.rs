//! Self-Improving Pipeline
//!
//! ```text
//! RUN_INITIAL ─ PASS ─────────────────────────────────→ AlreadyPassing
//!      │
//!     FAIL
//!      ↓
//! GENERATE → VALIDATE ─ INVALID ─→ GENERATE (next attempt)
//!                │
//!              VALID → REGISTER (unverified) → RETRY ─ PASS → mark verified → ToolGenerated
//!                                                 │
//!                                               FAIL → EVICT → GENERATE (next attempt)
//! ```
//!
//! Attempts are bounded by `max_attempts`; running out yields `GenerationFailed`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::TrajectoryStep;
use crate::capability::{
    CapabilityLibrary, LoadedCapabilities, NewCapability, ValidationOutcome, Validator,
};
use crate::event_log::{EventLog, PipelineEvent};
use crate::generator::{truncate, GenerationRequest, Generator, RetryContext};
use crate::task::{Task, TaskHarness, TaskResult};

const SIGNAL_MARKERS: [&str; 5] = ["Traceback", "AssertionError", "FAILED", "Error:", "Exit code:"];
const MAX_SIGNALS: usize = 4;
const SIGNAL_CHARS: usize = 800;
const FEEDBACK_CHARS: usize = 3000;
const NO_SIGNALS: &str = "No explicit self-test failure logs were observed in run_shell outputs.";

/// Pipeline settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub max_attempts: usize,
    /// Pass the raw verification message to the generator
    pub allow_verifier_feedback: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            allow_verifier_feedback: false,
        }
    }
}

/// Final status of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    AlreadyPassing,
    ToolGenerated,
    GenerationFailed,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyPassing => "already_passing",
            Self::ToolGenerated => "tool_generated",
            Self::GenerationFailed => "generation_failed",
        }
    }
}

/// How one generation attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The strong model could not be reached
    GenerationError { error: String },
    /// The source failed structural validation
    Invalid { reason: String },
    /// Registered and offered, but the retry still failed; the entry was evicted
    RetryFailed { tool_name: String, verify_message: String },
    /// The retry passed; the entry is verified
    Passed { tool_name: String },
}

/// One trip through GENERATE → VALIDATE → (REGISTER → RETRY)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationAttempt {
    pub attempt: usize,
    pub feedback: String,
    pub source: Option<String>,
    pub outcome: AttemptOutcome,
}

/// A library capability used by a task other than the one that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReuseRecord {
    pub tool: String,
    pub source_task: String,
    pub task: String,
    pub passed: bool,
}

/// Everything that happened for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub task_id: String,
    pub status: PipelineStatus,
    pub initial_result: TaskResult,
    pub retry_result: Option<TaskResult>,
    pub tool_name: Option<String>,
    pub tool_source: Option<String>,
    pub attempts: Vec<GenerationAttempt>,
    pub generation_input_tokens: u64,
    pub generation_output_tokens: u64,
    pub reuse: Vec<ReuseRecord>,
}

impl PipelineReport {
    pub fn tool_generated(&self) -> bool {
        self.status == PipelineStatus::ToolGenerated
    }

    /// The result that decides the task: the retry when a tool was generated
    pub fn final_result(&self) -> &TaskResult {
        self.retry_result.as_ref().unwrap_or(&self.initial_result)
    }

    pub fn summary_line(&self) -> String {
        let result = self.final_result();
        let mut line = format!(
            "{:<18} {:<25} {} tool calls, {} in / {} out",
            self.status.as_str(),
            self.task_id,
            result.num_tool_calls(),
            result.input_tokens,
            result.output_tokens
        );
        if let Some(ref name) = self.tool_name {
            line.push_str(&format!(", tool {}", name));
        }
        if !self.attempts.is_empty() {
            line.push_str(&format!(
                ", {} attempts ({} gen tokens)",
                self.attempts.len(),
                self.generation_input_tokens + self.generation_output_tokens
            ));
        }
        line
    }
}

/// Reports for a sequential batch plus the reuse observed during it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub reports: Vec<PipelineReport>,
    pub reuse: Vec<ReuseRecord>,
}

impl BatchReport {
    pub fn count(&self, status: PipelineStatus) -> usize {
        self.reports.iter().filter(|r| r.status == status).count()
    }
}

/// Failure summary for the generator.
///
/// Unless verifier feedback is allowed, only what the agent itself could observe is
/// included: its runtime error and its own failing `run_shell` outputs.
pub fn generation_feedback(result: &TaskResult, allow_verifier_feedback: bool) -> String {
    if allow_verifier_feedback {
        return result.verify_message.clone();
    }

    let runtime_error = result
        .error
        .as_ref()
        .map(|e| format!("\nAgent runtime error: {}", e))
        .unwrap_or_default();

    format!(
        "Hidden verifier result: FAIL.\n\
         Do not assume access to hidden tests. Infer likely failure modes from the agent's own actions.\n\
         {}\n\nAgent-observable signals:\n{}",
        runtime_error,
        observable_signals(&result.trajectory)
    )
}

/// Failing `run_shell` outputs from the agent's own trajectory
pub fn observable_signals(trajectory: &[TrajectoryStep]) -> String {
    let signals: Vec<String> = trajectory
        .iter()
        .filter(|step| step.name == "run_shell")
        .filter(|step| SIGNAL_MARKERS.iter().any(|m| step.result.contains(m)))
        .map(|step| {
            let command = step
                .arguments
                .get("command")
                .and_then(|c| c.as_str())
                .unwrap_or("");
            format!("$ {}\n{}", command, truncate(&step.result, SIGNAL_CHARS))
        })
        .collect();

    if signals.is_empty() {
        return NO_SIGNALS.to_string();
    }

    let recent = &signals[signals.len().saturating_sub(MAX_SIGNALS)..];
    truncate(&recent.join("\n\n"), FEEDBACK_CHARS).to_string()
}

/// Library capabilities invoked during a run, in call order
fn library_invocations<'a>(result: &'a TaskResult, offered: &LoadedCapabilities) -> Vec<&'a str> {
    result
        .trajectory
        .iter()
        .map(|step| step.name.as_str())
        .filter(|name| offered.get(name).is_some())
        .collect()
}

/// Failure-driven capability synthesis over a persistent library
pub struct Pipeline {
    library: CapabilityLibrary,
    harness: TaskHarness,
    generator: Generator,
    validator: Validator,
    config: PipelineConfig,
    reuse_log: Vec<ReuseRecord>,
    event_log: Option<EventLog>,
}

impl Pipeline {
    pub fn new(
        library: CapabilityLibrary,
        harness: TaskHarness,
        generator: Generator,
        config: PipelineConfig,
    ) -> Self {
        Self {
            library,
            harness,
            generator,
            validator: Validator::default(),
            config,
            reuse_log: Vec::new(),
            event_log: None,
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Record every run and generation attempt to a JSONL file
    pub fn with_event_log(mut self, event_log: EventLog) -> Self {
        self.event_log = Some(event_log);
        self
    }

    fn emit(&self, event: PipelineEvent<'_>) {
        if let Some(log) = &self.event_log {
            if let Err(e) = log.append(&event) {
                warn!("Failed to append to {}: {}", log.path().display(), e);
            }
        }
    }

    pub fn library(&self) -> &CapabilityLibrary {
        &self.library
    }

    /// Every reuse record observed by this pipeline
    pub fn reuse_log(&self) -> &[ReuseRecord] {
        &self.reuse_log
    }

    /// Run one task through the full state machine.
    ///
    /// Only library I/O failures are returned as errors.
    pub async fn run_task(&mut self, task: &dyn Task) -> Result<PipelineReport> {
        info!(
            "Pipeline: {} (cheap: {}, strong: {})",
            task.id(),
            self.harness.model(),
            self.generator.model()
        );

        let loaded = self.library.load();
        let initial = self.harness.run(task, &loaded).await;
        let reuse = self.record_reuse(task.id(), &initial, &loaded)?;

        let feedback = generation_feedback(&initial, self.config.allow_verifier_feedback);
        self.emit(PipelineEvent::TaskInitialResult {
            task_id: task.id(),
            model: self.harness.model(),
            passed: initial.passed,
            verify_message: &initial.verify_message,
            feedback_sent_to_generator: (!initial.passed).then_some(feedback.as_str()),
            trajectory: &initial.trajectory,
            tools_available: loaded.names(),
            tools_used: library_invocations(&initial, &loaded),
            input_tokens: initial.input_tokens,
            output_tokens: initial.output_tokens,
        });

        let mut report = PipelineReport {
            task_id: task.id().to_string(),
            status: PipelineStatus::AlreadyPassing,
            initial_result: initial,
            retry_result: None,
            tool_name: None,
            tool_source: None,
            attempts: Vec::new(),
            generation_input_tokens: 0,
            generation_output_tokens: 0,
            reuse,
        };

        if report.initial_result.passed {
            info!("{} already passes with {}", task.id(), self.harness.model());
            return Ok(report);
        }

        info!("{} failed with {}, generating capability", task.id(), self.harness.model());

        let mut retry: Option<RetryContext> = None;

        for attempt in 1..=self.config.max_attempts {
            info!("Generation attempt {}/{}", attempt, self.config.max_attempts);

            let existing = self.library.summaries();
            let request = GenerationRequest {
                task_prompt: task.prompt(),
                trajectory: &report.initial_result.trajectory,
                feedback: &feedback,
                retry: retry.as_ref(),
                existing: &existing,
            };

            let generated = match self.generator.generate(&request).await {
                Ok(generated) => generated,
                Err(e) => {
                    warn!("Generation failed: {}", e);
                    let error = e.to_string();
                    self.emit(PipelineEvent::GenerationError {
                        task_id: task.id(),
                        attempt,
                        error: &error,
                    });
                    report.attempts.push(GenerationAttempt {
                        attempt,
                        feedback: feedback.clone(),
                        source: None,
                        outcome: AttemptOutcome::GenerationError { error },
                    });
                    continue;
                }
            };
            report.generation_input_tokens += generated.input_tokens;
            report.generation_output_tokens += generated.output_tokens;

            let validation = self.validator.validate(&generated.source);
            self.emit(PipelineEvent::GenerationAttempt {
                task_id: task.id(),
                attempt,
                model: self.generator.model(),
                tokens_in: generated.input_tokens,
                tokens_out: generated.output_tokens,
                feedback_sent_to_generator: &feedback,
                tool_code: &generated.source,
                validation_passed: validation.is_valid(),
                validation_result: validation.name_or_reason(),
            });

            let name = match validation {
                ValidationOutcome::Valid { name, .. } => name,
                ValidationOutcome::Invalid { reason } => {
                    warn!("Invalid capability: {}", reason);
                    retry = Some(RetryContext::Invalid {
                        reason: reason.clone(),
                    });
                    report.attempts.push(GenerationAttempt {
                        attempt,
                        feedback: feedback.clone(),
                        source: Some(generated.source),
                        outcome: AttemptOutcome::Invalid { reason },
                    });
                    continue;
                }
            };
            info!("Valid capability: {}", name);

            self.library
                .register(NewCapability {
                    name: name.clone(),
                    source: generated.source.clone(),
                    task_id: task.id().to_string(),
                    generator_model: self.generator.model().to_string(),
                })
                .with_context(|| format!("Failed to register capability '{}'", name))?;

            let candidate = match self.library.load_entry(&name) {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!("Registered capability '{}' failed to load: {}", name, e);
                    self.library.remove(&name)?;
                    let reason = e.to_string();
                    retry = Some(RetryContext::Invalid {
                        reason: reason.clone(),
                    });
                    report.attempts.push(GenerationAttempt {
                        attempt,
                        feedback: feedback.clone(),
                        source: Some(generated.source),
                        outcome: AttemptOutcome::Invalid { reason },
                    });
                    continue;
                }
            };

            let mut offered = self.library.load();
            offered.insert(Arc::clone(&candidate));

            info!("Re-running {} with {} + {}", task.id(), self.harness.model(), name);
            let retry_result = self.harness.run(task, &offered).await;
            let next_feedback =
                generation_feedback(&retry_result, self.config.allow_verifier_feedback);
            self.emit(PipelineEvent::GenerationRetryResult {
                task_id: task.id(),
                attempt,
                tool_name: &name,
                passed: retry_result.passed,
                verify_message: &retry_result.verify_message,
                feedback_sent_to_generator_next_attempt: &next_feedback,
                trajectory: &retry_result.trajectory,
                tools_used: library_invocations(&retry_result, &offered),
            });

            if retry_result.passed {
                self.library
                    .mark_verified(&name, self.harness.model())
                    .with_context(|| format!("Failed to mark '{}' verified", name))?;
                info!("SUCCESS: {} passed with {} + {}", task.id(), self.harness.model(), name);

                report.attempts.push(GenerationAttempt {
                    attempt,
                    feedback: feedback.clone(),
                    source: Some(generated.source.clone()),
                    outcome: AttemptOutcome::Passed {
                        tool_name: name.clone(),
                    },
                });
                report.status = PipelineStatus::ToolGenerated;
                report.tool_name = Some(name);
                report.tool_source = Some(generated.source);
                report.retry_result = Some(retry_result);
                return Ok(report);
            }

            warn!("Still failed with '{}', evicting", name);
            self.library.remove(&name)?;

            let verify_message = next_feedback;
            retry = Some(RetryContext::PreviousFailed {
                tool_name: name.clone(),
                verify_message: verify_message.clone(),
            });
            report.attempts.push(GenerationAttempt {
                attempt,
                feedback: feedback.clone(),
                source: Some(generated.source),
                outcome: AttemptOutcome::RetryFailed {
                    tool_name: name,
                    verify_message,
                },
            });
        }

        warn!(
            "Could not generate a working capability for {} after {} attempts",
            task.id(),
            self.config.max_attempts
        );
        report.status = PipelineStatus::GenerationFailed;
        Ok(report)
    }

    /// Run tasks strictly one after another
    pub async fn run_batch(&mut self, tasks: &[Arc<dyn Task>]) -> Result<BatchReport> {
        let mut batch = BatchReport::default();
        for (i, task) in tasks.iter().enumerate() {
            info!("[{}/{}] {}", i + 1, tasks.len(), task.id());
            let report = self.run_task(task.as_ref()).await?;
            batch.reuse.extend(report.reuse.iter().cloned());
            batch.reports.push(report);
        }
        Ok(batch)
    }

    fn record_reuse(
        &mut self,
        task_id: &str,
        result: &TaskResult,
        loaded: &LoadedCapabilities,
    ) -> Result<Vec<ReuseRecord>> {
        let mut records = Vec::new();
        let mut seen: Vec<&str> = Vec::new();

        for step in &result.trajectory {
            let name = step.name.as_str();
            if seen.contains(&name) || loaded.get(name).is_none() {
                continue;
            }
            seen.push(name);

            let Some(entry) = self.library.get(name)? else { continue };
            if entry.generated_from_task != task_id {
                info!("Reuse: {} (from {}) used by {}", name, entry.generated_from_task, task_id);
                records.push(ReuseRecord {
                    tool: name.to_string(),
                    source_task: entry.generated_from_task,
                    task: task_id.to_string(),
                    passed: result.passed,
                });
            }
        }

        self.reuse_log.extend(records.iter().cloned());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Termination;

    fn shell(command: &str, result: &str) -> TrajectoryStep {
        TrajectoryStep {
            name: "run_shell".to_string(),
            arguments: serde_json::json!({"command": command}),
            result: result.to_string(),
            duration_ms: 1,
        }
    }

    fn failed(trajectory: Vec<TrajectoryStep>, error: Option<&str>) -> TaskResult {
        TaskResult {
            task_id: "t".to_string(),
            passed: false,
            verify_message: "SECRET hidden test test_larger failed".to_string(),
            trajectory,
            final_response: String::new(),
            termination: Termination::Completed,
            duration_ms: 0,
            model: "cheap".to_string(),
            input_tokens: 0,
            output_tokens: 0,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_redacted_feedback_hides_verifier() {
        let result = failed(vec![shell("pytest", "FAILED test_a\nExit code: 1")], None);
        let feedback = generation_feedback(&result, false);
        assert!(!feedback.contains("SECRET"));
        assert!(feedback.starts_with("Hidden verifier result: FAIL.\n"));
        assert!(feedback.contains("Agent-observable signals:\n$ pytest\nFAILED test_a"));
    }

    #[test]
    fn test_verifier_feedback_when_allowed() {
        let result = failed(vec![], None);
        assert_eq!(generation_feedback(&result, true), result.verify_message);
    }

    #[test]
    fn test_runtime_error_included() {
        let result = failed(vec![], Some("HTTP error: timeout"));
        let feedback = generation_feedback(&result, false);
        assert!(feedback.contains("\nAgent runtime error: HTTP error: timeout\n"));
        assert!(feedback.ends_with(NO_SIGNALS));
    }

    #[test]
    fn test_signals_keep_last_four_failing_shell_outputs() {
        let mut trajectory: Vec<TrajectoryStep> = (0..6)
            .map(|i| shell(&format!("cmd{}", i), "Traceback (most recent call last)"))
            .collect();
        trajectory.push(shell("ls", "fib.py"));
        trajectory.push(TrajectoryStep {
            name: "read_file".to_string(),
            arguments: serde_json::json!({"path": "x"}),
            result: "Error: not found".to_string(),
            duration_ms: 0,
        });

        let signals = observable_signals(&trajectory);
        assert!(!signals.contains("$ cmd1\n"));
        assert!(signals.starts_with("$ cmd2\n"));
        assert!(signals.contains("$ cmd5\n"));
        assert!(!signals.contains("$ ls"));
    }

    #[test]
    fn test_signals_truncated() {
        let long = format!("Error: {}", "x".repeat(2000));
        let trajectory: Vec<TrajectoryStep> = (0..4).map(|_| shell("make", &long)).collect();
        let signals = observable_signals(&trajectory);
        assert_eq!(signals.chars().count(), FEEDBACK_CHARS);
        assert!(!signals.contains(&"x".repeat(SIGNAL_CHARS)));
    }

    #[test]
    fn test_no_signals() {
        assert_eq!(observable_signals(&[shell("ls", "fib.py")]), NO_SIGNALS);
    }
}
