//! Agent Loop
//!
//! Bounded conversation driver: ask the model, dispatch what it invokes, feed the
//! results back, stop when it answers without invoking anything.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::conversation::{Message, RunOutcome, Termination, TrajectoryStep};
use super::resolver::CapabilityResolver;
use crate::capability::CapabilityDescriptor;
use crate::inference::InferenceClient;

/// Default turn budget
pub const DEFAULT_MAX_TURNS: usize = 20;

/// Content returned when the turn budget runs out
pub const INCOMPLETE_SENTINEL: &str = "Reached maximum iterations without completing the task.";

/// Content returned when the model answers with nothing
pub const EMPTY_RESPONSE: &str = "(no response)";

const PREVIEW_CHARS: usize = 300;

/// Directive for runs with only the built-ins
pub const BASE_SYSTEM_PROMPT: &str = "\
You are a coding agent. You have tools to read files, write files, and run shell commands.

All files you create and shell commands you run operate inside the task workspace.
Use relative paths (e.g. \"solution.py\"); absolute paths and paths leaving the workspace are refused.

Work step by step. Use tools to explore and gather information before making changes.
When the task is complete, give a clear summary of what you did without calling any more tools.";

const AUGMENTED_SYSTEM_PROMPT: &str = "\
You are a coding agent. You have tools to read files, write files, and run shell commands.
You also have specialized code-generation tools. Check your full tool list: if a specialized \
tool matches the task, USE IT instead of writing code from scratch. The specialized tools \
generate correct, well-tested code.

All files you create and shell commands you run operate inside the task workspace.
Use relative paths (e.g. \"solution.py\"); absolute paths and paths leaving the workspace are refused.

Work step by step:
1. Read any existing files to understand the codebase
2. Check if any of your specialized tools can generate the code you need
3. If so, call the tool, then write the result to a file
4. If not, write the code yourself
When the task is complete, give a clear summary of what you did without calling any more tools.";

/// Directive for runs offered library capabilities, listing their usage examples
pub fn augmented_system_prompt(usage_examples: &[(&str, &str)]) -> String {
    let mut prompt = AUGMENTED_SYSTEM_PROMPT.to_string();
    if usage_examples.is_empty() {
        return prompt;
    }

    prompt.push_str("\n\n## Specialized Tool Usage Examples\n");
    for (name, example) in usage_examples {
        prompt.push_str(&format!("\n### {}\n{}\n", name, example.trim()));
    }
    prompt
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Tool-using agent bound to one inference client
pub struct Agent {
    client: Arc<dyn InferenceClient>,
    system_prompt: String,
    max_turns: usize,
}

impl Agent {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self {
            client,
            system_prompt: BASE_SYSTEM_PROMPT.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Drive one task to completion, exhaustion or abort
    pub async fn run(
        &self,
        task_prompt: &str,
        capabilities: &[CapabilityDescriptor],
        resolver: &dyn CapabilityResolver,
    ) -> RunOutcome {
        let mut messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(task_prompt),
        ];
        let mut trajectory = Vec::new();
        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;

        let finish = |content: String,
                      termination: Termination,
                      input_tokens: u64,
                      output_tokens: u64,
                      trajectory: Vec<TrajectoryStep>| {
            RunOutcome {
                content,
                termination,
                input_tokens,
                output_tokens,
                trajectory,
            }
        };

        for turn in 1..=self.max_turns {
            let response = match self.client.chat(&messages, capabilities).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Agent run aborted on turn {}: {}", turn, e);
                    return finish(
                        String::new(),
                        Termination::Aborted {
                            error: e.to_string(),
                        },
                        input_tokens,
                        output_tokens,
                        trajectory,
                    );
                }
            };

            input_tokens += response.usage.input_tokens;
            output_tokens += response.usage.output_tokens;

            if response.invocations.is_empty() {
                let content = response
                    .content
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| EMPTY_RESPONSE.to_string());
                info!(
                    "Agent finished after {} turns ({} tool calls)",
                    turn,
                    trajectory.len()
                );
                return finish(
                    content,
                    Termination::Completed,
                    input_tokens,
                    output_tokens,
                    trajectory,
                );
            }

            let invocations = response.invocations.clone();
            messages.push(Message::assistant(response.content, response.invocations));

            for invocation in invocations {
                debug!(
                    "[{}] {}({})",
                    turn,
                    invocation.name,
                    preview(&invocation.arguments.to_string())
                );

                let start = Instant::now();
                let result = resolver.dispatch(&invocation.name, &invocation.arguments).await;
                let duration_ms = start.elapsed().as_millis() as u64;

                debug!("    -> {}", preview(&result));

                messages.push(Message::tool(invocation.id, result.clone()));
                trajectory.push(TrajectoryStep {
                    name: invocation.name,
                    arguments: invocation.arguments,
                    result,
                    duration_ms,
                });
            }
        }

        warn!("Agent exhausted {} turns", self.max_turns);
        finish(
            INCOMPLETE_SENTINEL.to_string(),
            Termination::Incomplete,
            input_tokens,
            output_tokens,
            trajectory,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_augmented_prompt_lists_examples() {
        let prompt = augmented_system_prompt(&[("fib_source", "fib_source(#{ func_name: \"f\" })\n")]);
        assert!(prompt.contains("## Specialized Tool Usage Examples"));
        assert!(prompt.contains("### fib_source\nfib_source(#{ func_name: \"f\" })"));
    }

    #[test]
    fn test_augmented_prompt_without_examples() {
        let prompt = augmented_system_prompt(&[]);
        assert!(prompt.contains("specialized code-generation tools"));
        assert!(!prompt.contains("Usage Examples"));
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(400);
        assert_eq!(preview(&long).len(), PREVIEW_CHARS + 3);
    }
}
