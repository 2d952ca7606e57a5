//! Capability Generator
//!
//! Asks the strong model for a new capability after the cheap model failed a task.
//! The response is expected to be Rhai source; Markdown fences are stripped but the
//! source is not validated here.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::agent::conversation::{Message, TrajectoryStep};
use crate::capability::CapabilitySummary;
use crate::inference::{InferenceClient, InferenceError};

const RESULT_PREVIEW_CHARS: usize = 500;
const RETRY_MESSAGE_CHARS: usize = 500;

static RE_FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)\r?\n?```").unwrap()
});

static RE_LEADING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_+-]*[ \t]*\r?\n").unwrap());

static RE_TRAILING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n```\s*$").unwrap());

/// Why the previous attempt did not produce a working capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryContext {
    /// The capability was registered and offered, but the retry still failed
    PreviousFailed {
        tool_name: String,
        verify_message: String,
    },
    /// The source was rejected before registration
    Invalid { reason: String },
}

/// Everything the generator needs for one attempt
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub task_prompt: &'a str,
    pub trajectory: &'a [TrajectoryStep],
    /// Failure summary (redacted unless verifier feedback is allowed)
    pub feedback: &'a str,
    pub retry: Option<&'a RetryContext>,
    /// Capabilities already in the library
    pub existing: &'a [CapabilitySummary],
}

/// Extracted source plus the tokens spent producing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSource {
    pub source: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Capability generator bound to the strong model
pub struct Generator {
    client: Arc<dyn InferenceClient>,
}

impl Generator {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Produce candidate source for the failed task
    pub async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<GeneratedSource, InferenceError> {
        let prompt = build_prompt(request);
        debug!("Generation prompt: {} chars", prompt.len());

        let response = self.client.chat(&[Message::user(prompt)], &[]).await?;
        let raw = response.content.unwrap_or_default();
        let source = strip_fences(&raw);

        info!(
            model = self.client.model(),
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Generated capability source ({} chars)",
            source.len()
        );

        Ok(GeneratedSource {
            source,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        })
    }
}

/// First `max_chars` characters of `text`
pub fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Render a trajectory as numbered steps with truncated results
pub fn format_trajectory(trajectory: &[TrajectoryStep]) -> String {
    if trajectory.is_empty() {
        return "(no tool calls recorded)".to_string();
    }

    trajectory
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let args = match &step.arguments {
                Value::String(raw) => raw.clone(),
                other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
            };
            let head = truncate(&step.result, RESULT_PREVIEW_CHARS);
            let result = if head.len() < step.result.len() {
                format!("{}...", head)
            } else {
                step.result.clone()
            };
            format!("Step {}: {}({})\n  -> {}", i + 1, step.name, args, result)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Remove surrounding Markdown fences, or pull the first fenced block out of prose
pub fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();

    if let Some(body) = RE_FENCED_BLOCK
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
    {
        return body.as_str().trim().to_string();
    }

    // Opening fence with no closing one, e.g. a truncated reply
    if trimmed.starts_with("```") {
        let without_head = RE_LEADING_FENCE.replace(trimmed, "");
        let without_tail = RE_TRAILING_FENCE.replace(&without_head, "");
        return without_tail.trim().to_string();
    }

    trimmed.to_string()
}

fn build_prompt(request: &GenerationRequest<'_>) -> String {
    let mut prompt = String::from(PROMPT_INTRO);

    prompt.push_str("\n\n## Failed Task\n");
    prompt.push_str(request.task_prompt);

    prompt.push_str("\n\n## Agent's Tool Call Trajectory\n");
    prompt.push_str(&format_trajectory(request.trajectory));

    prompt.push_str("\n\n## Verification Result (why it failed)\n");
    prompt.push_str(request.feedback);
    prompt.push('\n');

    match request.retry {
        Some(RetryContext::PreviousFailed {
            tool_name,
            verify_message,
        }) => {
            prompt.push_str("\n## Previous Attempt Failed\n");
            prompt.push_str(
                "The previously generated capability was offered to the agent but the task STILL failed.\n",
            );
            prompt.push_str(&format!("Capability name: {}\n", tool_name));
            prompt.push_str(&format!(
                "Result of the run with the capability: {}\n",
                truncate(verify_message, RETRY_MESSAGE_CHARS)
            ));
            prompt.push_str(
                "Fix the capability so the task passes. Think carefully about which edge case is still broken.\n",
            );
        }
        Some(RetryContext::Invalid { reason }) => {
            prompt.push_str("\n## Previous Attempt Rejected\n");
            prompt.push_str(&format!(
                "The previous source was rejected by validation: {}\n",
                reason
            ));
            prompt.push_str("Return source that satisfies the output format below.\n");
        }
        None => {}
    }

    if !request.existing.is_empty() {
        prompt.push_str("\n## Existing Capabilities\n");
        prompt.push_str(
            "These are already in the library. Compose with them rather than duplicating them, \
             and do not reuse their names unless you intend to replace one.\n",
        );
        for summary in request.existing {
            prompt.push_str(&format!("- {}: {}\n", summary.name, summary.description));
        }
    }

    prompt.push('\n');
    prompt.push_str(PROMPT_CONTRACT);
    prompt.push_str("\n\n");
    prompt.push_str(PROMPT_EXAMPLE);
    prompt.push_str("\n\nNow generate the capability for the failed task above. Return ONLY Rhai source.");
    prompt
}

const PROMPT_INTRO: &str = "\
You are a tool engineering expert. An AI coding agent (using a cheap, weak model) attempted a coding task and FAILED.

Your job: analyze the failure and write a reusable capability that the cheap model can call to solve this \
type of task correctly. The capability should encapsulate the reasoning and edge-case handling that the \
cheap model failed to do on its own.";

const PROMPT_CONTRACT: &str = "\
## What Makes a Good Capability

The capability should:
1. Encapsulate the complex reasoning/edge-case handling the cheap model missed
2. Be a pure function: takes structured input, returns a string (usually generated source code)
3. Be general enough to help with similar tasks (don't hardcode task-specific values)
4. Have a clear, descriptive name and description so the agent knows when to use it
5. Return COMPLETE, CORRECT output that handles ALL edge cases

The capability should NOT:
- Access the filesystem (the agent has read_file/write_file for that)
- Be trivially simple (it should encode real logic the cheap model can't do alone)

CRITICAL IMPLEMENTATION RULES:
- If the capability generates a class whose transitions share a method name, merge them into ONE method. \
Never generate duplicate method definitions.
- Test your logic mentally: would the generated output pass ALL the edge cases the agent originally failed on?

## Output Format

Return ONLY a Rhai script. No markdown fences. No explanation. Just code.

The script must define:
1. `const SCHEMA = #{ \"type\": \"function\", \"function\": #{ \"name\": ..., \"description\": ..., \"parameters\": #{...} } };`
2. A function `fn <name>(args)` whose name matches SCHEMA.function.name, taking ONE argument: the map of parameters
3. The function must return a string
4. Optionally `const USAGE_EXAMPLE = \"...\";` showing a typical call

Names must match [A-Za-z_][A-Za-z0-9_]* and must not be read_file, write_file or run_shell.
The script cannot import modules or call eval.";

const PROMPT_EXAMPLE: &str = r#"Example: a capability that generates a Python state machine class (transitions with the same method are MERGED):

const SCHEMA = #{
    "type": "function",
    "function": #{
        "name": "build_fsm",
        "description": "Generates a Python finite state machine class with states, transitions, validation and history tracking. Handles multiple from-states per method correctly.",
        "parameters": #{
            "type": "object",
            "properties": #{
                "class_name": #{ "type": "string", "description": "Name of the generated class" },
                "initial_state": #{ "type": "string", "description": "Starting state" },
                "transitions": #{
                    "type": "array",
                    "items": #{
                        "type": "object",
                        "properties": #{
                            "method": #{ "type": "string" },
                            "from_states": #{ "type": "array", "items": #{ "type": "string" } },
                            "to_state": #{ "type": "string" }
                        }
                    },
                    "description": "Transitions. Entries with the same method name are merged into one method."
                },
                "exception_name": #{ "type": "string", "description": "Custom exception class name" }
            },
            "required": ["class_name", "initial_state", "transitions", "exception_name"]
        }
    }
};

const USAGE_EXAMPLE = `build_fsm(#{ class_name: "Order", initial_state: "new", exception_name: "InvalidTransition", transitions: [#{ method: "pay", from_states: ["new"], to_state: "paid" }] })`;

fn build_fsm(args) {
    let methods = #{};
    let order = [];
    for t in args.transitions {
        if !(t.method in methods) {
            methods[t.method] = [];
            order.push(t.method);
        }
        methods[t.method].push(t);
    }

    let out = "";
    out += `class ${args.exception_name}(Exception):` + "\n    pass\n\n\n";
    out += `class ${args.class_name}:` + "\n";
    out += "    def __init__(self):\n";
    out += `        self._state = '${args.initial_state}'` + "\n";
    out += `        self._history = ['${args.initial_state}']` + "\n\n";

    for name in order {
        out += `    def ${name}(self):` + "\n";
        let kw = "if";
        for t in methods[name] {
            out += `        ${kw} self._state in ${t.from_states}:` + "\n";
            out += `            self._state = '${t.to_state}'` + "\n";
            kw = "elif";
        }
        out += "        else:\n";
        out += `            raise ${args.exception_name}(f'Cannot ${name} from {self._state}')` + "\n";
        out += "        self._history.append(self._state)\n\n";
    }
    out
}"#;
