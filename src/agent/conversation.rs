//! Conversation state for one agent run

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A capability invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Correlation id echoed back in the tool result
    pub id: String,
    pub name: String,
    /// Argument object. Malformed JSON from the model is kept as a string value.
    pub arguments: Value,
}

impl InvocationRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Role-tagged conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        invocations: Vec<InvocationRequest>,
    },
    Tool {
        invocation_id: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: Option<String>, invocations: Vec<InvocationRequest>) -> Self {
        Self::Assistant {
            content,
            invocations,
        }
    }

    pub fn tool(invocation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            invocation_id: invocation_id.into(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }
}

/// One dispatched invocation, as seen by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStep {
    pub name: String,
    pub arguments: Value,
    pub result: String,
    pub duration_ms: u64,
}

/// Why a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// The model answered without invoking anything
    Completed,
    /// The turn budget ran out
    Incomplete,
    /// The inference endpoint failed
    Aborted { error: String },
}

/// Result of one agent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub content: String,
    pub termination: Termination,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub trajectory: Vec<TrajectoryStep>,
}

impl RunOutcome {
    pub fn runtime_error(&self) -> Option<&str> {
        match &self.termination {
            Termination::Aborted { error } => Some(error),
            _ => None,
        }
    }

    /// Names of every invoked capability, in order of first use
    pub fn invoked_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for step in &self.trajectory {
            if !names.contains(&step.name.as_str()) {
                names.push(&step.name);
            }
        }
        names
    }
}
