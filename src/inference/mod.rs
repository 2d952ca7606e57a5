//! Inference Boundary
//!
//! The agent and the generator talk to language models through `InferenceClient`.
//! `OpenAiClient` speaks the OpenAI chat-completions wire format; `ScriptedClient`
//! replays canned responses for tests and dry runs.

pub mod openai;
pub mod scripted;

use async_trait::async_trait;

use crate::agent::conversation::{InvocationRequest, Message};
use crate::capability::CapabilityDescriptor;

pub use openai::OpenAiClient;
pub use scripted::ScriptedClient;

/// Token counts for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One model response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub invocations: Vec<InvocationRequest>,
    pub usage: TokenUsage,
}

impl ChatResponse {
    /// Plain text response
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Response that only requests invocations
    pub fn invoking(invocations: Vec<InvocationRequest>) -> Self {
        Self {
            invocations,
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = TokenUsage {
            input_tokens,
            output_tokens,
        };
        self
    }
}

/// Inference errors
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("API key not configured for {0}")]
    MissingApiKey(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Scripted responses exhausted")]
    Exhausted,
}

/// Language-model endpoint
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Model identifier sent with each request
    fn model(&self) -> &str;

    /// Send the conversation, offering `capabilities` when non-empty
    async fn chat(
        &self,
        messages: &[Message],
        capabilities: &[CapabilityDescriptor],
    ) -> Result<ChatResponse, InferenceError>;
}
