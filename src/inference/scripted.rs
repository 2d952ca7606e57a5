//! Scripted inference client
//!
//! Replays queued responses in order and records what each call was offered.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::{ChatResponse, InferenceClient, InferenceError};
use crate::agent::conversation::Message;
use crate::capability::CapabilityDescriptor;

/// What one call to a scripted client received
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub capability_names: Vec<String>,
}

/// Deterministic replay client
pub struct ScriptedClient {
    model: String,
    responses: Mutex<VecDeque<Result<ChatResponse, String>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedClient {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response
    pub fn push(&self, response: ChatResponse) -> &Self {
        self.responses.lock().push_back(Ok(response));
        self
    }

    /// Queue an inference failure
    pub fn push_error(&self, message: &str) -> &Self {
        self.responses.lock().push_back(Err(message.to_string()));
        self
    }

    pub fn with_responses(self, responses: impl IntoIterator<Item = ChatResponse>) -> Self {
        self.responses.lock().extend(responses.into_iter().map(Ok));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl InferenceClient for ScriptedClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[Message],
        capabilities: &[CapabilityDescriptor],
    ) -> Result<ChatResponse, InferenceError> {
        self.calls.lock().push(RecordedCall {
            messages: messages.to_vec(),
            capability_names: capabilities.iter().map(|c| c.name.clone()).collect(),
        });

        match self.responses.lock().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(InferenceError::InvalidResponse(message)),
            None => Err(InferenceError::Exhausted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order() {
        let client = ScriptedClient::new("scripted")
            .with_responses([ChatResponse::text("one"), ChatResponse::text("two")]);

        let first = client.chat(&[Message::user("a")], &[]).await.unwrap();
        let second = client.chat(&[Message::user("b")], &[]).await.unwrap();
        assert_eq!(first.content.as_deref(), Some("one"));
        assert_eq!(second.content.as_deref(), Some("two"));
        assert!(matches!(
            client.chat(&[], &[]).await,
            Err(InferenceError::Exhausted)
        ));
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_records_offered_capabilities() {
        let client = ScriptedClient::new("scripted");
        client.push(ChatResponse::text("ok"));

        let caps = [CapabilityDescriptor::new("fib_source", "Fibonacci")];
        client.chat(&[Message::user("a")], &caps).await.unwrap();
        assert_eq!(client.calls()[0].capability_names, vec!["fib_source"]);
    }
}
