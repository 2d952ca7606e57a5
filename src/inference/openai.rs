//! OpenAI-compatible chat-completions client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::{ChatResponse, InferenceClient, InferenceError, TokenUsage};
use crate::agent::conversation::{InvocationRequest, Message};
use crate::capability::CapabilityDescriptor;

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// OpenAI-compatible client (OpenAI, vLLM, Ollama, LiteLLM, ...)
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(|s| s.to_string()),
            model: model.to_string(),
        })
    }

    /// Create from config for the given model
    pub fn from_config(config: &crate::config::Config, model: &str) -> Result<Self, InferenceError> {
        Self::new(
            &config.base_url,
            config.api_key.as_deref(),
            model,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl InferenceClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[Message],
        capabilities: &[CapabilityDescriptor],
    ) -> Result<ChatResponse, InferenceError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| InferenceError::MissingApiKey(self.base_url.clone()))?;

        let tools: Vec<Value> = capabilities.iter().map(|c| c.to_function_format()).collect();
        let request = ChatRequest {
            model: &self.model,
            messages: messages.iter().map(to_wire).collect(),
            tool_choice: (!tools.is_empty()).then_some("auto"),
            tools,
        };

        debug!(
            model = self.model.as_str(),
            messages = messages.len(),
            tools = capabilities.len(),
            "Calling chat completions"
        );

        let response = self
            .client
            .post(format!("{}{}", self.base_url, CHAT_COMPLETIONS_PATH))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Api { status, body });
        }

        let result: ChatCompletion = response.json().await?;
        let message = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| InferenceError::InvalidResponse("no choices".to_string()))?;

        let invocations = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(from_wire_call)
            .collect();
        let usage = result.usage.unwrap_or_default();

        info!(
            model = self.model.as_str(),
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            "Chat completion"
        );

        Ok(ChatResponse {
            content: message.content,
            invocations,
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn from_wire_call(call: WireToolCall) -> InvocationRequest {
    let raw = call.function.arguments;
    let arguments = if raw.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(&raw).unwrap_or(Value::String(raw))
    };
    let id = call
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
    InvocationRequest::new(id, call.function.name, arguments)
}

fn arguments_to_wire(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

fn to_wire(message: &Message) -> Value {
    match message {
        Message::System { content } => serde_json::json!({"role": "system", "content": content}),
        Message::User { content } => serde_json::json!({"role": "user", "content": content}),
        Message::Assistant {
            content,
            invocations,
        } => {
            let mut wire = serde_json::json!({"role": "assistant", "content": content});
            if !invocations.is_empty() {
                wire["tool_calls"] = invocations
                    .iter()
                    .map(|inv| {
                        serde_json::json!({
                            "id": inv.id,
                            "type": "function",
                            "function": {
                                "name": inv.name,
                                "arguments": arguments_to_wire(&inv.arguments),
                            }
                        })
                    })
                    .collect();
            }
            wire
        }
        Message::Tool {
            invocation_id,
            content,
        } => serde_json::json!({
            "role": "tool",
            "tool_call_id": invocation_id,
            "content": content,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistant_tool_calls_to_wire() {
        let msg = Message::assistant(
            None,
            vec![InvocationRequest::new(
                "call_1",
                "read_file",
                serde_json::json!({"path": "a.py"}),
            )],
        );
        let wire = to_wire(&msg);
        assert_eq!(wire["role"], "assistant");
        assert!(wire["content"].is_null());
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "read_file");
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], r#"{"path":"a.py"}"#);
    }

    #[test]
    fn test_tool_message_to_wire() {
        let wire = to_wire(&Message::tool("call_1", "contents"));
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_1");
    }

    #[test]
    fn test_malformed_arguments_kept_as_string() {
        let call = WireToolCall {
            id: Some("c".to_string()),
            function: WireFunction {
                name: "write_file".to_string(),
                arguments: "{\"path\": ".to_string(),
            },
        };
        let inv = from_wire_call(call);
        assert_eq!(inv.arguments, Value::String("{\"path\": ".to_string()));
        assert_eq!(arguments_to_wire(&inv.arguments), "{\"path\": ");
    }

    #[test]
    fn test_empty_arguments_become_object() {
        let call = WireToolCall {
            id: Some("c".to_string()),
            function: WireFunction {
                name: "noop".to_string(),
                arguments: String::new(),
            },
        };
        assert!(from_wire_call(call).arguments.is_object());
    }

    #[test]
    fn test_missing_call_id_is_generated() {
        let call = WireToolCall {
            id: None,
            function: WireFunction {
                name: "noop".to_string(),
                arguments: "{}".to_string(),
            },
        };
        let inv = from_wire_call(call);
        assert!(inv.id.starts_with("call_"));
        assert_eq!(inv.id.len(), "call_".len() + 32);
    }

    #[test]
    fn test_parse_completion() {
        let body = r#"{
            "choices": [{"message": {"content": null, "tool_calls": [
                {"id": "call_9", "type": "function", "function": {"name": "run_shell", "arguments": "{\"command\":\"ls\"}"}}
            ]}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }"#;
        let parsed: ChatCompletion = serde_json::from_str(body).unwrap();
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        let calls = parsed.choices.into_iter().next().unwrap().message.tool_calls.unwrap();
        let inv = from_wire_call(calls.into_iter().next().unwrap());
        assert_eq!(inv.arguments["command"], "ls");
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client =
            OpenAiClient::new("http://localhost:1", None, "gpt-4o-mini", Duration::from_secs(1)).unwrap();
        assert!(!client.is_available());
        let err = client.chat(&[Message::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, InferenceError::MissingApiKey(_)));
    }
}
