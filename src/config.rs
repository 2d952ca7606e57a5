//! Configuration management

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the inference endpoint (optional - only the HTTP client needs it)
    pub api_key: Option<String>,

    /// OpenAI-compatible endpoint base URL
    pub base_url: String,

    /// Model the agent runs with
    pub cheap_model: String,

    /// Model that writes capabilities
    pub strong_model: String,

    /// Capability library root
    pub library_dir: PathBuf,

    /// Agent turn budget
    pub max_turns: usize,

    /// Generation attempts per failed task
    pub max_attempts: usize,

    /// Let the generator see raw verification messages
    pub allow_verifier_feedback: bool,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,

    /// `run_shell` timeout in seconds
    pub shell_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = get("OPENAI_API_KEY").filter(|k| !k.is_empty());

        let base_url = get("TOOLSMITH_BASE_URL")
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        let cheap_model = get("TOOLSMITH_CHEAP_MODEL")
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        let strong_model = get("TOOLSMITH_STRONG_MODEL")
            .unwrap_or_else(|| "gpt-4o".to_string());

        let library_dir = match get("TOOLSMITH_LIBRARY_DIR") {
            Some(dir) => PathBuf::from(
                shellexpand::full(&dir)
                    .with_context(|| format!("Invalid TOOLSMITH_LIBRARY_DIR: {}", dir))?
                    .into_owned(),
            ),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("toolsmith")
                .join("library"),
        };

        let max_turns = get("TOOLSMITH_MAX_TURNS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);

        let max_attempts = get("TOOLSMITH_MAX_ATTEMPTS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let allow_verifier_feedback = get("TOOLSMITH_ALLOW_VERIFIER_FEEDBACK")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let request_timeout_secs = get("TOOLSMITH_REQUEST_TIMEOUT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        let shell_timeout_secs = get("TOOLSMITH_SHELL_TIMEOUT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            api_key,
            base_url,
            cheap_model,
            strong_model,
            library_dir,
            max_turns,
            max_attempts,
            allow_verifier_feedback,
            request_timeout_secs,
            shell_timeout_secs,
        })
    }
}
