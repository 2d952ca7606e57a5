//! Command Sandbox
//!
//! Executes `run_shell` commands for the agent.
//!
//! # Security Model
//!
//! 1. **Blocklist**: privilege escalation and disk tools are refused
//! 2. **Patterns**: writes into `/etc` and raw devices are refused
//! 3. **Environment**: cleared, then an allowlist is copied from the host
//! 4. **Timeout**: the child is killed when the deadline passes
//! 5. **Output Limits**: captured streams are capped

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (None if killed or never started)
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Set when the command was refused or could not be spawned
    pub error: Option<String>,
}

impl CommandOutput {
    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none() && !self.timed_out && self.exit_code == Some(0)
    }
}

/// Backend that executes shell commands inside a task workspace
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` in `cwd`. Never fails; problems are reported in the output.
    async fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> CommandOutput;
}

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Maximum bytes captured per stream
    pub max_output_bytes: usize,
    /// Commands refused wherever they appear as a pipeline head
    pub blocked_commands: HashSet<String>,
    /// Substrings refused anywhere in the command
    pub blocked_patterns: Vec<String>,
    /// Host environment variables passed through
    pub allowed_env_vars: HashSet<String>,
    /// Additional environment variables to set
    pub extra_env: Vec<(String, String)>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: 256 * 1024, // 256 KB
            blocked_commands: default_blocked_commands(),
            blocked_patterns: default_blocked_patterns(),
            allowed_env_vars: default_allowed_env_vars(),
            extra_env: Vec::new(),
        }
    }
}

fn default_blocked_commands() -> HashSet<String> {
    [
        // Privilege escalation
        "sudo", "su", "doas", "pkexec",
        // Disk tools
        "dd", "mkfs", "fdisk", "parted", "mount", "umount",
        // Host control
        "shutdown", "reboot", "halt", "poweroff",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_blocked_patterns() -> Vec<String> {
    [
        ">/etc/", "> /etc/", ">>/etc/", ">> /etc/",
        ">/dev/sd", "> /dev/sd", ">/dev/nvme", "> /dev/nvme",
        "rm -rf /", "rm -fr /",
        ":(){",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_allowed_env_vars() -> HashSet<String> {
    ["PATH", "HOME", "USER", "LANG", "LC_ALL", "TERM", "TZ"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Runs commands with `sh -c` on the host
#[derive(Debug, Clone, Default)]
pub struct HostCommandRunner {
    config: SandboxConfig,
}

impl HostCommandRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Reason the command is refused, if any
    pub fn check(&self, command: &str) -> Option<String> {
        for segment in command.split(|c| c == ';' || c == '|' || c == '&' || c == '\n') {
            let head = segment
                .split_whitespace()
                .next()
                .unwrap_or("")
                .rsplit('/')
                .next()
                .unwrap_or("");
            if self.config.blocked_commands.contains(head) {
                return Some(format!("Command '{}' is blocked", head));
            }
        }

        self.config
            .blocked_patterns
            .iter()
            .find(|p| command.contains(p.as_str()))
            .map(|p| format!("Command contains blocked pattern: '{}'", p))
    }

    async fn execute(&self, command: &str, cwd: &Path, timeout: Duration) -> Result<CommandOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .kill_on_drop(true);

        for var in &self.config.allowed_env_vars {
            if let Ok(value) = std::env::var(var) {
                cmd.env(var, value);
            }
        }
        for (key, value) in &self.config.extra_env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().context("Failed to spawn shell")?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout not captured"))?;
        let stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr not captured"))?;
        let max = self.config.max_output_bytes;

        let result = tokio::time::timeout(timeout, async {
            let (out, err) = tokio::join!(read_capped(stdout, max), read_capped(stderr, max));
            let status = child.wait().await?;
            Ok::<_, anyhow::Error>((out, err, status))
        })
        .await;

        match result {
            Ok(Ok((out, err, status))) => Ok(CommandOutput {
                exit_code: status.code(),
                stdout: out,
                stderr: err,
                timed_out: false,
                error: None,
            }),
            Ok(Err(e)) => Ok(CommandOutput::refused(e.to_string())),
            Err(_) => {
                let _ = child.kill().await;
                warn!("Command timed out after {}s", timeout.as_secs());
                Ok(CommandOutput {
                    timed_out: true,
                    ..Default::default()
                })
            }
        }
    }
}

#[async_trait]
impl CommandRunner for HostCommandRunner {
    async fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> CommandOutput {
        if let Some(reason) = self.check(command) {
            warn!("Refused command: {}", reason);
            return CommandOutput::refused(reason);
        }

        let start = Instant::now();
        let output = match self.execute(command, cwd, timeout).await {
            Ok(output) => output,
            Err(e) => CommandOutput::refused(format!("{:#}", e)),
        };
        debug!(
            "Command finished in {}ms (exit {:?})",
            start.elapsed().as_millis(),
            output.exit_code
        );
        output
    }
}

/// Read a stream to the end, keeping at most `max` bytes
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, max: usize) -> String {
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    let mut truncated = false;

    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = max.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }

    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if truncated {
        text.push_str("\n[output truncated]");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_blocked_command() {
        let runner = HostCommandRunner::default();
        assert!(runner.check("sudo rm -rf /tmp/x").is_some());
        assert!(runner.check("echo hi && /usr/bin/sudo ls").is_some());
    }

    #[test]
    fn test_check_blocked_pattern() {
        let runner = HostCommandRunner::default();
        assert!(runner.check("echo pwned > /etc/hosts").is_some());
    }

    #[test]
    fn test_check_allows_ordinary_commands() {
        let runner = HostCommandRunner::default();
        assert!(runner.check("python3 -m pytest -q 2>/dev/null").is_none());
        assert!(runner.check("ls -la | grep py").is_none());
    }

    #[tokio::test]
    async fn test_run_captures_output() {
        let temp = TempDir::new().unwrap();
        let runner = HostCommandRunner::default();

        let out = runner
            .run("echo hello; echo oops >&2; exit 3", temp.path(), Duration::from_secs(5))
            .await;
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_run_uses_cwd() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "here").unwrap();

        let out = HostCommandRunner::default()
            .run("cat marker.txt", temp.path(), Duration::from_secs(5))
            .await;
        assert!(out.success());
        assert_eq!(out.stdout, "here");
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let temp = TempDir::new().unwrap();
        let out = HostCommandRunner::default()
            .run("sleep 10", temp.path(), Duration::from_millis(200))
            .await;
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let temp = TempDir::new().unwrap();
        let runner = HostCommandRunner::new(SandboxConfig {
            max_output_bytes: 16,
            ..Default::default()
        });
        let out = runner
            .run("printf 'aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa'", temp.path(), Duration::from_secs(5))
            .await;
        assert!(out.stdout.starts_with(&"a".repeat(16)));
        assert!(out.stdout.ends_with("[output truncated]"));
    }
}
