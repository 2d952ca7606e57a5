//! Built-in capabilities: `read_file`, `write_file`, `run_shell`
//!
//! All paths are relative to the task workspace.

use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::capability::CapabilityDescriptor;
use crate::sandbox::CommandRunner;

/// The fixed built-in capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    ReadFile,
    WriteFile,
    RunShell,
}

impl Builtin {
    pub const ALL: [Builtin; 3] = [Builtin::ReadFile, Builtin::WriteFile, Builtin::RunShell];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::RunShell => "run_shell",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn descriptor(&self) -> CapabilityDescriptor {
        match self {
            Self::ReadFile => CapabilityDescriptor::new(
                "read_file",
                "Read the contents of a file at the given path.",
            )
            .with_string_param("path", "Path to the file, relative to the workspace.", true),

            Self::WriteFile => CapabilityDescriptor::new(
                "write_file",
                "Write content to a file, creating it and any missing parent directories if needed.",
            )
            .with_string_param("path", "Path to the file, relative to the workspace.", true)
            .with_string_param("content", "Content to write to the file.", true),

            Self::RunShell => CapabilityDescriptor::new(
                "run_shell",
                "Run a shell command in the workspace and return its stdout and stderr. \
                 Use for running tests, listing directories, etc.",
            )
            .with_string_param("command", "Shell command to execute.", true),
        }
    }
}

/// Everything a built-in needs to run
pub struct BuiltinContext<'a> {
    pub workspace: &'a Path,
    pub runner: &'a dyn CommandRunner,
    pub shell_timeout: Duration,
}

impl Builtin {
    /// Execute with already-validated arguments
    pub async fn execute(&self, args: &Value, ctx: &BuiltinContext<'_>) -> String {
        let arg = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or_default();

        match self {
            Self::ReadFile => read_file(ctx.workspace, arg("path")).await,
            Self::WriteFile => write_file(ctx.workspace, arg("path"), arg("content")).await,
            Self::RunShell => run_shell(ctx, arg("command")).await,
        }
    }
}

/// Resolve a relative path inside `workspace`, refusing anything that escapes it
pub fn resolve_in_workspace(workspace: &Path, path: &str) -> Result<PathBuf, String> {
    let requested = Path::new(path);
    let mut clean = PathBuf::new();

    for component in requested.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return Err(format!("path '{}' escapes the workspace", path));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!(
                    "absolute path '{}' not allowed, use a path relative to the workspace",
                    path
                ));
            }
        }
    }

    if clean.as_os_str().is_empty() {
        return Err("empty path".to_string());
    }
    Ok(workspace.join(clean))
}

async fn read_file(workspace: &Path, path: &str) -> String {
    let resolved = match resolve_in_workspace(workspace, path) {
        Ok(p) => p,
        Err(e) => return format!("Error: {}", e),
    };
    match tokio::fs::read_to_string(&resolved).await {
        Ok(content) => content,
        Err(e) => format!("Error: {}: {}", path, e),
    }
}

async fn write_file(workspace: &Path, path: &str, content: &str) -> String {
    let resolved = match resolve_in_workspace(workspace, path) {
        Ok(p) => p,
        Err(e) => return format!("Error: {}", e),
    };
    if let Some(parent) = resolved.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return format!("Error: {}", e);
        }
    }
    match tokio::fs::write(&resolved, content).await {
        Ok(()) => {
            debug!("Wrote {} bytes to {}", content.len(), resolved.display());
            format!("Wrote {} characters to {}", content.chars().count(), path)
        }
        Err(e) => format!("Error: {}: {}", path, e),
    }
}

async fn run_shell(ctx: &BuiltinContext<'_>, command: &str) -> String {
    let out = ctx.runner.run(command, ctx.workspace, ctx.shell_timeout).await;

    if let Some(error) = out.error {
        return format!("Error: {}", error);
    }
    if out.timed_out {
        return format!(
            "Error: command timed out after {} seconds",
            ctx.shell_timeout.as_secs()
        );
    }

    let mut output = out.stdout;
    if !out.stderr.is_empty() {
        output.push_str(&format!("\nSTDERR: {}", out.stderr));
    }
    match out.exit_code {
        Some(0) => {}
        Some(code) => output.push_str(&format!("\nExit code: {}", code)),
        None => output.push_str("\nExit code: -1"),
    }

    let trimmed = output.trim();
    if trimmed.is_empty() {
        "(no output)".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::CommandOutput;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedRunner(CommandOutput);

    #[async_trait]
    impl CommandRunner for FixedRunner {
        async fn run(&self, _command: &str, _cwd: &Path, _timeout: Duration) -> CommandOutput {
            self.0.clone()
        }
    }

    fn ctx<'a>(workspace: &'a Path, runner: &'a dyn CommandRunner) -> BuiltinContext<'a> {
        BuiltinContext {
            workspace,
            runner,
            shell_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_resolve_in_workspace() {
        let ws = Path::new("/tmp/ws");
        assert_eq!(resolve_in_workspace(ws, "a/b.py").unwrap(), ws.join("a/b.py"));
        assert_eq!(resolve_in_workspace(ws, "./a/../b.py").unwrap(), ws.join("b.py"));
        assert!(resolve_in_workspace(ws, "../outside.py").is_err());
        assert!(resolve_in_workspace(ws, "a/../../x").is_err());
        assert!(resolve_in_workspace(ws, "/etc/passwd").is_err());
        assert!(resolve_in_workspace(ws, "").is_err());
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Builtin::from_name("run_shell"), Some(Builtin::RunShell));
        assert_eq!(Builtin::from_name("fib"), None);
        for b in Builtin::ALL {
            assert_eq!(b.descriptor().name, b.name());
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let runner = FixedRunner(CommandOutput::default());
        let ctx = ctx(temp.path(), &runner);

        let out = Builtin::WriteFile
            .execute(&serde_json::json!({"path": "pkg/mod.py", "content": "x = 1\n"}), &ctx)
            .await;
        assert_eq!(out, "Wrote 6 characters to pkg/mod.py");

        let out = Builtin::ReadFile
            .execute(&serde_json::json!({"path": "pkg/mod.py"}), &ctx)
            .await;
        assert_eq!(out, "x = 1\n");
    }

    #[tokio::test]
    async fn test_read_missing_file_is_error_text() {
        let temp = TempDir::new().unwrap();
        let runner = FixedRunner(CommandOutput::default());
        let out = Builtin::ReadFile
            .execute(&serde_json::json!({"path": "nope.py"}), &ctx(temp.path(), &runner))
            .await;
        assert!(out.starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_write_escape_rejected() {
        let temp = TempDir::new().unwrap();
        let runner = FixedRunner(CommandOutput::default());
        let out = Builtin::WriteFile
            .execute(
                &serde_json::json!({"path": "../evil.py", "content": "x"}),
                &ctx(temp.path(), &runner),
            )
            .await;
        assert!(out.starts_with("Error:"));
        assert!(!temp.path().parent().unwrap().join("evil.py").exists());
    }

    #[tokio::test]
    async fn test_shell_formatting() {
        let temp = TempDir::new().unwrap();
        let runner = FixedRunner(CommandOutput {
            exit_code: Some(1),
            stdout: "1 failed\n".to_string(),
            stderr: "AssertionError".to_string(),
            ..Default::default()
        });
        let out = Builtin::RunShell
            .execute(&serde_json::json!({"command": "pytest"}), &ctx(temp.path(), &runner))
            .await;
        assert_eq!(out, "1 failed\n\nSTDERR: AssertionError\nExit code: 1");
    }

    #[tokio::test]
    async fn test_shell_empty_and_timeout() {
        let temp = TempDir::new().unwrap();
        let quiet = FixedRunner(CommandOutput {
            exit_code: Some(0),
            ..Default::default()
        });
        let out = Builtin::RunShell
            .execute(&serde_json::json!({"command": "true"}), &ctx(temp.path(), &quiet))
            .await;
        assert_eq!(out, "(no output)");

        let slow = FixedRunner(CommandOutput {
            timed_out: true,
            ..Default::default()
        });
        let out = Builtin::RunShell
            .execute(&serde_json::json!({"command": "sleep 99"}), &ctx(temp.path(), &slow))
            .await;
        assert_eq!(out, "Error: command timed out after 30 seconds");
    }
}
