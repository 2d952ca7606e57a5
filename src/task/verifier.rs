//! Declarative verifiers for manifest tasks

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use super::VerifyResult;
use crate::sandbox::CommandRunner;

const SHELL_OUTPUT_TIMEOUT: Duration = Duration::from_secs(30);
const TESTS_TIMEOUT: Duration = Duration::from_secs(60);

/// A check against the workspace after the agent finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verifier {
    FileExists {
        path: String,
    },
    FileContains {
        path: String,
        pattern: String,
    },
    ShellOutput {
        command: String,
        expected: String,
        #[serde(default)]
        exact: bool,
    },
    TestsPass {
        command: String,
    },
    /// Every check must pass; the first failure is reported
    AllOf {
        checks: Vec<Verifier>,
    },
}

impl Verifier {
    pub fn check<'a>(
        &'a self,
        workspace: &'a Path,
        runner: &'a dyn CommandRunner,
    ) -> Pin<Box<dyn Future<Output = VerifyResult> + Send + 'a>> {
        Box::pin(async move {
            match self {
                Self::FileExists { path } => {
                    if workspace.join(path).exists() {
                        VerifyResult::pass(format!("{} exists", path))
                    } else {
                        VerifyResult::fail(format!("{} not found", path))
                    }
                }

                Self::FileContains { path, pattern } => {
                    match tokio::fs::read_to_string(workspace.join(path)).await {
                        Err(_) => VerifyResult::fail(format!("{} not found", path)),
                        Ok(content) if content.contains(pattern.as_str()) => {
                            VerifyResult::pass(format!("{} contains expected pattern", path))
                        }
                        Ok(_) => VerifyResult::fail(format!("{} missing pattern: {:?}", path, pattern)),
                    }
                }

                Self::ShellOutput {
                    command,
                    expected,
                    exact,
                } => {
                    let out = runner.run(command, workspace, SHELL_OUTPUT_TIMEOUT).await;
                    if out.timed_out {
                        return VerifyResult::fail("Verification command timed out");
                    }
                    if let Some(error) = out.error {
                        return VerifyResult::fail(format!("Verification command error: {}", error));
                    }

                    let output = out.stdout.trim();
                    let matched = if *exact {
                        output == expected.as_str()
                    } else {
                        output.contains(expected.as_str())
                    };
                    if matched {
                        return VerifyResult::pass(format!("Output matched: {:?}", output));
                    }

                    let mut message = format!("Expected {:?} in output, got: {:?}", expected, output);
                    let stderr = out.stderr.trim();
                    if !stderr.is_empty() {
                        message.push_str(&format!("\nSTDERR: {}", stderr));
                    }
                    VerifyResult::fail(message)
                }

                Self::TestsPass { command } => {
                    let out = runner.run(command, workspace, TESTS_TIMEOUT).await;
                    if out.timed_out {
                        return VerifyResult::fail("Test command timed out");
                    }
                    if let Some(error) = out.error {
                        return VerifyResult::fail(format!("Test command error: {}", error));
                    }
                    if out.exit_code == Some(0) {
                        return VerifyResult::pass(format!("Tests passed\n{}", out.stdout.trim()));
                    }
                    let output = format!("{}{}", out.stdout, out.stderr);
                    VerifyResult::fail(format!(
                        "Tests failed (exit {})\n{}",
                        out.exit_code.map_or("?".to_string(), |c| c.to_string()),
                        output.trim()
                    ))
                }

                Self::AllOf { checks } => {
                    for check in checks {
                        let result = check.check(workspace, runner).await;
                        if !result.passed {
                            return result;
                        }
                    }
                    VerifyResult::pass("All checks passed")
                }
            }
        })
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

    fn ok(stdout: &str) -> FixedRunner {
        FixedRunner(CommandOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_file_checks() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("fib.py"), "def fibonacci(n):\n").unwrap();
        let runner = ok("");

        let exists = Verifier::FileExists { path: "fib.py".into() };
        assert!(exists.check(temp.path(), &runner).await.passed);

        let missing = Verifier::FileExists { path: "nope.py".into() };
        assert_eq!(missing.check(temp.path(), &runner).await.message, "nope.py not found");

        let contains = Verifier::FileContains {
            path: "fib.py".into(),
            pattern: "def fibonacci".into(),
        };
        assert!(contains.check(temp.path(), &runner).await.passed);

        let lacks = Verifier::FileContains {
            path: "fib.py".into(),
            pattern: "memo".into(),
        };
        assert_eq!(
            lacks.check(temp.path(), &runner).await.message,
            "fib.py missing pattern: \"memo\""
        );
    }

    #[tokio::test]
    async fn test_shell_output_exact_and_contains() {
        let temp = TempDir::new().unwrap();
        let runner = ok("  55\n");

        let exact = Verifier::ShellOutput {
            command: "python3 -c 'print(55)'".into(),
            expected: "55".into(),
            exact: true,
        };
        assert!(exact.check(temp.path(), &runner).await.passed);

        let wrong = Verifier::ShellOutput {
            command: "x".into(),
            expected: "89".into(),
            exact: false,
        };
        let result = wrong.check(temp.path(), &runner).await;
        assert!(!result.passed);
        assert_eq!(result.message, "Expected \"89\" in output, got: \"55\"");
    }

    #[tokio::test]
    async fn test_tests_pass_failure_message() {
        let temp = TempDir::new().unwrap();
        let runner = FixedRunner(CommandOutput {
            exit_code: Some(1),
            stdout: "1 failed\n".into(),
            stderr: "AssertionError".into(),
            ..Default::default()
        });
        let result = Verifier::TestsPass { command: "pytest".into() }
            .check(temp.path(), &runner)
            .await;
        assert_eq!(result.message, "Tests failed (exit 1)\n1 failed\nAssertionError");
    }

    #[tokio::test]
    async fn test_timeout_reported() {
        let temp = TempDir::new().unwrap();
        let runner = FixedRunner(CommandOutput {
            timed_out: true,
            ..Default::default()
        });
        let result = Verifier::TestsPass { command: "pytest".into() }
            .check(temp.path(), &runner)
            .await;
        assert_eq!(result, VerifyResult::fail("Test command timed out"));
    }

    #[tokio::test]
    async fn test_all_of_first_failure_wins() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.py"), "x").unwrap();
        let runner = ok("");

        let all = Verifier::AllOf {
            checks: vec![
                Verifier::FileExists { path: "a.py".into() },
                Verifier::FileExists { path: "b.py".into() },
                Verifier::FileExists { path: "c.py".into() },
            ],
        };
        assert_eq!(all.check(temp.path(), &runner).await.message, "b.py not found");

        let passing = Verifier::AllOf {
            checks: vec![Verifier::FileExists { path: "a.py".into() }],
        };
        assert_eq!(passing.check(temp.path(), &runner).await.message, "All checks passed");
    }

    #[test]
    fn test_deserialize_tagged() {
        let v: Verifier = toml::from_str(
            r#"
kind = "all_of"
[[checks]]
kind = "file_exists"
path = "fib.py"
[[checks]]
kind = "shell_output"
command = "python3 fib.py"
expected = "55"
"#,
        )
        .unwrap();
        match v {
            Verifier::AllOf { checks } => {
                assert_eq!(checks.len(), 2);
                assert!(matches!(&checks[1], Verifier::ShellOutput { exact: false, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
