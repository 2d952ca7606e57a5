//! Pipeline Event Log
//!
//! Append-only JSONL record of every agent run and generation attempt, one object per
//! line with a `ts` timestamp and an `event` tag.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::agent::TrajectoryStep;

/// One pipeline milestone
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent<'a> {
    TaskInitialResult {
        task_id: &'a str,
        model: &'a str,
        passed: bool,
        verify_message: &'a str,
        feedback_sent_to_generator: Option<&'a str>,
        trajectory: &'a [TrajectoryStep],
        tools_available: Vec<&'a str>,
        tools_used: Vec<&'a str>,
        input_tokens: u64,
        output_tokens: u64,
    },
    GenerationAttempt {
        task_id: &'a str,
        attempt: usize,
        model: &'a str,
        tokens_in: u64,
        tokens_out: u64,
        feedback_sent_to_generator: &'a str,
        tool_code: &'a str,
        validation_passed: bool,
        /// Capability name when valid, rejection reason otherwise
        validation_result: &'a str,
    },
    GenerationRetryResult {
        task_id: &'a str,
        attempt: usize,
        tool_name: &'a str,
        passed: bool,
        verify_message: &'a str,
        feedback_sent_to_generator_next_attempt: &'a str,
        trajectory: &'a [TrajectoryStep],
        tools_used: Vec<&'a str>,
    },
    GenerationError {
        task_id: &'a str,
        attempt: usize,
        error: &'a str,
    },
}

#[derive(Serialize)]
struct Record<'a> {
    ts: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a PipelineEvent<'a>,
}

/// JSONL sink for pipeline events
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// Use `path` as the log, creating parent directories. Existing lines are kept.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single line
    pub fn append(&self, event: &PipelineEvent<'_>) -> std::io::Result<()> {
        let line = serde_json::to_string(&Record {
            ts: Utc::now(),
            event,
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_appends_tagged_lines() {
        let temp = TempDir::new().unwrap();
        let log = EventLog::open(temp.path().join("logs/run.jsonl")).unwrap();

        log.append(&PipelineEvent::GenerationError {
            task_id: "fibonacci",
            attempt: 1,
            error: "overloaded",
        })
        .unwrap();
        log.append(&PipelineEvent::GenerationError {
            task_id: "fibonacci",
            attempt: 2,
            error: "overloaded",
        })
        .unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "generation_error");
        assert_eq!(lines[1]["attempt"], 2);
        assert!(lines[0]["ts"].as_str().unwrap().contains('T'));
    }
}
