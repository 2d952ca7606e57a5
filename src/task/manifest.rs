//! Task Manifests
//!
//! Tasks declared in TOML:
//!
//! ```toml
//! [[task]]
//! id = "fibonacci"
//! prompt = "Create fibonacci.py defining fibonacci(n) ..."
//! tags = ["algorithm"]
//!
//! [task.files]
//! "test_fibonacci.py" = "from fibonacci import fibonacci\n..."
//!
//! [task.verify]
//! kind = "tests_pass"
//! command = "python3 -m pytest test_fibonacci.py -q"
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::verifier::Verifier;
use super::{Task, VerifyResult};
use crate::agent::resolve_in_workspace;
use crate::sandbox::CommandRunner;

/// One `[[task]]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub prompt: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Files written into the workspace before the agent starts
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    pub verify: Verifier,
}

/// A parsed manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskManifest {
    #[serde(rename = "task", default)]
    pub tasks: Vec<TaskSpec>,
}

impl TaskManifest {
    /// Parse and check a manifest
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(content).context("Failed to parse task manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load from a TOML file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read task manifest {}", path.display()))?;
        let manifest = Self::parse(&content)?;
        info!("Loaded {} tasks from {}", manifest.tasks.len(), path.display());
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for spec in &self.tasks {
            if spec.id.trim().is_empty() {
                bail!("Task with empty id");
            }
            if spec.prompt.trim().is_empty() {
                bail!("Task '{}' has an empty prompt", spec.id);
            }
            if !seen.insert(spec.id.as_str()) {
                bail!("Duplicate task id '{}'", spec.id);
            }
        }
        Ok(())
    }

    pub fn ids(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.id.as_str()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Runnable tasks verifying through `runner`
    pub fn into_tasks(self, runner: Arc<dyn CommandRunner>) -> Vec<Arc<dyn Task>> {
        self.tasks
            .into_iter()
            .map(|spec| Arc::new(ManifestTask::new(spec, Arc::clone(&runner))) as Arc<dyn Task>)
            .collect()
    }
}

/// A manifest task bound to a command runner for its checks
pub struct ManifestTask {
    spec: TaskSpec,
    runner: Arc<dyn CommandRunner>,
}

impl ManifestTask {
    pub fn new(spec: TaskSpec, runner: Arc<dyn CommandRunner>) -> Self {
        Self { spec, runner }
    }
}

#[async_trait]
impl Task for ManifestTask {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn prompt(&self) -> &str {
        &self.spec.prompt
    }

    fn tags(&self) -> &[String] {
        &self.spec.tags
    }

    async fn setup(&self, workspace: &Path) -> Result<()> {
        for (rel, content) in &self.spec.files {
            let path = resolve_in_workspace(workspace, rel).map_err(anyhow::Error::msg)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, content)
                .await
                .with_context(|| format!("Failed to write {}", rel))?;
            debug!("Seeded {} for task {}", rel, self.spec.id);
        }
        Ok(())
    }

    async fn verify(&self, workspace: &Path) -> VerifyResult {
        self.spec.verify.check(workspace, self.runner.as_ref()).await
    }
}
