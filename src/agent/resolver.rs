//! Capability dispatch for agent runs

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::builtin::{Builtin, BuiltinContext};
use crate::capability::{CapabilityDescriptor, ScriptCapability};
use crate::sandbox::CommandRunner;

/// Default `run_shell` timeout
pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves invocation requests to results. Never fails: errors come back as text.
#[async_trait]
pub trait CapabilityResolver: Send + Sync {
    async fn dispatch(&self, name: &str, arguments: &Value) -> String;
}

/// A capability the toolbox can dispatch to
#[derive(Debug, Clone)]
pub enum Capability {
    Builtin(Builtin),
    Script(Arc<ScriptCapability>),
}

impl Capability {
    pub fn name(&self) -> &str {
        match self {
            Self::Builtin(b) => b.name(),
            Self::Script(s) => s.name(),
        }
    }

    pub fn descriptor(&self) -> CapabilityDescriptor {
        match self {
            Self::Builtin(b) => b.descriptor(),
            Self::Script(s) => s.descriptor().clone(),
        }
    }
}

/// Built-ins scoped to one workspace plus any library capabilities
pub struct Toolbox {
    workspace: PathBuf,
    runner: Arc<dyn CommandRunner>,
    shell_timeout: Duration,
    capabilities: Vec<Capability>,
}

impl Toolbox {
    /// Toolbox with only the built-ins
    pub fn new(workspace: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            workspace: workspace.into(),
            runner,
            shell_timeout: DEFAULT_SHELL_TIMEOUT,
            capabilities: Builtin::ALL.into_iter().map(Capability::Builtin).collect(),
        }
    }

    pub fn with_shell_timeout(mut self, timeout: Duration) -> Self {
        self.shell_timeout = timeout;
        self
    }

    pub fn with_scripts(mut self, scripts: impl IntoIterator<Item = Arc<ScriptCapability>>) -> Self {
        for script in scripts {
            self.add_script(script);
        }
        self
    }

    /// Add a script capability, replacing any script of the same name
    pub fn add_script(&mut self, script: Arc<ScriptCapability>) {
        if Builtin::from_name(script.name()).is_some() {
            warn!("Ignoring script capability shadowing built-in '{}'", script.name());
            return;
        }
        self.capabilities.retain(|c| c.name() != script.name());
        self.capabilities.push(Capability::Script(script));
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name() == name)
    }

    /// Descriptors for every capability, built-ins first
    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.capabilities.iter().map(Capability::descriptor).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[async_trait]
impl CapabilityResolver for Toolbox {
    async fn dispatch(&self, name: &str, arguments: &Value) -> String {
        let Some(capability) = self.get(name) else {
            return format!("Unknown tool: {}", name);
        };

        if let Value::String(raw) = arguments {
            return format!("Error: Invalid JSON arguments for {}: {}", name, raw);
        }
        if let Err(e) = capability.descriptor().validate_arguments(arguments) {
            return format!("Error: {}", e);
        }

        match capability {
            Capability::Builtin(builtin) => {
                let ctx = BuiltinContext {
                    workspace: &self.workspace,
                    runner: self.runner.as_ref(),
                    shell_timeout: self.shell_timeout,
                };
                builtin.execute(arguments, &ctx).await
            }
            Capability::Script(script) => {
                let script = Arc::clone(script);
                let args = arguments.clone();
                match tokio::task::spawn_blocking(move || script.invoke(&args)).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => {
                        debug!("Capability '{}' failed: {}", name, e);
                        format!("Error: {}", e)
                    }
                    Err(e) => format!("Error: capability '{}' panicked: {}", name, e),
                }
            }
        }
    }
}
