//! Executor backed by an external command.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use super::base::{parse_output, TaskExecutor};
use crate::types::config::{CommandConfig, TaskConfig};
use crate::{ReelError, ReelResult};

/// Runs a command line tool for each task.
///
/// The configured arguments are followed by the task name and the parameter
/// bundle as JSON. Standard output is parsed with [`parse_output`].
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    name: String,
    command: CommandConfig,
    timeout: Duration,
}

impl CommandExecutor {
    /// Creates a new command executor.
    pub fn new(name: impl Into<String>, command: CommandConfig) -> Self {
        Self {
            name: name.into(),
            command,
            timeout: Duration::from_secs(60),
        }
    }

    /// Creates an executor from a task configuration.
    pub fn from_config(name: &str, config: &TaskConfig) -> Self {
        Self::new(name, config.invocation())
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command being run.
    pub fn command(&self) -> &str {
        &self.command.command
    }

    /// Returns the first line printed by `<command> --version`.
    pub async fn version(&self) -> ReelResult<String> {
        let output = Command::new(self.command()).arg("--version").output().await?;

        let version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("unknown")
            .to_string();

        Ok(version)
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, task_name: &str, params: &Value) -> ReelResult<Value> {
        let result = tokio::time::timeout(
            self.timeout,
            Command::new(self.command())
                .args(&self.command.args)
                .arg(task_name)
                .arg(params.to_string())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                if output.status.success() {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    parse_output(&stdout, &self.name)
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    Err(ReelError::ExecutorFailed(
                        self.name.clone(),
                        stderr.trim().to_string(),
                    ))
                }
            }
            Ok(Err(e)) => Err(ReelError::ExecutorFailed(self.name.clone(), e.to_string())),
            Err(_) => Err(ReelError::ExecutorTimeout(self.name.clone())),
        }
    }

    async fn is_available(&self) -> bool {
        Command::new(self.command())
            .arg("--version")
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}
