//! Media download collaborators.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::types::config::CommandConfig;
use crate::{ReelError, ReelResult};

/// Downloads the media behind a candidate.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetches the candidate and returns the local file path.
    async fn fetch(&self, candidate_id: &str) -> ReelResult<PathBuf>;
}

/// Fetcher backed by an external command.
///
/// The candidate id is appended to the configured arguments. The last
/// non-empty line of standard output must name an existing file.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    command: CommandConfig,
    timeout: Duration,
}

impl CommandFetcher {
    /// Creates a new command fetcher.
    pub fn new(command: CommandConfig) -> Self {
        Self {
            command,
            timeout: Duration::from_secs(60),
        }
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl MediaFetcher for CommandFetcher {
    async fn fetch(&self, candidate_id: &str) -> ReelResult<PathBuf> {
        let failed = |message: String| ReelError::FetchFailed(candidate_id.to_string(), message);

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.command.command)
                .args(&self.command.args)
                .arg(candidate_id)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| failed("timed out".to_string()))?
        .map_err(|e| failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(PathBuf::from)
            .ok_or_else(|| failed("fetcher printed no path".to_string()))?;

        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            Ok(_) => Err(failed(format!("{} is not a file", path.display()))),
            Err(e) => Err(failed(format!("{}: {}", path.display(), e))),
        }
    }
}
