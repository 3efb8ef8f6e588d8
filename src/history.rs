//! Creation times from version-control history.
//!
//! The creation time of a page is the author time of the commit that first
//! added its backing file. The lookup never retries; the cache in front of it
//! decides when to ask again.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use log::{debug, trace};
use tokio::process::Command;
use which::which;

use crate::{FileId, HistoryError};

pub type HistoryResult<T> = std::result::Result<T, HistoryError>;

/// Maps a backing-file identifier to a path the history tool understands.
#[async_trait]
pub trait FileLocator: Send + Sync {
    async fn resolve_file_path(&self, file_id: FileId) -> Option<String>;
}

/// Runs the history query for one path and returns its raw stdout.
#[async_trait]
pub trait HistoryCommand: Send + Sync {
    async fn run(&self, path: &str) -> HistoryResult<String>;
}

/// Anything able to tell when a file was created.
#[async_trait]
pub trait CreationSource: Send + Sync {
    /// Creation time in epoch milliseconds
    async fn creation_time(&self, file_id: FileId) -> HistoryResult<i64>;
}

/// `git log` over a repository checkout.
#[derive(Debug, Clone)]
pub struct GitHistory {
    repo_root: PathBuf,
}

impl GitHistory {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}

#[async_trait]
impl HistoryCommand for GitHistory {
    async fn run(&self, path: &str) -> HistoryResult<String> {
        let git = which("git").map_err(|e| HistoryError::EnvironmentUnavailable {
            message: format!("git not found: {}", e),
        })?;

        trace!("git log for {} in {}", path, self.repo_root.display());
        let output = Command::new(git)
            .args([
                "log",
                "--follow",
                "--diff-filter=A",
                "--format=%at",
                "--reverse",
                "--",
                path,
            ])
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| HistoryError::EnvironmentUnavailable {
                message: format!("failed to run git: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HistoryError::EnvironmentUnavailable {
                message: format!("git log exited with {}: {}", output.status, stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parses `git log --format=%at --reverse` output into epoch milliseconds.
///
/// The first line is the earliest addition; it must be a bare non-negative
/// integer count of seconds.
pub fn parse_history_output(stdout: &str) -> HistoryResult<i64> {
    let malformed = || HistoryError::MalformedOutput {
        output: stdout.to_string(),
    };

    // lines() strips the terminator; anything else around the digits is malformed
    let first = stdout.lines().next().unwrap_or_default();
    if first.is_empty() || !first.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    let seconds: i64 = first.parse().map_err(|_| malformed())?;
    seconds.checked_mul(1000).ok_or_else(malformed)
}

/// Resolves creation times by running the history command on the page file.
pub struct HistoryResolver<L: FileLocator + ?Sized> {
    locator: Arc<L>,
    command: Arc<dyn HistoryCommand>,
}

impl<L: FileLocator + ?Sized> HistoryResolver<L> {
    pub fn new(locator: Arc<L>, command: Arc<dyn HistoryCommand>) -> Self {
        Self { locator, command }
    }
}

#[async_trait]
impl<L: FileLocator + ?Sized> CreationSource for HistoryResolver<L> {
    async fn creation_time(&self, file_id: FileId) -> HistoryResult<i64> {
        let path = self
            .locator
            .resolve_file_path(file_id)
            .await
            .ok_or(HistoryError::NotFound { file_id })?;

        let stdout = self.command.run(&path).await?;
        let millis = parse_history_output(&stdout)?;
        debug!("File {} ({}) was created at {}", file_id, path, millis);
        Ok(millis)
    }
}
