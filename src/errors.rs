//! Error types for the pagestamp engine.
//!
//! This module defines the failures that can occur while resolving creation
//! times, reading pages from the host and writing timestamp properties back.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::FileId;

/// Failures of the creation-time lookup.
///
/// Kept `Clone` so a single in-flight lookup can hand the same result to
/// every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// The host could not map the file identifier to a path.
    #[error("No file path known for file {file_id}")]
    NotFound { file_id: FileId },

    /// The history tool is missing, could not be spawned or exited non-zero.
    #[error("History command unavailable: {message}")]
    EnvironmentUnavailable { message: String },

    /// The history tool printed something other than a second count.
    #[error("Unexpected history output: {output:?}")]
    MalformedOutput { output: String },
}

/// The main error type for the pagestamp application.
#[derive(Error, Debug)]
pub enum StampError {
    /// Errors related to file I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Errors related to serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Errors raised by the file system watcher.
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Page, block or file was not found.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Creation time lookup failed.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// The store rejected a content mutation.
    #[error("Write failed for {target}: {message}")]
    WriteFailure { target: String, message: String },

    /// Errors related to configuration.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Graph directory is missing or unreadable.
    #[error("Failed to access graph directory: {}", path.display())]
    DirectoryError { path: PathBuf },
}

impl StampError {
    /// Missing pages, blocks and files are expected during normal editing.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            StampError::NotFound { .. } | StampError::History(HistoryError::NotFound { .. })
        )
    }
}
