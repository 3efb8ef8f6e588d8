//! Core data structures for the pagestamp engine.
//!
//! Pages and blocks are owned by the host; these are read-only snapshots of
//! them plus the change notification the host delivers.
use std::{collections::HashSet, fmt};

use chrono::Utc;
use clap::Subcommand;
use serde::{Deserialize, Serialize};

use crate::StampError;

/// A specialized Result type for pagestamp operations.
pub type Result<T> = std::result::Result<T, StampError>;

/// Stable identifier of a page's backing file.
pub type FileId = u64;

/// Opaque page handle issued by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub String);

/// Opaque block handle issued by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub String);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageId {
    fn from(value: &str) -> Self {
        PageId(value.to_string())
    }
}

impl From<&str> for BlockId {
    fn from(value: &str) -> Self {
        BlockId(value.to_string())
    }
}

/// Snapshot of a page as reported by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub name: String,
    pub is_journal: bool,
    /// Last modification time in epoch milliseconds, authoritative
    pub updated_at: i64,
    /// Backing file, when the page lives in one
    pub file: Option<FileId>,
}

/// Snapshot of a block's raw text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub content: String,
    pub page: PageId,
}

/// Kind of database operation that produced a change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    SaveBlock,
    InsertBlocks,
    DeleteBlocks,
    MoveBlocks,
    Other(String),
}

/// A change notification delivered by the host.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Blocks touched by the transaction
    pub blocks: Vec<Block>,
    pub operation: OperationKind,
    pub undo: bool,
    pub redo: bool,
    /// Wall-clock arrival time in epoch milliseconds
    pub received_at: i64,
}

impl ChangeEvent {
    /// A plain block save, stamped with the current time.
    pub fn block_saved(blocks: Vec<Block>) -> Self {
        Self {
            blocks,
            operation: OperationKind::SaveBlock,
            undo: false,
            redo: false,
            received_at: Utc::now().timestamp_millis(),
        }
    }

    /// Whether the notification is a user save rather than a replay.
    pub fn is_user_save(&self) -> bool {
        self.operation == OperationKind::SaveBlock && !self.undo && !self.redo
    }

    /// Pages of the changed blocks, each once, in block order
    pub fn pages(&self) -> Vec<PageId> {
        let mut seen = HashSet::new();
        self.blocks
            .iter()
            .map(|block| block.page.clone())
            .filter(|page| seen.insert(page.clone()))
            .collect()
    }
}

/// Available subcommands for the pagestamp application
#[derive(Subcommand)]
pub enum Commands {
    /// Watch the graph and keep timestamps current on every save
    Watch,

    /// Evaluate a single page once, as if its first block had been saved
    Stamp {
        /// Name of the page to stamp
        page: String,
    },

    /// Configuration management
    Config {
        /// Show current configuration
        #[clap(short = 'S', long)]
        show: bool,

        /// Write the default configuration to the settings file
        #[clap(short, long)]
        reset: bool,
    },
}
