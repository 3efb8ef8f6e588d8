//! The narrow interface the engine needs from the document store.
use async_trait::async_trait;

use crate::{Block, BlockId, FileLocator, Page, PageId, Result};

/// Host-provided access to pages, blocks and user preferences.
///
/// Implementations serialize conflicting writes themselves; the engine holds
/// no locks around these calls.
#[async_trait]
pub trait Host: FileLocator {
    async fn get_block(&self, id: &BlockId) -> Result<Option<Block>>;

    async fn get_page(&self, id: &PageId) -> Result<Option<Page>>;

    /// Top-level blocks of a page, in display order
    async fn page_blocks(&self, page: &PageId) -> Result<Vec<Block>>;

    async fn update_block(&self, id: &BlockId, content: &str) -> Result<()>;

    /// Inserts a block holding `content` right before `anchor`, as its sibling
    async fn insert_block_before(&self, anchor: &BlockId, content: &str) -> Result<BlockId>;

    /// Date pattern in date-fns notation
    async fn date_format(&self) -> String;

    /// Preferred language tag
    async fn language(&self) -> String;
}
