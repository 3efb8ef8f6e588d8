//! In-memory host, used by tests and for embedding the engine without a graph folder.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use async_trait::async_trait;
use log::trace;

use crate::{Block, BlockId, FileId, FileLocator, Host, Page, PageId, Result, StampError};

/// A mutation the host accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostWrite {
    Update { block: BlockId, content: String },
    InsertBefore { anchor: BlockId, block: BlockId, content: String },
}

#[derive(Default)]
struct State {
    pages: HashMap<PageId, Page>,
    /// Top-level block order per page
    order: HashMap<PageId, Vec<BlockId>>,
    blocks: HashMap<BlockId, Block>,
    files: HashMap<FileId, String>,
    writes: Vec<HostWrite>,
}

pub struct MemoryHost {
    state: Mutex<State>,
    next_id: AtomicU64,
    fail_writes: AtomicBool,
    date_format: String,
    language: String,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new("yyyy-MM-dd", "en")
    }
}

impl MemoryHost {
    pub fn new(date_format: &str, language: &str) -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_id: AtomicU64::new(1),
            fail_writes: AtomicBool::new(false),
            date_format: date_format.to_string(),
            language: language.to_string(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fresh_block_id(&self) -> BlockId {
        BlockId(format!("b{}", self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn add_page(&self, page: Page) {
        let mut state = self.state();
        state.order.entry(page.id.clone()).or_default();
        state.pages.insert(page.id.clone(), page);
    }

    /// Appends a top-level block to `page` and returns it
    pub fn push_block(&self, page: &PageId, content: &str) -> Block {
        let block = Block {
            id: self.fresh_block_id(),
            content: content.to_string(),
            page: page.clone(),
        };
        let mut state = self.state();
        state.order.entry(page.clone()).or_default().push(block.id.clone());
        state.blocks.insert(block.id.clone(), block.clone());
        block
    }

    pub fn set_file_path(&self, file_id: FileId, path: &str) {
        self.state().files.insert(file_id, path.to_string());
    }

    pub fn set_updated_at(&self, page: &PageId, updated_at: i64) {
        if let Some(page) = self.state().pages.get_mut(page) {
            page.updated_at = updated_at;
        }
    }

    /// Makes every later write fail with `WriteFailure`
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<HostWrite> {
        self.state().writes.clone()
    }

    /// Current content of the page's top-level blocks, in order
    pub fn contents(&self, page: &PageId) -> Vec<String> {
        let state = self.state();
        state
            .order
            .get(page)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.blocks.get(id))
                    .map(|block| block.content.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check_writable(&self, target: &BlockId) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StampError::WriteFailure {
                target: target.to_string(),
                message: "store is read-only".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FileLocator for MemoryHost {
    async fn resolve_file_path(&self, file_id: FileId) -> Option<String> {
        self.state().files.get(&file_id).cloned()
    }
}

#[async_trait]
impl Host for MemoryHost {
    async fn get_block(&self, id: &BlockId) -> Result<Option<Block>> {
        Ok(self.state().blocks.get(id).cloned())
    }

    async fn get_page(&self, id: &PageId) -> Result<Option<Page>> {
        Ok(self.state().pages.get(id).cloned())
    }

    async fn page_blocks(&self, page: &PageId) -> Result<Vec<Block>> {
        let state = self.state();
        Ok(state
            .order
            .get(page)
            .map(|ids| ids.iter().filter_map(|id| state.blocks.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    async fn update_block(&self, id: &BlockId, content: &str) -> Result<()> {
        self.check_writable(id)?;
        let mut state = self.state();
        let block = state.blocks.get_mut(id).ok_or_else(|| StampError::NotFound {
            what: format!("block {}", id),
        })?;
        block.content = content.to_string();
        state.writes.push(HostWrite::Update {
            block: id.clone(),
            content: content.to_string(),
        });
        trace!("Updated block {}", id);
        Ok(())
    }

    async fn insert_block_before(&self, anchor: &BlockId, content: &str) -> Result<BlockId> {
        self.check_writable(anchor)?;
        let id = self.fresh_block_id();
        let mut state = self.state();
        let page = state
            .blocks
            .get(anchor)
            .map(|block| block.page.clone())
            .ok_or_else(|| StampError::NotFound {
                what: format!("block {}", anchor),
            })?;

        let order = state.order.entry(page.clone()).or_default();
        let position = order.iter().position(|b| b == anchor).unwrap_or(0);
        order.insert(position, id.clone());
        state.blocks.insert(
            id.clone(),
            Block {
                id: id.clone(),
                content: content.to_string(),
                page,
            },
        );
        state.writes.push(HostWrite::InsertBefore {
            anchor: anchor.clone(),
            block: id.clone(),
            content: content.to_string(),
        });
        trace!("Inserted block {} before {}", id, anchor);
        Ok(id)
    }

    async fn date_format(&self) -> String {
        self.date_format.clone()
    }

    async fn language(&self) -> String {
        self.language.clone()
    }
}
