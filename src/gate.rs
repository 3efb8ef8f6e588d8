//! Change ingestion and per-page orchestration.
//!
//! The host hands every change notification to [`ChangeGate::on_change`],
//! which drops everything that is not a user block save and queues the rest.
//! A worker task dispatches queued events in arrival order. Different pages
//! are evaluated concurrently, so a slow history lookup for one page never
//! holds up another. Evaluations of the same page run one after another, so
//! each one sees the writes of the one before it.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, PoisonError},
};

use futures::FutureExt;
use log::{debug, error, info, trace, warn};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::{JoinError, JoinHandle, JoinSet},
};

use crate::{
    analyzer::{classify, Shape, StampKeys},
    editor::{plan, Edit, Stamps},
    ChangeEvent, DateFormatter, HistoryCommand, HistoryResolver, Host, Page, PageId, Result,
    Settings, StampError, TimestampCache,
};

/// Queue depth between the host callback and the worker
const QUEUE_CAPACITY: usize = 256;

/// How one page evaluation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The page no longer exists
    NoPage,
    /// Journal pages are never stamped
    Journal,
    /// The page is in the ignore list
    Ignored,
    /// The page has no block to stamp
    NoBlock,
    /// The first block is already current
    Skipped,
    /// The first block was rewritten; carries the shape it had
    Updated(Shape),
    /// A timestamp block was inserted before the first block
    Inserted,
}

/// Evaluates pages: creation time, classification, edit, write.
pub struct Stamper<H: Host + ?Sized> {
    host: Arc<H>,
    keys: StampKeys,
    ignore: HashSet<String>,
    cache: Option<Arc<TimestampCache>>,
}

impl<H: Host + ?Sized + 'static> Stamper<H> {
    /// Builds a stamper; a creation-time cache over `history` is set up when
    /// the settings ask for history lookups and a command is available.
    pub fn new(
        host: Arc<H>,
        settings: &Settings,
        history: Option<Arc<dyn HistoryCommand>>,
    ) -> Self {
        let cache = match history {
            Some(command) if settings.use_external_history_for_creation_time => {
                let resolver = HistoryResolver::new(Arc::clone(&host), command);
                Some(Arc::new(TimestampCache::new(Arc::new(resolver))))
            }
            _ => None,
        };

        Self {
            host,
            keys: StampKeys::from_settings(settings),
            ignore: settings.ignore_list(),
            cache,
        }
    }

    /// Replaces the creation-time cache
    pub fn with_cache(mut self, cache: Option<Arc<TimestampCache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> Option<&Arc<TimestampCache>> {
        self.cache.as_ref()
    }

    /// Evaluates every page touched by an event. Never fails; problems are logged.
    pub async fn handle(&self, event: ChangeEvent) {
        for page in event.pages() {
            self.run(&page, event.received_at).await;
        }
    }

    /// Evaluates one page, logging instead of returning errors
    pub async fn run(&self, page: &PageId, received_at: i64) {
        match self.evaluate(page, received_at).await {
            Ok(outcome) => debug!("Page {}: {:?}", page, outcome),
            Err(e) if e.is_benign() => debug!("Page {} skipped: {}", page, e),
            Err(e) => error!("Failed to stamp page {}: {}", page, e),
        }
    }

    /// Brings the timestamp properties of one page up to date.
    ///
    /// `received_at` is the event arrival time, used as creation time when
    /// history is disabled or unavailable.
    pub async fn evaluate(&self, page_id: &PageId, received_at: i64) -> Result<Outcome> {
        let Some(page) = self.host.get_page(page_id).await? else {
            return Ok(Outcome::NoPage);
        };
        if page.is_journal {
            trace!("Page {} is a journal page", page.name);
            return Ok(Outcome::Journal);
        }
        if self.ignore.contains(&page.name.to_lowercase()) {
            trace!("Page {} is ignored", page.name);
            return Ok(Outcome::Ignored);
        }

        let blocks = self.host.page_blocks(&page.id).await?;
        let Some(first) = blocks.first() else {
            return Ok(Outcome::NoBlock);
        };
        let Some(block) = self.host.get_block(&first.id).await? else {
            return Ok(Outcome::NoBlock);
        };

        let created_at = self.creation_time(&page, received_at).await;
        let formatter = DateFormatter::new(&self.host.date_format().await, &self.host.language().await);
        let stamps = Stamps {
            created: formatter.format_millis(created_at),
            updated: formatter.format_millis(page.updated_at),
        };

        let shape = classify(&block.content, &self.keys, &stamps.updated);
        trace!("First block {} of {} is {:?}", block.id, page.name, shape);

        let outcome = match plan(&block.content, shape, &self.keys, &stamps) {
            Edit::Skip => Outcome::Skipped,
            Edit::Replace(content) => {
                self.host
                    .update_block(&block.id, &content)
                    .await
                    .map_err(|e| write_failure(&block.id.0, e))?;
                Outcome::Updated(shape)
            }
            Edit::InsertBefore(content) => {
                self.host
                    .insert_block_before(&block.id, &content)
                    .await
                    .map_err(|e| write_failure(&block.id.0, e))?;
                Outcome::Inserted
            }
        };

        if outcome != Outcome::Skipped {
            info!("Stamped page {} ({:?})", page.name, outcome);
        }
        Ok(outcome)
    }

    async fn creation_time(&self, page: &Page, received_at: i64) -> i64 {
        let (Some(cache), Some(file)) = (&self.cache, page.file) else {
            return received_at;
        };
        match cache.resolve(file).await {
            Ok(millis) => millis,
            Err(e) => {
                debug!(
                    "Using arrival time as creation time of {}: {}",
                    page.name, e
                );
                received_at
            }
        }
    }
}

/// Wraps a failed write; a block that vanished before the write stays `NotFound`
fn write_failure(target: &str, e: StampError) -> StampError {
    match e {
        StampError::WriteFailure { .. } | StampError::NotFound { .. } => e,
        other => StampError::WriteFailure {
            target: target.to_string(),
            message: other.to_string(),
        },
    }
}

#[derive(Debug)]
enum GateCommand {
    Change(ChangeEvent),
    Stop,
}

/// Runs evaluations, one at a time per page and concurrently across pages.
struct Dispatcher<H: Host + ?Sized> {
    stamper: Arc<Stamper<H>>,
    tasks: JoinSet<PageId>,
    /// Arrival times waiting behind the running evaluation, keyed by page.
    /// A page has an entry exactly while one of its evaluations runs.
    waiting: HashMap<PageId, VecDeque<i64>>,
}

impl<H: Host + ?Sized + 'static> Dispatcher<H> {
    fn new(stamper: Arc<Stamper<H>>) -> Self {
        Self {
            stamper,
            tasks: JoinSet::new(),
            waiting: HashMap::new(),
        }
    }

    fn submit(&mut self, event: ChangeEvent) {
        for page in event.pages() {
            match self.waiting.get_mut(&page) {
                Some(queue) => {
                    trace!("Page {} is being evaluated, queueing", page);
                    queue.push_back(event.received_at);
                }
                None => {
                    self.waiting.insert(page.clone(), VecDeque::new());
                    self.spawn(page, event.received_at);
                }
            }
        }
    }

    fn spawn(&mut self, page: PageId, received_at: i64) {
        let stamper = Arc::clone(&self.stamper);
        self.tasks.spawn(async move {
            let run = AssertUnwindSafe(stamper.run(&page, received_at));
            if run.catch_unwind().await.is_err() {
                error!("Evaluation of page {} panicked", page);
            }
            page
        });
    }

    fn finished(&mut self, joined: std::result::Result<PageId, JoinError>) {
        let page = match joined {
            Ok(page) => page,
            Err(e) => {
                error!("Page evaluation task failed: {}", e);
                return;
            }
        };

        match self.waiting.get_mut(&page).and_then(VecDeque::pop_front) {
            Some(received_at) => self.spawn(page, received_at),
            None => {
                self.waiting.remove(&page);
            }
        }
    }

    async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            self.finished(joined);
        }
    }
}

/// Entry point for host change notifications.
pub struct ChangeGate {
    tx: mpsc::Sender<GateCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeGate {
    /// Spawns the dispatch worker. Must be called inside a tokio runtime.
    pub fn start<H: Host + ?Sized + 'static>(stamper: Arc<Stamper<H>>) -> Self {
        let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);

        let worker = tokio::spawn(async move {
            debug!("Change gate worker started");
            let mut dispatcher = Dispatcher::new(stamper);

            loop {
                tokio::select! {
                    command = rx.recv() => match command {
                        Some(GateCommand::Change(event)) => dispatcher.submit(event),
                        Some(GateCommand::Stop) | None => break,
                    },
                    Some(joined) = dispatcher.tasks.join_next(), if !dispatcher.tasks.is_empty() => {
                        dispatcher.finished(joined);
                    }
                }
            }

            dispatcher.drain().await;
            debug!("Change gate worker stopped");
        });

        Self {
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Accepts a host notification. Returns immediately and never fails.
    pub fn on_change(&self, event: ChangeEvent) {
        if !event.is_user_save() {
            trace!(
                "Ignoring {:?} (undo={}, redo={})",
                event.operation,
                event.undo,
                event.redo
            );
            return;
        }

        match self.tx.try_send(GateCommand::Change(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Change queue full, dropping notification"),
            Err(TrySendError::Closed(_)) => warn!("Change gate stopped, dropping notification"),
        }
    }

    /// Waits for queued and running evaluations, then stops the worker.
    pub async fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            debug!("Change gate is not running");
            return;
        };

        if let Err(e) = self.tx.send(GateCommand::Stop).await {
            error!("Failed to send stop command to change gate: {}", e);
        }
        if let Err(e) = worker.await {
            error!("Change gate worker failed: {}", e);
        }
        info!("Change gate stopped");
    }
}
