//! Turns file saves inside a graph folder into change events.

use std::{
    path::PathBuf,
    sync::{mpsc as std_mpsc, Arc},
    time::Duration,
};

use log::{debug, error, info, trace};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{ChangeEvent, ChangeGate, GraphStore, Host, PageId, Result, PAGE_DIRS};

/// Page files touched by a file system event
fn touched_pages(store: &GraphStore, event: &Event) -> Vec<PageId> {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return Vec::new();
    }
    let mut pages: Vec<PageId> = event
        .paths
        .iter()
        .filter_map(|path| store.page_id_for(path))
        .collect();
    pages.dedup();
    pages
}

/// Watches `pages/` and `journals/` and feeds saves into a [`ChangeGate`].
pub struct GraphWatcher {
    watcher: Option<RecommendedWatcher>,
    bridge: Option<JoinHandle<()>>,
    handler: Option<JoinHandle<()>>,
}

impl GraphWatcher {
    pub fn start(store: Arc<GraphStore>, gate: Arc<ChangeGate>) -> Result<Self> {
        let (std_tx, std_rx) = std_mpsc::channel::<notify::Result<Event>>();
        let (tx, mut rx) = mpsc::channel(100);

        let mut watcher: RecommendedWatcher = Watcher::new(
            std_tx,
            notify::Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let mut watched: Vec<PathBuf> = Vec::new();
        for dir in PAGE_DIRS {
            let path = store.root().join(dir);
            if path.is_dir() {
                watcher.watch(&path, RecursiveMode::Recursive)?;
                watched.push(path);
            }
        }

        // notify delivers on a plain std channel; forward onto tokio
        let bridge = tokio::task::spawn_blocking(move || {
            while let Ok(event) = std_rx.recv() {
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
            debug!("File system event bridge stopped");
        });

        let root = store.root().to_path_buf();
        let handler = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    Ok(event) => {
                        trace!("File system event: {:?}", event.kind);
                        for page in touched_pages(&store, &event) {
                            forward(&store, &gate, &page).await;
                        }
                    }
                    Err(e) => error!("File system watcher error: {}", e),
                }
            }
            debug!("File system event handler stopped");
        });

        info!("Watching {} folders under {}", watched.len(), root.display());
        Ok(Self {
            watcher: Some(watcher),
            bridge: Some(bridge),
            handler: Some(handler),
        })
    }

    /// Stops watching. Events already handed to the gate are unaffected.
    pub async fn stop(&mut self) {
        // dropping the watcher closes the std channel, which unwinds both tasks
        if self.watcher.take().is_none() {
            debug!("No active file watcher to stop");
            return;
        }
        for task in [self.bridge.take(), self.handler.take()].into_iter().flatten() {
            if let Err(e) = task.await {
                error!("File watcher task failed: {}", e);
            }
        }
        info!("File system watcher stopped");
    }
}

/// Reports the first block of `page` as saved
async fn forward(store: &GraphStore, gate: &ChangeGate, page: &PageId) {
    match store.page_blocks(page).await {
        Ok(blocks) => match blocks.into_iter().next() {
            Some(first) => gate.on_change(ChangeEvent::block_saved(vec![first])),
            None => trace!("Page {} has no blocks", page),
        },
        Err(e) => error!("Failed to read page {}: {}", page, e),
    }
}
