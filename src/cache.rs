//! Bounded, time-expiring memo of file creation times.
//!
//! Lookups that miss share a single in-flight resolution per file: the first
//! caller starts it, everyone arriving before it finishes awaits the same
//! shared future. Only successes are stored.

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, trace, warn};
use lru::LruCache;
use tokio::time::Instant;

use crate::{CreationSource, FileId, HistoryResult};

/// Default number of cached files
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default lifetime of a cached value
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

type Pending = Shared<BoxFuture<'static, HistoryResult<i64>>>;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    created_at_millis: i64,
    expires_at: Instant,
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct TimestampCache {
    source: Arc<dyn CreationSource>,
    entries: Mutex<LruCache<FileId, CacheEntry>>,
    in_flight: Mutex<HashMap<FileId, Pending>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TimestampCache {
    /// Cache with the default capacity (1000) and lifetime (24h)
    pub fn new(source: Arc<dyn CreationSource>) -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self::with_limits(source, capacity, DEFAULT_TTL)
    }

    pub fn with_limits(source: Arc<dyn CreationSource>, capacity: NonZeroUsize, ttl: Duration) -> Self {
        debug!("Creating timestamp cache: capacity={}, ttl={:?}", capacity, ttl);
        Self {
            source,
            entries: Mutex::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creation time of `file_id` in epoch milliseconds.
    ///
    /// Failures are returned to every caller that shared the attempt and are
    /// not remembered, so the next call tries again.
    pub async fn resolve(&self, file_id: FileId) -> HistoryResult<i64> {
        if let Some(value) = self.lookup(file_id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        let pending = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            // A resolution may have finished between the lookup above and taking the lock
            if let Some(value) = self.lookup(file_id) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            in_flight
                .entry(file_id)
                .or_insert_with(|| {
                    trace!("Starting creation time lookup for file {}", file_id);
                    let source = Arc::clone(&self.source);
                    async move { source.creation_time(file_id).await }
                        .boxed()
                        .shared()
                })
                .clone()
        };

        let result = pending.clone().await;

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight
            .get(&file_id)
            .is_some_and(|current| current.ptr_eq(&pending))
        {
            in_flight.remove(&file_id);
            match &result {
                Ok(value) => self.store(file_id, *value),
                Err(e) => warn!("Creation time lookup for file {} failed: {}", file_id, e),
            }
        }

        result
    }

    fn lookup(&self, file_id: FileId) -> Option<i64> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&file_id) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.created_at_millis),
            Some(_) => {
                trace!("Cached creation time for file {} expired", file_id);
                entries.pop(&file_id);
                None
            }
            None => None,
        }
    }

    fn store(&self, file_id: FileId, created_at_millis: i64) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = CacheEntry {
            created_at_millis,
            expires_at: Instant::now() + self.ttl,
        };
        if let Some((evicted, _)) = entries.push(file_id, entry) {
            if evicted != file_id {
                trace!("Evicted file {} from timestamp cache", evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HistoryError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Counts calls; optionally fails, optionally waits for a release signal.
    struct FakeSource {
        calls: AtomicUsize,
        fail: bool,
        gate: Option<Arc<Notify>>,
    }

    impl FakeSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: false,
                gate: None,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CreationSource for FakeSource {
        async fn creation_time(&self, file_id: FileId) -> HistoryResult<i64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                Err(HistoryError::EnvironmentUnavailable {
                    message: "git missing".to_string(),
                })
            } else {
                Ok(file_id as i64 * 1000)
            }
        }
    }

    fn cache(source: Arc<FakeSource>, capacity: usize, ttl: Duration) -> TimestampCache {
        TimestampCache::with_limits(source, NonZeroUsize::new(capacity).unwrap(), ttl)
    }

    #[tokio::test]
    async fn hit_does_not_recompute() {
        let source = FakeSource::new();
        let cache = cache(source.clone(), 10, DEFAULT_TTL);

        assert_eq!(cache.resolve(7).await, Ok(7000));
        assert_eq!(cache.resolve(7).await, Ok(7000));
        assert_eq!(source.calls(), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                entries: 1
            }
        );
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_lookup() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(FakeSource {
            calls: AtomicUsize::new(0),
            fail: false,
            gate: Some(gate.clone()),
        });
        let cache = Arc::new(cache(source.clone(), 10, DEFAULT_TTL));

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.resolve(3).await }
        });
        let second = tokio::spawn({
            let cache = cache.clone();
            async move { cache.resolve(3).await }
        });

        while source.calls() == 0 {
            tokio::task::yield_now().await;
        }
        // let the second caller reach the shared future before releasing it
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        assert_eq!(first.await.unwrap(), Ok(3000));
        assert_eq!(second.await.unwrap(), Ok(3000));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let source = Arc::new(FakeSource {
            calls: AtomicUsize::new(0),
            fail: true,
            gate: None,
        });
        let cache = cache(source.clone(), 10, DEFAULT_TTL);

        assert!(cache.resolve(1).await.is_err());
        assert!(cache.resolve(1).await.is_err());
        assert_eq!(source.calls(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn least_recently_used_is_evicted() {
        let source = FakeSource::new();
        let cache = cache(source.clone(), 2, DEFAULT_TTL);

        cache.resolve(1).await.unwrap();
        cache.resolve(2).await.unwrap();
        cache.resolve(1).await.unwrap(); // 2 is now least recent
        cache.resolve(3).await.unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(source.calls(), 3);

        cache.resolve(1).await.unwrap();
        assert_eq!(source.calls(), 3);
        cache.resolve(2).await.unwrap();
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let source = FakeSource::new();
        let cache = cache(source.clone(), 10, Duration::from_secs(60));

        cache.resolve(5).await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        cache.resolve(5).await.unwrap();
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.resolve(5).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn default_limits() {
        let cache = TimestampCache::new(FakeSource::new());
        assert_eq!(
            cache.entries.lock().unwrap().cap().get(),
            DEFAULT_CAPACITY
        );
        assert_eq!(cache.ttl, DEFAULT_TTL);
    }
}
