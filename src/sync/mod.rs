//! Sync coordination
//!
//! Serializes syncs per source through a named TTL lock and drives batch
//! syncs across every registered source. The coordinator owns one
//! `ReviewFetcher` for its lifetime: across a batch only the proxy index
//! carries over between sources, everything else is reset.

pub mod lock;

pub use lock::{LockBackend, SyncLock};

use std::time::Duration;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::scrape::ReviewFetcher;
use crate::store::{materializer, Store};
use crate::types::Source;

/// Per-source result of a batch sync
pub struct BatchOutcome {
    pub source_id: i64,
    pub result: Result<Source, SyncError>,
}

/// Coordinates fetch + materialization under per-source locks
pub struct SyncCoordinator {
    store: Store,
    fetcher: ReviewFetcher,
    lock: SyncLock,
    lock_ttl: Duration,
    between_sources_delay: Duration,
}

impl SyncCoordinator {
    /// Build a coordinator; the lock backend follows `sync.redis_url`
    pub fn new(store: Store, config: EngineConfig) -> Result<Self, SyncError> {
        let lock = match &config.sync.redis_url {
            Some(url) => SyncLock::redis(url)?,
            None => SyncLock::in_memory(),
        };
        Ok(Self::with_lock(store, config, lock))
    }

    /// Build with an explicit lock backend
    pub fn with_lock(store: Store, config: EngineConfig, lock: SyncLock) -> Self {
        let lock_ttl = Duration::from_secs(config.sync.lock_ttl_secs);
        let between_sources_delay = Duration::from_millis(config.sync.between_sources_delay_ms);
        Self {
            store,
            fetcher: ReviewFetcher::new(config),
            lock,
            lock_ttl,
            between_sources_delay,
        }
    }

    /// Full sync: replace the source's stored reviews with a fresh fetch
    pub async fn sync_reviews(&mut self, source: &Source) -> Result<Source, SyncError> {
        self.locked_sync(source, false).await
    }

    /// Incremental sync: add reviews the store has not seen yet
    pub async fn sync_new_reviews(&mut self, source: &Source) -> Result<Source, SyncError> {
        self.locked_sync(source, true).await
    }

    /// Sync every registered source in sequence, rotating the outbound
    /// proxy and resetting the session between sources
    pub async fn sync_all_sources(&mut self, incremental: bool) -> Vec<BatchOutcome> {
        let sources = match self.store.sources().await {
            Ok(sources) => sources,
            Err(e) => {
                warn!("batch sync could not list sources: {}", e);
                return Vec::new();
            }
        };

        info!(
            "batch sync over {} sources (incremental: {})",
            sources.len(),
            incremental
        );

        let mut outcomes = Vec::with_capacity(sources.len());
        let last_index = sources.len().saturating_sub(1);
        for (index, source) in sources.into_iter().enumerate() {
            let result = if incremental {
                self.sync_new_reviews(&source).await
            } else {
                self.sync_reviews(&source).await
            };
            if let Err(e) = &result {
                warn!(source_id = source.id, "batch sync entry failed: {}", e);
            }
            outcomes.push(BatchOutcome {
                source_id: source.id,
                result,
            });

            if index < last_index {
                self.fetcher.rotate_proxy();
                self.fetcher.reset_session();
                tokio::time::sleep(self.between_sources_delay).await;
            }
        }
        outcomes
    }

    async fn locked_sync(&mut self, source: &Source, incremental: bool) -> Result<Source, SyncError> {
        let key = lock_key(source.id);
        if !self.lock.acquire(&key, self.lock_ttl).await? {
            return Err(SyncError::AlreadyRunning);
        }

        let result = if incremental {
            materializer::sync_new_reviews(&self.store, &mut self.fetcher, source).await
        } else {
            materializer::sync_reviews(&self.store, &mut self.fetcher, source).await
        };

        // Released on every exit path, success or not
        if let Err(e) = self.lock.release(&key).await {
            warn!("failed to release {}: {}", key, e);
        }
        result
    }
}

fn lock_key(source_id: i64) -> String {
    format!("sync_source_{source_id}")
}
