//! Shared data cache.
//!
//! Every enabled rule's timer can fire independently and all of them want the
//! same snapshot, so refreshes are coalesced: a snapshot younger than the
//! minimum freshness window is returned as-is, and concurrent refreshers
//! serialize through one lock with a freshness re-check on the far side, so N
//! overlapping calls trigger exactly one underlying fetch. The snapshot is
//! swapped in whole; readers never observe a partial update.

use crate::fetcher::SnapshotFetcher;
use crate::Result;
use chrono::Utc;
use graphwatch_core::Snapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Cache counters, surfaced on the dashboard
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub refreshes: u64,
    pub cache_hits: u64,
    /// Calls that waited on another caller's fetch instead of starting one
    pub coalesced: u64,
}

/// Memoizes the latest snapshot for a minimum freshness window
pub struct DataCache {
    fetcher: SnapshotFetcher,
    min_freshness: Duration,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    refresh_lock: Mutex<()>,
    stats: RwLock<CacheStats>,
}

impl DataCache {
    pub fn new(fetcher: SnapshotFetcher, min_freshness: Duration) -> Self {
        Self {
            fetcher,
            min_freshness,
            snapshot: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Latest snapshot without fetching, whatever its age
    pub async fn current(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.read().await.clone()
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }

    /// Return a snapshot no older than the freshness window, fetching if
    /// needed. Concurrent callers share one in-flight fetch.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.fresh_snapshot().await {
            self.stats.write().await.cache_hits += 1;
            return Ok(snapshot);
        }

        let _guard = self.refresh_lock.lock().await;

        // Someone else may have refreshed while we waited for the lock.
        if let Some(snapshot) = self.fresh_snapshot().await {
            self.stats.write().await.coalesced += 1;
            return Ok(snapshot);
        }

        let snapshot = Arc::new(self.fetcher.fetch().await?);
        *self.snapshot.write().await = Some(snapshot.clone());
        self.stats.write().await.refreshes += 1;
        Ok(snapshot)
    }

    async fn fresh_snapshot(&self) -> Option<Arc<Snapshot>> {
        let snapshot = self.snapshot.read().await.clone()?;
        let age = Utc::now().signed_duration_since(snapshot.fetched_at);
        let window = chrono::Duration::from_std(self.min_freshness).ok()?;
        if age < window {
            Some(snapshot)
        } else {
            None
        }
    }
}
