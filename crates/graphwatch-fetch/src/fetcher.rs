//! Snapshot fetcher.
//!
//! One call produces one consistent `Snapshot`: allocations, network totals
//! and account data are pulled concurrently, then deployment health is fetched
//! in hash-batches sized to stay under a request-size ceiling. Batches run
//! with bounded concurrency; a failed batch is retried on its own up to a cap
//! and, if it keeps failing, its deployments are simply absent from the health
//! map rather than failing the whole cycle.

use crate::endpoints::{NetworkEndpoint, StatusEndpoint};
use crate::Result;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use graphwatch_core::{DeploymentHealth, Snapshot};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Caps for the batched health fetch
#[derive(Debug, Clone)]
pub struct FetchLimits {
    /// Request-size ceiling per health batch, in bytes of hash payload
    pub max_batch_bytes: usize,
    /// Health batches in flight at once
    pub max_concurrency: usize,
    /// Attempts per batch before its deployments are dropped for the cycle
    pub max_batch_retries: u32,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_batch_bytes: 4096,
            max_concurrency: 4,
            max_batch_retries: 3,
        }
    }
}

/// Fetch statistics, surfaced on the dashboard
#[derive(Debug, Clone, Default)]
pub struct FetcherStats {
    pub snapshots_fetched: u64,
    pub health_batches_sent: u64,
    pub health_batches_failed: u64,
    pub health_batch_retries: u64,
}

/// Pulls one consistent snapshot from the configured endpoints
pub struct SnapshotFetcher {
    network: Arc<dyn NetworkEndpoint>,
    status: Arc<dyn StatusEndpoint>,
    limits: FetchLimits,
    stats: Arc<RwLock<FetcherStats>>,
}

impl SnapshotFetcher {
    pub fn new(network: Arc<dyn NetworkEndpoint>, status: Arc<dyn StatusEndpoint>) -> Self {
        Self {
            network,
            status,
            limits: FetchLimits::default(),
            stats: Arc::new(RwLock::new(FetcherStats::default())),
        }
    }

    pub fn limits(mut self, limits: FetchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub async fn stats(&self) -> FetcherStats {
        self.stats.read().await.clone()
    }

    /// Fetch a full snapshot. Health is best-effort: skipped when no status
    /// endpoint is resolvable, partial when batches exhaust their retries.
    pub async fn fetch(&self) -> Result<Snapshot> {
        let (allocations, network, account) = tokio::try_join!(
            self.network.fetch_allocations(),
            self.network.fetch_network_totals(),
            self.network.fetch_indexer_account(),
        )?;

        let health = if self.status.endpoint_url().is_some() {
            let mut deployments: Vec<String> = allocations
                .iter()
                .map(|a| a.subgraph_deployment.clone())
                .collect();
            deployments.sort();
            deployments.dedup();
            Some(self.fetch_health(deployments).await)
        } else {
            tracing::debug!("no status endpoint resolvable, skipping health fetch");
            None
        };

        self.stats.write().await.snapshots_fetched += 1;

        Ok(Snapshot {
            allocations,
            network,
            account,
            health,
            fetched_at: Utc::now(),
        })
    }

    async fn fetch_health(&self, deployments: Vec<String>) -> HashMap<String, DeploymentHealth> {
        let batches = chunk_by_bytes(deployments, self.limits.max_batch_bytes);
        let mut health = HashMap::new();

        let mut in_flight = FuturesUnordered::new();
        let mut pending = batches.into_iter();
        loop {
            while in_flight.len() < self.limits.max_concurrency {
                match pending.next() {
                    Some(batch) => in_flight.push(self.fetch_batch_with_retry(batch)),
                    None => break,
                }
            }
            match in_flight.next().await {
                Some(Some(statuses)) => {
                    for status in statuses {
                        health.insert(status.deployment.clone(), status);
                    }
                }
                Some(None) => {} // batch gave up; its deployments stay absent
                None => break,
            }
        }

        health
    }

    async fn fetch_batch_with_retry(&self, batch: Vec<String>) -> Option<Vec<DeploymentHealth>> {
        let mut last_error = None;
        for attempt in 0..self.limits.max_batch_retries {
            if attempt > 0 {
                self.stats.write().await.health_batch_retries += 1;
                tokio::time::sleep(std::time::Duration::from_millis(500 * attempt as u64)).await;
            }
            self.stats.write().await.health_batches_sent += 1;
            match self.status.fetch_health_batch(&batch).await {
                Ok(statuses) => return Some(statuses),
                Err(e) => last_error = Some(e),
            }
        }

        self.stats.write().await.health_batches_failed += 1;
        tracing::warn!(
            "health batch of {} deployments failed after {} attempts: {:?}",
            batch.len(),
            self.limits.max_batch_retries,
            last_error
        );
        None
    }
}

/// Greedily pack hashes into batches whose joined payload stays under the
/// byte ceiling. A single oversized hash still gets its own batch.
fn chunk_by_bytes(items: Vec<String>, max_bytes: usize) -> Vec<Vec<String>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes = 0;
    for item in items {
        let cost = item.len() + 3; // quotes and comma in the JSON array
        if !current.is_empty() && current_bytes + cost > max_bytes {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += cost;
        current.push(item);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::{NetworkEndpoint, StatusEndpoint};
    use crate::Error;
    use async_trait::async_trait;
    use graphwatch_core::{Allocation, HealthStatus, IndexerAccount, NetworkTotals};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn allocation(id: &str, deployment: &str) -> Allocation {
        Allocation {
            id: id.to_string(),
            subgraph_name: format!("subgraph-{id}"),
            subgraph_deployment: deployment.to_string(),
            allocated_tokens: "1000000000000000000".to_string(),
            signalled_tokens: "1000000000000000000".to_string(),
            created_at_epoch: 1,
            created_at: Utc::now(),
        }
    }

    struct FakeNetwork;

    #[async_trait]
    impl NetworkEndpoint for FakeNetwork {
        async fn fetch_allocations(&self) -> Result<Vec<Allocation>> {
            Ok(vec![
                allocation("0x1", "Qmaaa"),
                allocation("0x2", "Qmbbb"),
                allocation("0x3", "Qmaaa"),
            ])
        }

        async fn fetch_network_totals(&self) -> Result<NetworkTotals> {
            Ok(NetworkTotals::default())
        }

        async fn fetch_indexer_account(&self) -> Result<Option<IndexerAccount>> {
            Ok(None)
        }
    }

    struct FakeStatus {
        url: Option<String>,
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl FakeStatus {
        fn healthy(deployment: &str) -> DeploymentHealth {
            DeploymentHealth {
                deployment: deployment.to_string(),
                health: HealthStatus::Healthy,
                synced: true,
                fatal_error: None,
                latest_block: Some(100),
                chain_head_block: Some(100),
            }
        }
    }

    #[async_trait]
    impl StatusEndpoint for FakeStatus {
        fn endpoint_url(&self) -> Option<&str> {
            self.url.as_deref()
        }

        async fn fetch_health_batch(
            &self,
            deployments: &[String],
        ) -> Result<Vec<DeploymentHealth>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(Error::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(deployments.iter().map(|d| Self::healthy(d)).collect())
        }
    }

    #[test]
    fn chunking_respects_byte_ceiling() {
        let items: Vec<String> = (0..10).map(|i| format!("Qm{i:0>44}")).collect();
        let batches = chunk_by_bytes(items.clone(), 100);
        assert!(batches.len() > 1);
        for batch in &batches {
            let bytes: usize = batch.iter().map(|i| i.len() + 3).sum();
            assert!(bytes <= 100 || batch.len() == 1);
        }
        let total: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(total, items.len());
    }

    #[tokio::test]
    async fn no_status_endpoint_means_no_health_map() {
        let fetcher = SnapshotFetcher::new(
            Arc::new(FakeNetwork),
            Arc::new(FakeStatus {
                url: None,
                calls: AtomicUsize::new(0),
                fail_first: 0,
            }),
        );
        let snapshot = fetcher.fetch().await.unwrap();
        assert!(snapshot.health.is_none());
        assert_eq!(snapshot.allocations.len(), 3);
    }

    #[tokio::test]
    async fn health_is_fetched_for_deduplicated_deployments() {
        let status = Arc::new(FakeStatus {
            url: Some("http://localhost:8030".to_string()),
            calls: AtomicUsize::new(0),
            fail_first: 0,
        });
        let fetcher = SnapshotFetcher::new(Arc::new(FakeNetwork), status);
        let snapshot = fetcher.fetch().await.unwrap();
        let health = snapshot.health.unwrap();
        // Qmaaa appears on two allocations but is fetched once.
        assert_eq!(health.len(), 2);
        assert!(health.contains_key("Qmaaa"));
        assert!(health.contains_key("Qmbbb"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_is_retried_then_succeeds() {
        let status = Arc::new(FakeStatus {
            url: Some("http://localhost:8030".to_string()),
            calls: AtomicUsize::new(0),
            fail_first: 2,
        });
        let fetcher = SnapshotFetcher::new(Arc::new(FakeNetwork), status.clone()).limits(
            FetchLimits {
                max_batch_bytes: 4096,
                max_concurrency: 2,
                max_batch_retries: 3,
            },
        );
        let snapshot = fetcher.fetch().await.unwrap();
        assert_eq!(snapshot.health.unwrap().len(), 2);
        let stats = fetcher.stats().await;
        assert_eq!(stats.health_batch_retries, 2);
        assert_eq!(stats.health_batches_failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_batch_is_absent_not_fatal() {
        let status = Arc::new(FakeStatus {
            url: Some("http://localhost:8030".to_string()),
            calls: AtomicUsize::new(0),
            fail_first: 100,
        });
        let fetcher = SnapshotFetcher::new(Arc::new(FakeNetwork), status).limits(FetchLimits {
            max_batch_bytes: 4096,
            max_concurrency: 2,
            max_batch_retries: 2,
        });
        let snapshot = fetcher.fetch().await.unwrap();
        // The cycle still produced a snapshot; the health map is just empty.
        assert_eq!(snapshot.health.unwrap().len(), 0);
        let stats = fetcher.stats().await;
        assert_eq!(stats.health_batches_failed, 1);
    }
}
