//! # GraphWatch Fetch
//!
//! Polls the read endpoints the rules consume and caches the result:
//! - **Endpoints**: network subgraph (allocations, totals, account) and the
//!   indexer status endpoint (deployment health), behind trait seams
//! - **Fetcher**: one consistent snapshot per fetch; health statuses are
//!   batched, issued with bounded concurrency, and retried per batch
//! - **Cache**: minimum freshness window plus coalescing, so every rule timer
//!   can ask for data without duplicating in-flight fetches

pub mod cache;
pub mod endpoints;
pub mod fetcher;

pub use cache::{CacheStats, DataCache};
pub use endpoints::{HttpNetworkEndpoint, HttpStatusEndpoint, NetworkEndpoint, StatusEndpoint};
pub use fetcher::{FetchLimits, FetcherStats, SnapshotFetcher};

/// Result type for fetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from snapshot fetching
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("endpoint request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed endpoint response: {0}")]
    Malformed(String),
}
