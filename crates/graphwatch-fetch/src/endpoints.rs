//! Read-endpoint seams and their HTTP implementations.
//!
//! Query construction against the indexing network lives behind these traits;
//! the fetcher and cache only ever see domain types. The HTTP implementations
//! post JSON to configured URLs with a construction-time request timeout, so a
//! hung endpoint surfaces as a timeout error, never a stalled cycle.

use crate::{Error, Result};
use async_trait::async_trait;
use graphwatch_core::{Allocation, DeploymentHealth, IndexerAccount, NetworkTotals};
use serde::Deserialize;
use std::time::Duration;

/// Network subgraph reads: allocations, network totals, indexer account
#[async_trait]
pub trait NetworkEndpoint: Send + Sync {
    async fn fetch_allocations(&self) -> Result<Vec<Allocation>>;
    async fn fetch_network_totals(&self) -> Result<NetworkTotals>;
    /// `None` when the account is unknown to the network subgraph
    async fn fetch_indexer_account(&self) -> Result<Option<IndexerAccount>>;
}

/// Indexer status endpoint: deployment health, one batch per call
#[async_trait]
pub trait StatusEndpoint: Send + Sync {
    /// `None` when no status endpoint is resolvable; health fetching is
    /// skipped entirely and health rules degrade to not-triggered.
    fn endpoint_url(&self) -> Option<&str>;

    async fn fetch_health_batch(&self, deployments: &[String]) -> Result<Vec<DeploymentHealth>>;
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

async fn post_json<T: for<'de> Deserialize<'de>>(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<T> {
    let response = client.post(url).json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| Error::Malformed(e.to_string()))
}

/// Network subgraph over HTTP
pub struct HttpNetworkEndpoint {
    client: reqwest::Client,
    url: String,
    indexer_address: String,
}

#[derive(Deserialize)]
struct AllocationsResponse {
    allocations: Vec<Allocation>,
}

#[derive(Deserialize)]
struct TotalsResponse {
    network: NetworkTotals,
}

#[derive(Deserialize)]
struct AccountResponse {
    indexer: Option<IndexerAccount>,
}

impl HttpNetworkEndpoint {
    pub fn new(url: impl Into<String>, indexer_address: impl Into<String>) -> Self {
        Self {
            client: build_client(Duration::from_secs(30)),
            url: url.into(),
            indexer_address: indexer_address.into(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }
}

#[async_trait]
impl NetworkEndpoint for HttpNetworkEndpoint {
    async fn fetch_allocations(&self) -> Result<Vec<Allocation>> {
        let body = serde_json::json!({
            "entity": "allocations",
            "indexer": self.indexer_address,
            "status": "Active",
        });
        let response: AllocationsResponse = post_json(&self.client, &self.url, &body).await?;
        Ok(response.allocations)
    }

    async fn fetch_network_totals(&self) -> Result<NetworkTotals> {
        let body = serde_json::json!({ "entity": "network" });
        let response: TotalsResponse = post_json(&self.client, &self.url, &body).await?;
        Ok(response.network)
    }

    async fn fetch_indexer_account(&self) -> Result<Option<IndexerAccount>> {
        let body = serde_json::json!({
            "entity": "indexer",
            "id": self.indexer_address,
        });
        let response: AccountResponse = post_json(&self.client, &self.url, &body).await?;
        Ok(response.indexer)
    }
}

/// Indexer status endpoint over HTTP
pub struct HttpStatusEndpoint {
    client: reqwest::Client,
    url: Option<String>,
}

#[derive(Deserialize)]
struct HealthResponse {
    #[serde(rename = "indexingStatuses")]
    indexing_statuses: Vec<DeploymentHealth>,
}

impl HttpStatusEndpoint {
    /// `url: None` models an unresolvable status endpoint
    pub fn new(url: Option<String>) -> Self {
        Self {
            client: build_client(Duration::from_secs(30)),
            url,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }
}

#[async_trait]
impl StatusEndpoint for HttpStatusEndpoint {
    fn endpoint_url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    async fn fetch_health_batch(&self, deployments: &[String]) -> Result<Vec<DeploymentHealth>> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| Error::Malformed("no status endpoint configured".to_string()))?;
        let body = serde_json::json!({ "deployments": deployments });
        let response: HealthResponse = post_json(&self.client, url, &body).await?;
        Ok(response.indexing_statuses)
    }
}
