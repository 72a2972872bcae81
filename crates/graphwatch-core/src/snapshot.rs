//! In-memory snapshot of polled network state.
//!
//! One fetch cycle produces one `Snapshot`; every rule evaluated in that cycle
//! sees the same bundle, never a mix of two fetches. Token amounts cross the
//! wire as decimal strings of base units (1e18 per whole token) and stay
//! strings until a rule needs arithmetic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An indexer's stake commitment to a subgraph deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub id: String,
    pub subgraph_name: String,
    /// IPFS hash of the subgraph deployment
    pub subgraph_deployment: String,
    pub allocated_tokens: String,
    /// Signal on the deployment at fetch time
    pub signalled_tokens: String,
    pub created_at_epoch: u64,
    pub created_at: DateTime<Utc>,
}

/// Network-wide totals for proportion math
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkTotals {
    pub total_tokens_signalled: String,
    pub total_tokens_allocated: String,
    pub current_epoch: u64,
}

/// Indexer account state from the network subgraph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerAccount {
    pub id: String,
    pub staked_tokens: String,
    pub allocated_tokens: String,
    /// Can go negative when allocations exceed stake after slashing
    pub available_stake: String,
}

/// Sync/failure status of one deployment as reported by its indexing node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentHealth {
    pub deployment: String,
    pub health: HealthStatus,
    pub synced: bool,
    pub fatal_error: Option<FatalError>,
    pub latest_block: Option<u64>,
    pub chain_head_block: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Failed,
}

/// Fatal indexing error reported by the node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FatalError {
    pub message: String,
    pub deterministic: bool,
    pub block_number: Option<u64>,
}

/// Failure category driving remediation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCategory {
    /// Reproducible at a specific block; rewinding does not help
    Deterministic,
    /// Transient or environmental; retry may clear it
    Nondeterministic,
    /// Failed but synced to chain head; clearable with a shallow rewind
    Stale,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::Nondeterministic => "nondeterministic",
            Self::Stale => "stale",
        }
    }
}

/// Classify a failed deployment.
///
/// Priority order: a fatal error's own deterministic flag wins; no fatal error
/// but synced to chain head means stale; anything else is nondeterministic.
pub fn classify_failure(health: &DeploymentHealth) -> FailureCategory {
    match &health.fatal_error {
        Some(fatal) if fatal.deterministic => FailureCategory::Deterministic,
        Some(_) => FailureCategory::Nondeterministic,
        None if health.synced => FailureCategory::Stale,
        None => FailureCategory::Nondeterministic,
    }
}

/// Parse a base-unit decimal string into whole tokens.
///
/// Lossy (f64) on purpose: thresholds are human-scale, not accounting values.
/// Returns `None` on malformed input rather than guessing.
pub fn parse_tokens(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: f64 = digits.parse().ok()?;
    let tokens = value / 1e18;
    Some(if negative { -tokens } else { tokens })
}

/// One fetch cycle's consistent bundle of data fed to all rules in that cycle
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub allocations: Vec<Allocation>,
    pub network: NetworkTotals,
    /// Present only when the account endpoint returned data
    pub account: Option<IndexerAccount>,
    /// Keyed by deployment hash; absent when no status endpoint is resolvable.
    /// Best-effort: batches that exhausted retries are simply missing.
    pub health: Option<HashMap<String, DeploymentHealth>>,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn health_for(&self, deployment: &str) -> Option<&DeploymentHealth> {
        self.health.as_ref()?.get(deployment)
    }
}

/// The slice of a snapshot retained across cycles for redeployment detection:
/// deployment hash per subgraph name, overwritten after every full pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreviousState {
    pub deployments: HashMap<String, String>,
}

impl PreviousState {
    pub fn capture(snapshot: &Snapshot) -> Self {
        let mut deployments = HashMap::new();
        for alloc in &snapshot.allocations {
            deployments.insert(
                alloc.subgraph_name.clone(),
                alloc.subgraph_deployment.clone(),
            );
        }
        Self { deployments }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(fatal: Option<FatalError>, synced: bool) -> DeploymentHealth {
        DeploymentHealth {
            deployment: "Qmdeploy".to_string(),
            health: HealthStatus::Failed,
            synced,
            fatal_error: fatal,
            latest_block: None,
            chain_head_block: None,
        }
    }

    #[test]
    fn deterministic_fatal_error_wins_over_sync_state() {
        let h = health(
            Some(FatalError {
                message: "bad handler".to_string(),
                deterministic: true,
                block_number: Some(100),
            }),
            false,
        );
        assert_eq!(classify_failure(&h), FailureCategory::Deterministic);
    }

    #[test]
    fn no_fatal_error_and_synced_is_stale() {
        let h = health(None, true);
        assert_eq!(classify_failure(&h), FailureCategory::Stale);
    }

    #[test]
    fn nondeterministic_fatal_error() {
        let h = health(
            Some(FatalError {
                message: "store timeout".to_string(),
                deterministic: false,
                block_number: None,
            }),
            true,
        );
        assert_eq!(classify_failure(&h), FailureCategory::Nondeterministic);
    }

    #[test]
    fn no_fatal_error_and_not_synced_is_nondeterministic() {
        let h = health(None, false);
        assert_eq!(classify_failure(&h), FailureCategory::Nondeterministic);
    }

    #[test]
    fn parse_tokens_handles_zero_and_negatives() {
        assert_eq!(parse_tokens("0"), Some(0.0));
        assert_eq!(parse_tokens("1000000000000000000"), Some(1.0));
        assert_eq!(parse_tokens("-2000000000000000000"), Some(-2.0));
        assert_eq!(parse_tokens("12.5"), None);
        assert_eq!(parse_tokens(""), None);
    }
}
