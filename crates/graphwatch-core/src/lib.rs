//! # GraphWatch Core
//!
//! Domain model shared by the GraphWatch monitoring engine:
//! - **Incidents**: deduplicated, stateful records of a rule condition being true
//! - **Notifications**: the outbound wire payload handed to channels
//! - **Snapshots**: one fetch cycle's consistent bundle of network data
//! - **Target keys**: the identity an incident is deduplicated against

pub mod incident;
pub mod notification;
pub mod snapshot;
pub mod target;

pub use incident::{
    ChannelConfig, HistoryRecord, Incident, IncidentPatch, IncidentStatus, RuleConfig,
};
pub use notification::{Notification, Severity};
pub use snapshot::{
    classify_failure, parse_tokens, Allocation, DeploymentHealth, FailureCategory, FatalError,
    HealthStatus, IndexerAccount, NetworkTotals, PreviousState, Snapshot,
};
pub use target::{allocation_key, deployment_key, rule_group_key, target_key_for};

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from core domain operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("parse error: {0}")]
    Parse(String),
}
