//! # GraphWatch Store
//!
//! Durable records behind the notification engine: rules, channels, incidents,
//! notification history and settings. The engine consumes the narrow
//! [`IncidentStore`] trait; `SqliteStore` is the bundled implementation and
//! `MemoryStore` mirrors its semantics for tests.
//!
//! The trait is synchronous on purpose: store access happens between network
//! awaits and must never suspend mid-incident-mutation.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use graphwatch_core::{
    ChannelConfig, HistoryRecord, Incident, IncidentPatch, IncidentStatus, RuleConfig,
};
use std::collections::HashSet;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Fired (rule id, target key) pairs accumulated over one evaluation pass
pub type FiredKeys = HashSet<(String, String)>;

/// Outcome of one auto-resolution sweep
#[derive(Debug, Clone, Default)]
pub struct AutoResolveOutcome {
    pub count: usize,
    pub resolved_ids: Vec<String>,
}

/// Narrow persistence interface consumed by the notification engine.
///
/// Per-record atomicity is the implementation's job; the engine guarantees no
/// two logical evaluations race to create the same (rule, target) incident
/// within one process.
pub trait IncidentStore: Send + Sync {
    fn get_rules(&self) -> Result<Vec<RuleConfig>>;
    fn save_rules(&self, rules: &[RuleConfig]) -> Result<()>;

    fn get_channels(&self) -> Result<Vec<ChannelConfig>>;
    fn save_channels(&self, channels: &[ChannelConfig]) -> Result<()>;

    fn create_incident(&self, incident: &Incident) -> Result<()>;
    fn update_incident(&self, id: &str, patch: &IncidentPatch) -> Result<()>;
    fn get_incidents(
        &self,
        status: Option<IncidentStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Incident>>;
    fn get_incident_by_id(&self, id: &str) -> Result<Option<Incident>>;
    /// The single open-or-acknowledged incident for a (rule, target) pair
    fn get_active_incident(&self, rule_id: &str, target_key: &str) -> Result<Option<Incident>>;
    /// Resolve open auto-resolve incidents of enabled rules whose key did not
    /// fire this pass. Disabled rules never auto-resolve.
    fn auto_resolve_incidents(
        &self,
        fired_keys: &FiredKeys,
        enabled_rule_ids: &[String],
    ) -> Result<AutoResolveOutcome>;

    fn add_history(&self, record: &HistoryRecord) -> Result<()>;
    fn get_history(&self, limit: usize) -> Result<Vec<HistoryRecord>>;

    fn get_setting(&self, key: &str) -> Result<Option<String>>;
    fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}
