//! # GraphWatch Engine
//!
//! Turns rule evaluations into incident mutations and outbound notifications:
//! - **Engine**: dedup/merge findings into incidents, route to channels,
//!   record history, auto-resolve cleared incidents
//! - **Channels**: webhook delivery with digesting, rate-limit-aware retries
//!   and a destination allow-list
//! - **Scheduler**: one timer per enabled rule over a shared, coalesced data
//!   cache, with manual evaluate/test entry points
//!
//! Nothing in here may crash the host process: every failure path degrades to
//! "this cycle did less".

pub mod channel;
pub mod config;
pub mod engine;
pub mod events;
pub mod remediation;
pub mod scheduler;
pub mod webhook;

pub use channel::{BatchContext, Channel, ChannelFactory, FilterSummary};
pub use config::EngineConfig;
pub use engine::{CycleReport, NotificationEngine, TestRunReport};
pub use events::{IncidentEvent, IncidentEventKind};
pub use remediation::{build_fix_plan, FixCommand, FixPlan};
pub use scheduler::RuleScheduler;
pub use webhook::{validate_webhook_url, WebhookChannel};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the notification engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] graphwatch_store::Error),

    #[error("fetch error: {0}")]
    Fetch(#[from] graphwatch_fetch::Error),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("invalid webhook destination: {0}")]
    DisallowedDestination(String),

    #[error("unknown rule: {0}")]
    UnknownRule(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
