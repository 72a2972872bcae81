//! # GraphWatch Rules
//!
//! Pure detectors over a snapshot. Every rule maps one snapshot (plus its
//! opaque conditions bag) to zero or more notifications; no hidden state, no
//! I/O. Two shapes exist:
//! - **Per-entity** rules scan the allocation list and key findings to
//!   individual allocations or subgraphs
//! - **Deployment-health** rules need the optional health map and report
//!   not-triggered when it is absent, since health data is best-effort

pub mod conditions;
pub mod format;
pub mod registry;
pub mod rules;

pub use registry::{build_rule, RuleKind};

use graphwatch_core::{Notification, PreviousState, RuleConfig, Snapshot};

/// Everything a rule evaluation may look at
pub struct RuleContext<'a> {
    pub rule: &'a RuleConfig,
    pub snapshot: &'a Snapshot,
    /// Prior cycle's deployment-per-subgraph slice, for redeployment diffing
    pub previous: Option<&'a PreviousState>,
}

/// Result of one rule evaluation
#[derive(Debug, Default)]
pub struct RuleOutcome {
    pub triggered: bool,
    pub notifications: Vec<Notification>,
    /// Human summary of what was scanned and filtered, for test runs
    pub filter_summary: Option<String>,
}

impl RuleOutcome {
    pub fn not_triggered() -> Self {
        Self::default()
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.filter_summary = Some(summary.into());
        self
    }

    pub fn from_notifications(notifications: Vec<Notification>) -> Self {
        Self {
            triggered: !notifications.is_empty(),
            notifications,
            filter_summary: None,
        }
    }
}

/// A detection rule. Implementations are pure with respect to the context.
pub trait Rule: Send + Sync {
    fn kind(&self) -> RuleKind;
    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome;
}
