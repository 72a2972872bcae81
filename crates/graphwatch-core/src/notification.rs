//! Outbound notification payload.
//!
//! The shape handed to channels is a wire contract: downstream remediation
//! tooling parses `metadata.subgraphs` / `metadata.allocations` back out of
//! delivered payloads, so field names are fixed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Notification severity, ordered so the worst of a group can be picked
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "critical" => Self::Critical,
            "warning" => Self::Warning,
            _ => Self::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbound notification, produced by a rule evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "ruleId")]
    pub rule_id: String,
    /// Structured per-entity detail; `subgraphs` and `allocations` keys are
    /// parsed by remediation tooling and must keep their field shapes.
    pub metadata: serde_json::Value,
}

impl Notification {
    pub fn new(
        rule_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            timestamp: Utc::now(),
            rule_id: rule_id.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Short human label for the entity this notification is about
    pub fn target_label(&self) -> String {
        let meta = &self.metadata;
        if let Some(name) = meta.get("subgraphName").and_then(|v| v.as_str()) {
            return name.to_string();
        }
        if let Some(id) = meta.get("allocationId").and_then(|v| v.as_str()) {
            return id.to_string();
        }
        self.title.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_worst_last() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn severity_serializes_lowercase() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }

    #[test]
    fn notification_wire_shape_uses_rule_id_camel_case() {
        let n = Notification::new("rule-1", "t", "m", Severity::Warning);
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["ruleId"], "rule-1");
        assert_eq!(value["severity"], "warning");
        assert!(value.get("rule_id").is_none());
    }
}
