//! Incidents, rule/channel configuration, and notification history.

use crate::notification::{Notification, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A configured detection rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    pub id: String,
    pub name: String,
    /// Type tag selecting the detector implementation
    #[serde(rename = "type")]
    pub rule_type: String,
    pub enabled: bool,
    /// Detector-specific thresholds; opaque to everything but the detector
    #[serde(default)]
    pub conditions: serde_json::Value,
    /// Falls back to the global polling interval when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling_interval_minutes: Option<u64>,
    /// Channels this rule may notify; empty/None means the default channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_ids: Option<Vec<String>>,
    /// Collapse all findings in one cycle into a single rule-scoped incident
    #[serde(default)]
    pub group_incidents: bool,
}

impl RuleConfig {
    pub fn new(name: impl Into<String>, rule_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            rule_type: rule_type.into(),
            enabled: true,
            conditions: serde_json::Value::Null,
            polling_interval_minutes: None,
            channel_ids: None,
            group_incidents: false,
        }
    }
}

/// A configured notification channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub id: String,
    pub name: String,
    /// Type tag selecting the channel implementation
    #[serde(rename = "type")]
    pub channel_type: String,
    pub enabled: bool,
    /// Holds the destination secret (webhook URL); never echoed unmasked
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ChannelConfig {
    /// Copy of `config` safe to return to callers: secret-bearing string
    /// fields keep only a short prefix.
    pub fn masked_config(&self) -> serde_json::Value {
        match &self.config {
            serde_json::Value::Object(map) => {
                let mut masked = serde_json::Map::new();
                for (key, value) in map {
                    // Keys arrive camelCase from the dashboard (webhookUrl,
                    // botToken); match case-insensitively.
                    let key_lower = key.to_ascii_lowercase();
                    let is_secret = key_lower.contains("url") || key_lower.contains("token");
                    match value {
                        serde_json::Value::String(s) if is_secret => {
                            let prefix: String = s.chars().take(24).collect();
                            masked.insert(key.clone(), format!("{prefix}…").into());
                        }
                        other => {
                            masked.insert(key.clone(), other.clone());
                        }
                    }
                }
                serde_json::Value::Object(masked)
            }
            other => other.clone(),
        }
    }
}

/// Incident lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "acknowledged" => Self::Acknowledged,
            "resolved" => Self::Resolved,
            _ => Self::Open,
        }
    }

    /// Open and acknowledged incidents are "active": they block creation of a
    /// second incident for the same (rule, target) pair.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deduplicated, stateful record of a rule condition being true for a target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub target_key: String,
    /// Short human label for the target (subgraph name, allocation id)
    pub target_label: String,
    pub status: IncidentStatus,
    pub severity: Severity,
    pub auto_resolve: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Incremented every cycle the same target re-fires
    pub occurrence_count: u64,
    /// Latest finding; overwritten on each re-fire, history is not
    pub title: String,
    pub message: String,
    pub metadata: serde_json::Value,
    /// Channels resolved at last evaluation
    pub channel_ids: Vec<String>,
}

impl Incident {
    /// Build a fresh open incident from a notification's first fire
    pub fn open_from(notification: &Notification, rule: &RuleConfig, target_key: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            target_key,
            target_label: notification.target_label(),
            status: IncidentStatus::Open,
            severity: notification.severity,
            auto_resolve: true,
            first_seen: now,
            last_seen: now,
            last_notified_at: None,
            resolved_at: None,
            occurrence_count: 1,
            title: notification.title.clone(),
            message: notification.message.clone(),
            metadata: notification.metadata.clone(),
            channel_ids: Vec::new(),
        }
    }
}

/// Partial update applied to an incident; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct IncidentPatch {
    pub status: Option<IncidentStatus>,
    pub severity: Option<Severity>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub occurrence_count: Option<u64>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub channel_ids: Option<Vec<String>>,
}

impl IncidentPatch {
    /// Bookkeeping update for a re-fire of an existing incident
    pub fn refire(incident: &Incident, notification: &Notification) -> Self {
        Self {
            severity: Some(notification.severity),
            last_seen: Some(Utc::now()),
            occurrence_count: Some(incident.occurrence_count + 1),
            title: Some(notification.title.clone()),
            message: Some(notification.message.clone()),
            metadata: Some(notification.metadata.clone()),
            ..Default::default()
        }
    }

    pub fn apply(&self, incident: &mut Incident) {
        if let Some(status) = self.status {
            incident.status = status;
        }
        if let Some(severity) = self.severity {
            incident.severity = severity;
        }
        if let Some(last_seen) = self.last_seen {
            incident.last_seen = last_seen;
        }
        if let Some(last_notified_at) = self.last_notified_at {
            incident.last_notified_at = Some(last_notified_at);
        }
        if let Some(resolved_at) = self.resolved_at {
            incident.resolved_at = Some(resolved_at);
        }
        if let Some(count) = self.occurrence_count {
            incident.occurrence_count = count;
        }
        if let Some(title) = &self.title {
            incident.title = title.clone();
        }
        if let Some(message) = &self.message {
            incident.message = message.clone();
        }
        if let Some(metadata) = &self.metadata {
            incident.metadata = metadata.clone();
        }
        if let Some(channel_ids) = &self.channel_ids {
            incident.channel_ids = channel_ids.clone();
        }
    }
}

/// Append-only log entry: one per notification actually sent (or attempted)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    /// Nullable: test runs are not tied to an incident
    pub incident_id: Option<String>,
    pub rule_id: String,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub metadata: serde_json::Value,
    pub channel_ids: Vec<String>,
    pub sent_at: DateTime<Utc>,
    /// Set on records created by a no-side-effect test run
    pub is_test: bool,
}

impl HistoryRecord {
    pub fn from_notification(
        notification: &Notification,
        incident_id: Option<String>,
        channel_ids: Vec<String>,
        is_test: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            incident_id,
            rule_id: notification.rule_id.clone(),
            title: notification.title.clone(),
            message: notification.message.clone(),
            severity: notification.severity,
            metadata: notification.metadata.clone(),
            channel_ids,
            sent_at: Utc::now(),
            is_test,
        }
    }
}
