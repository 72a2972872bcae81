//! Incident lifecycle events, broadcast for the dashboard's server-push stream.

use chrono::{DateTime, Utc};
use graphwatch_core::{Incident, IncidentStatus, Severity};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncidentEventKind {
    Created,
    Updated,
    Acknowledged,
    Resolved,
    AutoResolved,
}

impl fmt::Display for IncidentEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "incident:created",
            Self::Updated => "incident:updated",
            Self::Acknowledged => "incident:acknowledged",
            Self::Resolved => "incident:resolved",
            Self::AutoResolved => "incident:auto-resolved",
        };
        f.write_str(name)
    }
}

/// One server-push event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentEvent {
    #[serde(skip)]
    pub kind: IncidentEventKind,
    pub incident_id: String,
    pub rule_id: String,
    pub status: IncidentStatus,
    pub severity: Severity,
    pub target_label: String,
    pub title: String,
    pub timestamp: DateTime<Utc>,
}

impl IncidentEvent {
    pub fn for_incident(kind: IncidentEventKind, incident: &Incident) -> Self {
        Self {
            kind,
            incident_id: incident.id.clone(),
            rule_id: incident.rule_id.clone(),
            status: incident.status,
            severity: incident.severity,
            target_label: incident.target_label.clone(),
            title: incident.title.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_the_stream_contract() {
        assert_eq!(IncidentEventKind::Created.to_string(), "incident:created");
        assert_eq!(
            IncidentEventKind::AutoResolved.to_string(),
            "incident:auto-resolved"
        );
    }
}
