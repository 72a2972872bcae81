//! In-memory incident store mirroring `SqliteStore` semantics, used by engine
//! and scheduler tests.

use crate::{AutoResolveOutcome, Error, FiredKeys, IncidentStore, Result};
use chrono::Utc;
use graphwatch_core::{
    ChannelConfig, HistoryRecord, Incident, IncidentPatch, IncidentStatus, RuleConfig,
};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    rules: Vec<RuleConfig>,
    channels: Vec<ChannelConfig>,
    incidents: Vec<Incident>,
    history: Vec<HistoryRecord>,
    settings: std::collections::HashMap<String, String>,
}

/// HashMap-backed store for tests
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IncidentStore for MemoryStore {
    fn get_rules(&self) -> Result<Vec<RuleConfig>> {
        Ok(self.inner.lock().unwrap().rules.clone())
    }

    fn save_rules(&self, rules: &[RuleConfig]) -> Result<()> {
        self.inner.lock().unwrap().rules = rules.to_vec();
        Ok(())
    }

    fn get_channels(&self) -> Result<Vec<ChannelConfig>> {
        Ok(self.inner.lock().unwrap().channels.clone())
    }

    fn save_channels(&self, channels: &[ChannelConfig]) -> Result<()> {
        self.inner.lock().unwrap().channels = channels.to_vec();
        Ok(())
    }

    fn create_incident(&self, incident: &Incident) -> Result<()> {
        self.inner.lock().unwrap().incidents.push(incident.clone());
        Ok(())
    }

    fn update_incident(&self, id: &str, patch: &IncidentPatch) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let incident = inner
            .incidents
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        patch.apply(incident);
        Ok(())
    }

    fn get_incidents(
        &self,
        status: Option<IncidentStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Incident>> {
        let inner = self.inner.lock().unwrap();
        let mut matched: Vec<Incident> = inner
            .incidents
            .iter()
            .filter(|i| status.map_or(true, |s| i.status == s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    fn get_incident_by_id(&self, id: &str) -> Result<Option<Incident>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.incidents.iter().find(|i| i.id == id).cloned())
    }

    fn get_active_incident(&self, rule_id: &str, target_key: &str) -> Result<Option<Incident>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .incidents
            .iter()
            .find(|i| i.rule_id == rule_id && i.target_key == target_key && i.status.is_active())
            .cloned())
    }

    fn auto_resolve_incidents(
        &self,
        fired_keys: &FiredKeys,
        enabled_rule_ids: &[String],
    ) -> Result<AutoResolveOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let mut resolved_ids = Vec::new();
        for incident in inner.incidents.iter_mut() {
            if incident.status != IncidentStatus::Open || !incident.auto_resolve {
                continue;
            }
            if !enabled_rule_ids.contains(&incident.rule_id) {
                continue;
            }
            let key = (incident.rule_id.clone(), incident.target_key.clone());
            if fired_keys.contains(&key) {
                continue;
            }
            incident.status = IncidentStatus::Resolved;
            incident.resolved_at = Some(now);
            resolved_ids.push(incident.id.clone());
        }
        Ok(AutoResolveOutcome {
            count: resolved_ids.len(),
            resolved_ids,
        })
    }

    fn add_history(&self, record: &HistoryRecord) -> Result<()> {
        self.inner.lock().unwrap().history.push(record.clone());
        Ok(())
    }

    fn get_history(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut records = inner.history.clone();
        records.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        records.truncate(limit);
        Ok(records)
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().unwrap().settings.get(key).cloned())
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphwatch_core::{Notification, Severity};

    #[test]
    fn memory_store_matches_active_lookup_semantics() {
        let store = MemoryStore::new();
        let rule = RuleConfig::new("duration", "allocation-duration");
        let notification = Notification::new(&rule.id, "t", "m", Severity::Info);
        let incident = Incident::open_from(&notification, &rule, "alloc:0x9".to_string());
        store.create_incident(&incident).unwrap();

        assert!(store
            .get_active_incident(&rule.id, "alloc:0x9")
            .unwrap()
            .is_some());
        assert!(store
            .get_active_incident(&rule.id, "alloc:0x8")
            .unwrap()
            .is_none());
    }
}
