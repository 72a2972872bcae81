//! Notification engine: one evaluation pass in, incident mutations and
//! outbound batches out.
//!
//! Ordering within a cycle is fixed: incident create/update happens before
//! delivery queuing, which happens before history recording, which happens
//! before auto-resolution. Auto-resolution sees the fired keys of every rule
//! evaluated in the pass.

use crate::channel::{BatchContext, ChannelFactory, FilterSummary};
use crate::events::{IncidentEvent, IncidentEventKind};
use crate::{Error, Result};
use chrono::Utc;
use graphwatch_core::{
    rule_group_key, target_key_for, ChannelConfig, HistoryRecord, Incident, IncidentPatch,
    IncidentStatus, Notification, PreviousState, RuleConfig, Snapshot,
};
use graphwatch_rules::format::{render_table, TableRow};
use graphwatch_rules::{build_rule, RuleContext};
use graphwatch_store::{FiredKeys, IncidentStore};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Setting key holding the fallback channel for rules with none configured
pub const DEFAULT_CHANNEL_SETTING: &str = "defaultChannelId";

/// Counters from one evaluation pass
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub rules_evaluated: usize,
    pub findings: usize,
    pub incidents_created: usize,
    pub incidents_updated: usize,
    pub notifications_sent: usize,
    pub auto_resolved: usize,
}

/// Outcome of a no-side-effect test run
#[derive(Debug, Clone)]
pub struct TestRunReport {
    pub triggered: bool,
    pub notification_count: usize,
    pub sent: bool,
    pub filter_summary: Option<String>,
}

struct QueuedDelivery {
    notification: Notification,
    incident_id: String,
    channel_ids: Vec<String>,
}

/// Orchestrates rule evaluation, incident reconciliation and delivery
pub struct NotificationEngine {
    store: Arc<dyn IncidentStore>,
    factory: Arc<dyn ChannelFactory>,
    events: broadcast::Sender<IncidentEvent>,
}

impl NotificationEngine {
    pub fn new(store: Arc<dyn IncidentStore>, factory: Arc<dyn ChannelFactory>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            factory,
            events,
        }
    }

    /// Subscribe to incident lifecycle events (server-push stream)
    pub fn subscribe(&self) -> broadcast::Receiver<IncidentEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn IncidentStore> {
        &self.store
    }

    fn emit(&self, kind: IncidentEventKind, incident: &Incident) {
        // No receivers is fine; the stream is best-effort.
        let _ = self.events.send(IncidentEvent::for_incident(kind, incident));
    }

    /// Evaluate the given rules against one snapshot and reconcile incidents.
    pub async fn run_cycle(
        &self,
        rule_configs: &[RuleConfig],
        snapshot: &Snapshot,
        previous: Option<&PreviousState>,
    ) -> Result<CycleReport> {
        let channels = self.store.get_channels()?;
        let default_channel = self.store.get_setting(DEFAULT_CHANNEL_SETTING)?;
        let mut report = CycleReport::default();
        let mut fired = FiredKeys::new();
        let mut evaluated_rule_ids = Vec::new();
        let mut queued: Vec<QueuedDelivery> = Vec::new();
        let mut rule_names: HashMap<String, String> = HashMap::new();

        for rule_config in rule_configs.iter().filter(|r| r.enabled) {
            let rule = match build_rule(&rule_config.rule_type) {
                Some(rule) => rule,
                None => {
                    tracing::warn!(
                        "rule {:?} has unknown type {:?}, skipping",
                        rule_config.name,
                        rule_config.rule_type
                    );
                    continue;
                }
            };
            evaluated_rule_ids.push(rule_config.id.clone());
            rule_names.insert(rule_config.id.clone(), rule_config.name.clone());
            report.rules_evaluated += 1;

            let outcome = rule.evaluate(&RuleContext {
                rule: rule_config,
                snapshot,
                previous,
            });
            report.findings += outcome.notifications.len();

            let keyed: Vec<(String, Notification)> = if rule_config.group_incidents {
                // One rule-scoped incident per cycle, however many findings.
                match collapse_findings(rule_config, outcome.notifications) {
                    Some(notification) => {
                        vec![(rule_group_key(&rule_config.id), notification)]
                    }
                    None => Vec::new(),
                }
            } else {
                outcome
                    .notifications
                    .into_iter()
                    .map(|n| (target_key_for(&rule_config.id, &n.metadata), n))
                    .collect()
            };

            for (target_key, notification) in keyed {
                fired.insert((rule_config.id.clone(), target_key.clone()));
                let channel_ids =
                    resolve_channel_ids(rule_config, &channels, default_channel.as_deref());

                match self
                    .store
                    .get_active_incident(&rule_config.id, &target_key)?
                {
                    None => {
                        let mut incident =
                            Incident::open_from(&notification, rule_config, target_key);
                        incident.channel_ids = channel_ids.clone();
                        self.store.create_incident(&incident)?;
                        self.emit(IncidentEventKind::Created, &incident);
                        report.incidents_created += 1;
                        if channel_ids.is_empty() {
                            // Incident tracking must not depend on notification
                            // configuration; skip delivery only.
                            tracing::debug!(
                                "rule {:?} resolves to no channel, incident kept without delivery",
                                rule_config.name
                            );
                        } else {
                            queued.push(QueuedDelivery {
                                notification,
                                incident_id: incident.id,
                                channel_ids,
                            });
                        }
                    }
                    Some(existing) if existing.status == IncidentStatus::Acknowledged => {
                        // Acknowledged incidents are silenced until they clear.
                        let mut patch = IncidentPatch::refire(&existing, &notification);
                        patch.channel_ids = Some(channel_ids);
                        self.store.update_incident(&existing.id, &patch)?;
                        if let Some(updated) = self.store.get_incident_by_id(&existing.id)? {
                            self.emit(IncidentEventKind::Updated, &updated);
                        }
                        report.incidents_updated += 1;
                    }
                    Some(existing) => {
                        // Re-notification on every fire is deliberate: the
                        // problem persists.
                        let mut patch = IncidentPatch::refire(&existing, &notification);
                        patch.channel_ids = Some(channel_ids.clone());
                        self.store.update_incident(&existing.id, &patch)?;
                        if let Some(updated) = self.store.get_incident_by_id(&existing.id)? {
                            self.emit(IncidentEventKind::Updated, &updated);
                        }
                        report.incidents_updated += 1;
                        if !channel_ids.is_empty() {
                            queued.push(QueuedDelivery {
                                notification,
                                incident_id: existing.id,
                                channel_ids,
                            });
                        }
                    }
                }
            }
        }

        report.notifications_sent = self
            .deliver_batches(&queued, &channels, &rule_names)
            .await;

        let now = Utc::now();
        for delivery in &queued {
            self.store.add_history(&HistoryRecord::from_notification(
                &delivery.notification,
                Some(delivery.incident_id.clone()),
                delivery.channel_ids.clone(),
                false,
            ))?;
            self.store.update_incident(
                &delivery.incident_id,
                &IncidentPatch {
                    last_notified_at: Some(now),
                    ..Default::default()
                },
            )?;
        }

        let resolved = self
            .store
            .auto_resolve_incidents(&fired, &evaluated_rule_ids)?;
        for id in &resolved.resolved_ids {
            if let Some(incident) = self.store.get_incident_by_id(id)? {
                self.emit(IncidentEventKind::AutoResolved, &incident);
            }
        }
        report.auto_resolved = resolved.count;

        Ok(report)
    }

    /// Batch queued notifications per channel and deliver. A failure on one
    /// channel never blocks the others; failed batches are logged and retried
    /// only on the rules' next natural fire.
    async fn deliver_batches(
        &self,
        queued: &[QueuedDelivery],
        channels: &[ChannelConfig],
        rule_names: &HashMap<String, String>,
    ) -> usize {
        let mut per_channel: HashMap<&str, Vec<&QueuedDelivery>> = HashMap::new();
        for delivery in queued {
            for channel_id in &delivery.channel_ids {
                per_channel.entry(channel_id).or_default().push(delivery);
            }
        }

        let ctx = BatchContext {
            rule_names: rule_names.clone(),
            filter_summaries: Vec::new(),
        };

        let mut sent = 0;
        for (channel_id, deliveries) in per_channel {
            let config = match channels.iter().find(|c| c.id == channel_id && c.enabled) {
                Some(config) => config,
                None => continue,
            };
            let channel = match self.factory.build(config) {
                Ok(channel) => channel,
                Err(e) => {
                    tracing::warn!("channel {:?} skipped: {e}", config.name);
                    continue;
                }
            };
            let batch: Vec<Notification> =
                deliveries.iter().map(|d| d.notification.clone()).collect();
            match channel.send_batch(&batch, &ctx).await {
                Ok(()) => sent += batch.len(),
                Err(e) => {
                    tracing::error!("delivery to channel {:?} failed: {e}", config.name);
                }
            }
        }
        sent
    }

    /// Run one rule end to end - evaluation and delivery - without touching
    /// the incident store. History records are tagged as test records.
    pub async fn test_rule(
        &self,
        rule_config: &RuleConfig,
        snapshot: &Snapshot,
        previous: Option<&PreviousState>,
    ) -> Result<TestRunReport> {
        let rule = build_rule(&rule_config.rule_type)
            .ok_or_else(|| Error::UnknownRule(rule_config.rule_type.clone()))?;
        let outcome = rule.evaluate(&RuleContext {
            rule: rule_config,
            snapshot,
            previous,
        });

        let channels = self.store.get_channels()?;
        let default_channel = self.store.get_setting(DEFAULT_CHANNEL_SETTING)?;
        let channel_ids = resolve_channel_ids(rule_config, &channels, default_channel.as_deref());

        let mut sent = false;
        if !outcome.notifications.is_empty() && !channel_ids.is_empty() {
            let ctx = BatchContext {
                rule_names: HashMap::from([(rule_config.id.clone(), rule_config.name.clone())]),
                filter_summaries: outcome
                    .filter_summary
                    .iter()
                    .map(|s| FilterSummary {
                        rule_name: rule_config.name.clone(),
                        summary: s.clone(),
                    })
                    .collect(),
            };
            for channel_id in &channel_ids {
                let config = match channels.iter().find(|c| &c.id == channel_id && c.enabled) {
                    Some(config) => config,
                    None => continue,
                };
                let channel = match self.factory.build(config) {
                    Ok(channel) => channel,
                    Err(e) => {
                        tracing::warn!("channel {:?} skipped: {e}", config.name);
                        continue;
                    }
                };
                if let Err(e) = channel.send_batch(&outcome.notifications, &ctx).await {
                    tracing::error!("test delivery to channel {:?} failed: {e}", config.name);
                } else {
                    sent = true;
                }
            }
            for notification in &outcome.notifications {
                self.store.add_history(&HistoryRecord::from_notification(
                    notification,
                    None,
                    channel_ids.clone(),
                    true,
                ))?;
            }
        }

        Ok(TestRunReport {
            triggered: outcome.triggered,
            notification_count: outcome.notifications.len(),
            sent,
            filter_summary: outcome.filter_summary,
        })
    }

    /// User action: silence an open incident until it clears
    pub fn acknowledge_incident(&self, id: &str) -> Result<Incident> {
        self.transition(id, IncidentStatus::Acknowledged, IncidentEventKind::Acknowledged)
    }

    /// User action: close an incident by hand
    pub fn resolve_incident(&self, id: &str) -> Result<Incident> {
        self.transition(id, IncidentStatus::Resolved, IncidentEventKind::Resolved)
    }

    fn transition(
        &self,
        id: &str,
        status: IncidentStatus,
        kind: IncidentEventKind,
    ) -> Result<Incident> {
        let patch = IncidentPatch {
            status: Some(status),
            resolved_at: (status == IncidentStatus::Resolved).then(Utc::now),
            ..Default::default()
        };
        self.store.update_incident(id, &patch)?;
        let incident = self
            .store
            .get_incident_by_id(id)?
            .ok_or_else(|| Error::Store(graphwatch_store::Error::NotFound(id.to_string())))?;
        self.emit(kind, &incident);
        Ok(incident)
    }
}

/// Channels a rule's findings go to: its own list filtered to enabled
/// channels, else the configured default channel.
fn resolve_channel_ids(
    rule: &RuleConfig,
    channels: &[ChannelConfig],
    default_channel: Option<&str>,
) -> Vec<String> {
    let enabled: HashSet<&str> = channels
        .iter()
        .filter(|c| c.enabled)
        .map(|c| c.id.as_str())
        .collect();
    match &rule.channel_ids {
        Some(ids) if !ids.is_empty() => ids
            .iter()
            .filter(|id| enabled.contains(id.as_str()))
            .cloned()
            .collect(),
        _ => default_channel
            .filter(|id| enabled.contains(id))
            .map(|id| vec![id.to_string()])
            .unwrap_or_default(),
    }
}

/// Collapse a grouped rule's findings into one synthetic notification with
/// the worst severity of the group. Per-entity detail survives in metadata.
fn collapse_findings(
    rule: &RuleConfig,
    notifications: Vec<Notification>,
) -> Option<Notification> {
    if notifications.is_empty() {
        return None;
    }
    if notifications.len() == 1 {
        return notifications.into_iter().next();
    }

    let severity = notifications
        .iter()
        .map(|n| n.severity)
        .max()
        .unwrap_or(graphwatch_core::Severity::Info);

    let rows: Vec<TableRow> = notifications
        .iter()
        .map(|n| {
            TableRow::new(
                n.target_label(),
                n.severity.as_str(),
                n.title.clone(),
            )
        })
        .collect();
    let table = render_table(("Target", "Severity", "Finding"), &rows);

    let mut subgraphs = Vec::new();
    let mut allocations = Vec::new();
    for n in &notifications {
        if let Some(list) = n.metadata.get("subgraphs").and_then(|v| v.as_array()) {
            subgraphs.extend(list.clone());
        }
        if let Some(list) = n.metadata.get("allocations").and_then(|v| v.as_array()) {
            allocations.extend(list.clone());
        }
    }

    let count = notifications.len();
    Some(
        Notification::new(
            &rule.id,
            format!("{}: {count} findings", rule.name),
            table,
            severity,
        )
        .with_metadata(json!({
            "grouped": true,
            "count": count,
            "subgraphs": subgraphs,
            "allocations": allocations,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use async_trait::async_trait;
    use chrono::Utc;
    use graphwatch_core::{
        Allocation, DeploymentHealth, HealthStatus, NetworkTotals, Severity,
    };
    use graphwatch_store::MemoryStore;
    use std::sync::Mutex;

    struct RecordingChannel {
        id: String,
        batches: Arc<Mutex<Vec<Vec<Notification>>>>,
        fail: bool,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn id(&self) -> &str {
            &self.id
        }

        async fn send_batch(
            &self,
            notifications: &[Notification],
            _ctx: &BatchContext,
        ) -> Result<()> {
            if self.fail {
                return Err(Error::Delivery("wired to fail".to_string()));
            }
            self.batches.lock().unwrap().push(notifications.to_vec());
            Ok(())
        }
    }

    struct RecordingFactory {
        batches: Arc<Mutex<Vec<Vec<Notification>>>>,
        failing_ids: Vec<String>,
    }

    impl ChannelFactory for RecordingFactory {
        fn build(&self, config: &ChannelConfig) -> Result<Arc<dyn Channel>> {
            Ok(Arc::new(RecordingChannel {
                id: config.id.clone(),
                batches: self.batches.clone(),
                fail: self.failing_ids.contains(&config.id),
            }))
        }
    }

    fn channel_config(id: &str) -> ChannelConfig {
        ChannelConfig {
            id: id.to_string(),
            name: format!("channel-{id}"),
            channel_type: "webhook".to_string(),
            enabled: true,
            config: serde_json::json!({ "webhookUrl": "https://discord.com/api/webhooks/1/t" }),
        }
    }

    fn zero_signal_alloc(id: &str) -> Allocation {
        Allocation {
            id: id.to_string(),
            subgraph_name: format!("subgraph-{id}"),
            subgraph_deployment: format!("Qm{id}"),
            allocated_tokens: "1000000000000000000000".to_string(),
            signalled_tokens: "0".to_string(),
            created_at_epoch: 1,
            created_at: Utc::now(),
        }
    }

    fn snapshot(allocations: Vec<Allocation>) -> Snapshot {
        Snapshot {
            allocations,
            network: NetworkTotals::default(),
            account: None,
            health: None,
            fetched_at: Utc::now(),
        }
    }

    struct Harness {
        engine: NotificationEngine,
        store: Arc<MemoryStore>,
        batches: Arc<Mutex<Vec<Vec<Notification>>>>,
        rule: RuleConfig,
    }

    fn harness(failing_ids: Vec<String>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        store.save_channels(&[channel_config("chan-1")]).unwrap();
        store
            .set_setting(DEFAULT_CHANNEL_SETTING, "chan-1")
            .unwrap();
        let batches = Arc::new(Mutex::new(Vec::new()));
        let factory = Arc::new(RecordingFactory {
            batches: batches.clone(),
            failing_ids,
        });
        let engine = NotificationEngine::new(store.clone(), factory);
        let rule = RuleConfig::new("signal drop", "signal-drop");
        Harness {
            engine,
            store,
            batches,
            rule,
        }
    }

    #[tokio::test]
    async fn repeated_fires_dedup_into_one_incident() {
        let h = harness(Vec::new());
        let snapshot = snapshot(vec![zero_signal_alloc("0x1")]);
        for _ in 0..3 {
            h.engine
                .run_cycle(std::slice::from_ref(&h.rule), &snapshot, None)
                .await
                .unwrap();
        }
        let incidents = h.store.get_incidents(None, 100, 0).unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].occurrence_count, 3);
        assert_eq!(incidents[0].status, IncidentStatus::Open);
        // Open incidents re-notify on every fire.
        assert_eq!(h.batches.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn cleared_condition_auto_resolves() {
        let h = harness(Vec::new());
        let firing = snapshot(vec![zero_signal_alloc("0x1")]);
        h.engine
            .run_cycle(std::slice::from_ref(&h.rule), &firing, None)
            .await
            .unwrap();

        let cleared = snapshot(Vec::new());
        let report = h
            .engine
            .run_cycle(std::slice::from_ref(&h.rule), &cleared, None)
            .await
            .unwrap();
        assert_eq!(report.auto_resolved, 1);

        let incident = &h.store.get_incidents(None, 100, 0).unwrap()[0];
        assert_eq!(incident.status, IncidentStatus::Resolved);
        assert!(incident.resolved_at.is_some());
    }

    #[tokio::test]
    async fn disabled_rule_never_auto_resolves_its_incidents() {
        let h = harness(Vec::new());
        let firing = snapshot(vec![zero_signal_alloc("0x1")]);
        h.engine
            .run_cycle(std::slice::from_ref(&h.rule), &firing, None)
            .await
            .unwrap();

        let mut disabled = h.rule.clone();
        disabled.enabled = false;
        let cleared = snapshot(Vec::new());
        let report = h
            .engine
            .run_cycle(std::slice::from_ref(&disabled), &cleared, None)
            .await
            .unwrap();
        assert_eq!(report.auto_resolved, 0);
        assert_eq!(
            h.store.get_incidents(None, 100, 0).unwrap()[0].status,
            IncidentStatus::Open
        );
    }

    #[tokio::test]
    async fn acknowledged_incident_updates_but_stays_silent() {
        let h = harness(Vec::new());
        let firing = snapshot(vec![zero_signal_alloc("0x1")]);
        h.engine
            .run_cycle(std::slice::from_ref(&h.rule), &firing, None)
            .await
            .unwrap();
        let incident_id = h.store.get_incidents(None, 100, 0).unwrap()[0].id.clone();
        h.engine.acknowledge_incident(&incident_id).unwrap();
        let history_before = h.store.get_history(100).unwrap().len();

        h.engine
            .run_cycle(std::slice::from_ref(&h.rule), &firing, None)
            .await
            .unwrap();

        let incident = h.store.get_incident_by_id(&incident_id).unwrap().unwrap();
        assert_eq!(incident.status, IncidentStatus::Acknowledged);
        assert_eq!(incident.occurrence_count, 2);
        // Zero new history records while acknowledged.
        assert_eq!(h.store.get_history(100).unwrap().len(), history_before);
    }

    #[tokio::test]
    async fn shared_deployment_fires_once_per_cycle() {
        let h = harness(Vec::new());
        let rule = RuleConfig::new("stale failures", "deployment-failed-stale");

        // Two allocations on the same failed deployment: one condition.
        let mut first = zero_signal_alloc("0x1");
        first.subgraph_name = "uniswap".to_string();
        first.subgraph_deployment = "QmShared".to_string();
        let mut second = zero_signal_alloc("0x2");
        second.subgraph_name = "uniswap".to_string();
        second.subgraph_deployment = "QmShared".to_string();
        let mut firing = snapshot(vec![first, second]);
        let mut health = HashMap::new();
        health.insert(
            "QmShared".to_string(),
            DeploymentHealth {
                deployment: "QmShared".to_string(),
                health: HealthStatus::Failed,
                synced: true,
                fatal_error: None,
                latest_block: Some(10),
                chain_head_block: Some(10),
            },
        );
        firing.health = Some(health);

        h.engine
            .run_cycle(std::slice::from_ref(&rule), &firing, None)
            .await
            .unwrap();

        let incidents = h.store.get_incidents(None, 100, 0).unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].occurrence_count, 1);
        let batches = h.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[tokio::test]
    async fn grouped_rule_collapses_to_one_rule_scoped_incident() {
        let h = harness(Vec::new());
        let mut rule = h.rule.clone();
        rule.group_incidents = true;
        let firing = snapshot(vec![zero_signal_alloc("0x1"), zero_signal_alloc("0x2")]);
        h.engine
            .run_cycle(std::slice::from_ref(&rule), &firing, None)
            .await
            .unwrap();

        let incidents = h.store.get_incidents(None, 100, 0).unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].target_key, rule_group_key(&rule.id));
        assert_eq!(incidents[0].metadata["count"], 2);
        assert_eq!(
            incidents[0].metadata["allocations"].as_array().unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn no_resolvable_channel_still_persists_the_incident() {
        let h = harness(Vec::new());
        h.store.save_channels(&[]).unwrap();
        let firing = snapshot(vec![zero_signal_alloc("0x1")]);
        let report = h
            .engine
            .run_cycle(std::slice::from_ref(&h.rule), &firing, None)
            .await
            .unwrap();
        assert_eq!(report.incidents_created, 1);
        assert_eq!(report.notifications_sent, 0);
        assert_eq!(h.store.get_incidents(None, 100, 0).unwrap().len(), 1);
        assert!(h.store.get_history(100).unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_block_the_other() {
        let h = harness(vec!["chan-bad".to_string()]);
        h.store
            .save_channels(&[channel_config("chan-1"), channel_config("chan-bad")])
            .unwrap();
        let mut rule = h.rule.clone();
        rule.channel_ids = Some(vec!["chan-1".to_string(), "chan-bad".to_string()]);

        let firing = snapshot(vec![zero_signal_alloc("0x1")]);
        let report = h
            .engine
            .run_cycle(std::slice::from_ref(&rule), &firing, None)
            .await
            .unwrap();

        // chan-1 got its batch, chan-bad failed, the cycle completed.
        assert_eq!(h.batches.lock().unwrap().len(), 1);
        assert_eq!(report.incidents_created, 1);
        // History still records the queued (notification, channel-set).
        let history = h.store.get_history(100).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].channel_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_rule_mutates_nothing_but_records_test_history() {
        let h = harness(Vec::new());
        let firing = snapshot(vec![zero_signal_alloc("0x1")]);
        let report = h.engine.test_rule(&h.rule, &firing, None).await.unwrap();

        assert!(report.triggered);
        assert_eq!(report.notification_count, 1);
        assert!(report.sent);
        assert!(report.filter_summary.is_some());

        assert!(h.store.get_incidents(None, 100, 0).unwrap().is_empty());
        let history = h.store.get_history(100).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_test);
        assert!(history[0].incident_id.is_none());
    }

    #[tokio::test]
    async fn lifecycle_events_are_broadcast() {
        let h = harness(Vec::new());
        let mut events = h.engine.subscribe();
        let firing = snapshot(vec![zero_signal_alloc("0x1")]);
        h.engine
            .run_cycle(std::slice::from_ref(&h.rule), &firing, None)
            .await
            .unwrap();
        let created = events.recv().await.unwrap();
        assert_eq!(created.kind, IncidentEventKind::Created);
        assert_eq!(created.severity, Severity::Warning);

        let cleared = snapshot(Vec::new());
        h.engine
            .run_cycle(std::slice::from_ref(&h.rule), &cleared, None)
            .await
            .unwrap();
        let resolved = events.recv().await.unwrap();
        assert_eq!(resolved.kind, IncidentEventKind::AutoResolved);
    }
}
