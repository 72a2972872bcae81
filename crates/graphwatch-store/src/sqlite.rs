//! SQLite-backed incident store.
//!
//! Opaque bags (conditions, channel config, metadata) live in JSON text
//! columns; incidents get real columns for the hot lookups
//! (`get_active_incident`, auto-resolution).

use crate::{AutoResolveOutcome, Error, FiredKeys, IncidentStore, Result};
use chrono::{DateTime, Utc};
use graphwatch_core::{
    ChannelConfig, HistoryRecord, Incident, IncidentPatch, IncidentStatus, RuleConfig, Severity,
};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rules (
    id     TEXT PRIMARY KEY,
    config TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS channels (
    id     TEXT PRIMARY KEY,
    config TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS incidents (
    id               TEXT PRIMARY KEY,
    rule_id          TEXT NOT NULL,
    rule_name        TEXT NOT NULL,
    target_key       TEXT NOT NULL,
    target_label     TEXT NOT NULL,
    status           TEXT NOT NULL,
    severity         TEXT NOT NULL,
    auto_resolve     INTEGER NOT NULL DEFAULT 1,
    first_seen       TEXT NOT NULL,
    last_seen        TEXT NOT NULL,
    last_notified_at TEXT,
    resolved_at      TEXT,
    occurrence_count INTEGER NOT NULL DEFAULT 1,
    title            TEXT NOT NULL,
    message          TEXT NOT NULL,
    metadata         TEXT NOT NULL,
    channel_ids      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_incidents_active
    ON incidents(rule_id, target_key, status);
CREATE TABLE IF NOT EXISTS history (
    id          TEXT PRIMARY KEY,
    incident_id TEXT,
    rule_id     TEXT NOT NULL,
    title       TEXT NOT NULL,
    message     TEXT NOT NULL,
    severity    TEXT NOT NULL,
    metadata    TEXT NOT NULL,
    channel_ids TEXT NOT NULL,
    sent_at     TEXT NOT NULL,
    is_test     INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Incident store on a single SQLite database file
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and bootstrap the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(&s)).transpose()
}

struct IncidentRow {
    id: String,
    rule_id: String,
    rule_name: String,
    target_key: String,
    target_label: String,
    status: String,
    severity: String,
    auto_resolve: bool,
    first_seen: String,
    last_seen: String,
    last_notified_at: Option<String>,
    resolved_at: Option<String>,
    occurrence_count: u64,
    title: String,
    message: String,
    metadata: String,
    channel_ids: String,
}

const INCIDENT_COLUMNS: &str = "id, rule_id, rule_name, target_key, target_label, status, \
     severity, auto_resolve, first_seen, last_seen, last_notified_at, resolved_at, \
     occurrence_count, title, message, metadata, channel_ids";

fn read_incident_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IncidentRow> {
    Ok(IncidentRow {
        id: row.get(0)?,
        rule_id: row.get(1)?,
        rule_name: row.get(2)?,
        target_key: row.get(3)?,
        target_label: row.get(4)?,
        status: row.get(5)?,
        severity: row.get(6)?,
        auto_resolve: row.get::<_, i64>(7)? != 0,
        first_seen: row.get(8)?,
        last_seen: row.get(9)?,
        last_notified_at: row.get(10)?,
        resolved_at: row.get(11)?,
        occurrence_count: row.get::<_, i64>(12)? as u64,
        title: row.get(13)?,
        message: row.get(14)?,
        metadata: row.get(15)?,
        channel_ids: row.get(16)?,
    })
}

impl TryFrom<IncidentRow> for Incident {
    type Error = Error;

    fn try_from(row: IncidentRow) -> Result<Incident> {
        Ok(Incident {
            id: row.id,
            rule_id: row.rule_id,
            rule_name: row.rule_name,
            target_key: row.target_key,
            target_label: row.target_label,
            status: IncidentStatus::from_str_lossy(&row.status),
            severity: Severity::from_str_lossy(&row.severity),
            auto_resolve: row.auto_resolve,
            first_seen: parse_ts(&row.first_seen)?,
            last_seen: parse_ts(&row.last_seen)?,
            last_notified_at: parse_opt_ts(row.last_notified_at)?,
            resolved_at: parse_opt_ts(row.resolved_at)?,
            occurrence_count: row.occurrence_count,
            title: row.title,
            message: row.message,
            metadata: serde_json::from_str(&row.metadata)?,
            channel_ids: serde_json::from_str(&row.channel_ids)?,
        })
    }
}

impl IncidentStore for SqliteStore {
    fn get_rules(&self) -> Result<Vec<RuleConfig>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT config FROM rules")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut rules = Vec::new();
        for raw in rows {
            rules.push(serde_json::from_str(&raw?)?);
        }
        Ok(rules)
    }

    fn save_rules(&self, rules: &[RuleConfig]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM rules", [])?;
        for rule in rules {
            tx.execute(
                "INSERT INTO rules (id, config) VALUES (?1, ?2)",
                params![rule.id, serde_json::to_string(rule)?],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_channels(&self) -> Result<Vec<ChannelConfig>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT config FROM channels")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut channels = Vec::new();
        for raw in rows {
            channels.push(serde_json::from_str(&raw?)?);
        }
        Ok(channels)
    }

    fn save_channels(&self, channels: &[ChannelConfig]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM channels", [])?;
        for channel in channels {
            tx.execute(
                "INSERT INTO channels (id, config) VALUES (?1, ?2)",
                params![channel.id, serde_json::to_string(channel)?],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn create_incident(&self, incident: &Incident) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("INSERT INTO incidents ({INCIDENT_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"),
            params![
                incident.id,
                incident.rule_id,
                incident.rule_name,
                incident.target_key,
                incident.target_label,
                incident.status.as_str(),
                incident.severity.as_str(),
                incident.auto_resolve as i64,
                ts(incident.first_seen),
                ts(incident.last_seen),
                incident.last_notified_at.map(ts),
                incident.resolved_at.map(ts),
                incident.occurrence_count as i64,
                incident.title,
                incident.message,
                serde_json::to_string(&incident.metadata)?,
                serde_json::to_string(&incident.channel_ids)?,
            ],
        )?;
        Ok(())
    }

    fn update_incident(&self, id: &str, patch: &IncidentPatch) -> Result<()> {
        // Read-modify-write under one lock hold keeps the record update atomic.
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = ?1"),
                params![id],
                read_incident_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Error::NotFound(id.to_string()),
                other => Error::Database(other),
            })?;
        let mut incident = Incident::try_from(row)?;
        patch.apply(&mut incident);
        conn.execute(
            "UPDATE incidents SET status = ?2, severity = ?3, last_seen = ?4, \
                 last_notified_at = ?5, resolved_at = ?6, occurrence_count = ?7, \
                 title = ?8, message = ?9, metadata = ?10, channel_ids = ?11 \
             WHERE id = ?1",
            params![
                id,
                incident.status.as_str(),
                incident.severity.as_str(),
                ts(incident.last_seen),
                incident.last_notified_at.map(ts),
                incident.resolved_at.map(ts),
                incident.occurrence_count as i64,
                incident.title,
                incident.message,
                serde_json::to_string(&incident.metadata)?,
                serde_json::to_string(&incident.channel_ids)?,
            ],
        )?;
        Ok(())
    }

    fn get_incidents(
        &self,
        status: Option<IncidentStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Incident>> {
        let conn = self.conn.lock().unwrap();
        let mut incidents = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE status = ?1 \
                     ORDER BY last_seen DESC LIMIT ?2 OFFSET ?3"
                ))?;
                let rows = stmt.query_map(
                    params![status.as_str(), limit as i64, offset as i64],
                    read_incident_row,
                )?;
                for row in rows {
                    incidents.push(Incident::try_from(row?)?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {INCIDENT_COLUMNS} FROM incidents \
                     ORDER BY last_seen DESC LIMIT ?1 OFFSET ?2"
                ))?;
                let rows =
                    stmt.query_map(params![limit as i64, offset as i64], read_incident_row)?;
                for row in rows {
                    incidents.push(Incident::try_from(row?)?);
                }
            }
        }
        Ok(incidents)
    }

    fn get_incident_by_id(&self, id: &str) -> Result<Option<Incident>> {
        let conn = self.conn.lock().unwrap();
        let row = conn.query_row(
            &format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = ?1"),
            params![id],
            read_incident_row,
        );
        match row {
            Ok(row) => Ok(Some(Incident::try_from(row)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn get_active_incident(&self, rule_id: &str, target_key: &str) -> Result<Option<Incident>> {
        let conn = self.conn.lock().unwrap();
        let row = conn.query_row(
            &format!(
                "SELECT {INCIDENT_COLUMNS} FROM incidents \
                 WHERE rule_id = ?1 AND target_key = ?2 \
                   AND status IN ('open', 'acknowledged') \
                 ORDER BY first_seen DESC LIMIT 1"
            ),
            params![rule_id, target_key],
            read_incident_row,
        );
        match row {
            Ok(row) => Ok(Some(Incident::try_from(row)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn auto_resolve_incidents(
        &self,
        fired_keys: &FiredKeys,
        enabled_rule_ids: &[String],
    ) -> Result<AutoResolveOutcome> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, rule_id, target_key FROM incidents \
             WHERE status = 'open' AND auto_resolve = 1",
        )?;
        let candidates = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut resolved_ids = Vec::new();
        for candidate in candidates {
            let (id, rule_id, target_key) = candidate?;
            if !enabled_rule_ids.contains(&rule_id) {
                continue;
            }
            if fired_keys.contains(&(rule_id, target_key)) {
                continue;
            }
            resolved_ids.push(id);
        }
        drop(stmt);

        let now = ts(Utc::now());
        for id in &resolved_ids {
            conn.execute(
                "UPDATE incidents SET status = 'resolved', resolved_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
        }

        Ok(AutoResolveOutcome {
            count: resolved_ids.len(),
            resolved_ids,
        })
    }

    fn add_history(&self, record: &HistoryRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO history (id, incident_id, rule_id, title, message, severity, \
                 metadata, channel_ids, sent_at, is_test) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id,
                record.incident_id,
                record.rule_id,
                record.title,
                record.message,
                record.severity.as_str(),
                serde_json::to_string(&record.metadata)?,
                serde_json::to_string(&record.channel_ids)?,
                ts(record.sent_at),
                record.is_test as i64,
            ],
        )?;
        Ok(())
    }

    fn get_history(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, incident_id, rule_id, title, message, severity, metadata, \
                 channel_ids, sent_at, is_test \
             FROM history ORDER BY sent_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, i64>(9)?,
            ))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (id, incident_id, rule_id, title, message, severity, metadata, channel_ids, sent_at, is_test) =
                row?;
            records.push(HistoryRecord {
                id,
                incident_id,
                rule_id,
                title,
                message,
                severity: Severity::from_str_lossy(&severity),
                metadata: serde_json::from_str(&metadata)?,
                channel_ids: serde_json::from_str(&channel_ids)?,
                sent_at: parse_ts(&sent_at)?,
                is_test: is_test != 0,
            });
        }
        Ok(records)
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );
        match value {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphwatch_core::Notification;
    use serde_json::json;

    fn sample_rule() -> RuleConfig {
        let mut rule = RuleConfig::new("signal drop", "signal-drop");
        rule.conditions = json!({ "minAllocatedTokens": "1000" });
        rule
    }

    fn sample_incident(rule: &RuleConfig, target_key: &str) -> Incident {
        let notification = Notification::new(
            &rule.id,
            "Signal dropped to zero",
            "deployment Qm123 has zero signal",
            graphwatch_core::Severity::Warning,
        )
        .with_metadata(json!({ "allocationId": "0x1", "signalledTokens": "0" }));
        Incident::open_from(&notification, rule, target_key.to_string())
    }

    #[test]
    fn rules_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let rule = sample_rule();
        store.save_rules(std::slice::from_ref(&rule)).unwrap();
        let loaded = store.get_rules().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, rule.id);
        assert_eq!(loaded[0].conditions, rule.conditions);
    }

    #[test]
    fn active_incident_lookup_ignores_resolved() {
        let store = SqliteStore::open_in_memory().unwrap();
        let rule = sample_rule();
        let incident = sample_incident(&rule, "alloc:0x1");
        store.create_incident(&incident).unwrap();

        let active = store.get_active_incident(&rule.id, "alloc:0x1").unwrap();
        assert_eq!(active.unwrap().id, incident.id);

        store
            .update_incident(
                &incident.id,
                &IncidentPatch {
                    status: Some(IncidentStatus::Resolved),
                    resolved_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(store
            .get_active_incident(&rule.id, "alloc:0x1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn auto_resolve_skips_fired_and_disabled() {
        let store = SqliteStore::open_in_memory().unwrap();
        let rule = sample_rule();
        let fired = sample_incident(&rule, "alloc:0x1");
        let cleared = sample_incident(&rule, "alloc:0x2");
        let other_rule_incident = {
            let other = RuleConfig::new("duration", "allocation-duration");
            sample_incident(&other, "alloc:0x3")
        };
        store.create_incident(&fired).unwrap();
        store.create_incident(&cleared).unwrap();
        store.create_incident(&other_rule_incident).unwrap();

        let mut fired_keys = FiredKeys::new();
        fired_keys.insert((rule.id.clone(), "alloc:0x1".to_string()));

        // Only `rule` was evaluated this pass.
        let outcome = store
            .auto_resolve_incidents(&fired_keys, &[rule.id.clone()])
            .unwrap();
        assert_eq!(outcome.count, 1);
        assert_eq!(outcome.resolved_ids, vec![cleared.id.clone()]);

        let resolved = store.get_incident_by_id(&cleared.id).unwrap().unwrap();
        assert_eq!(resolved.status, IncidentStatus::Resolved);
        assert!(resolved.resolved_at.is_some());

        // The disabled rule's incident is untouched.
        let untouched = store
            .get_incident_by_id(&other_rule_incident.id)
            .unwrap()
            .unwrap();
        assert_eq!(untouched.status, IncidentStatus::Open);
    }

    #[test]
    fn history_round_trip_preserves_metadata() {
        let store = SqliteStore::open_in_memory().unwrap();
        let notification = Notification::new(
            "rule-1",
            "Failed deployments",
            "2 deployments failed",
            graphwatch_core::Severity::Critical,
        )
        .with_metadata(json!({
            "subgraphs": [
                { "name": "uniswap", "ipfsHash": "Qm123", "category": "stale" },
                { "name": "aave", "ipfsHash": "Qm456", "category": "deterministic" },
            ]
        }));
        let record = HistoryRecord::from_notification(
            &notification,
            Some("inc-1".to_string()),
            vec!["chan-1".to_string()],
            false,
        );
        store.add_history(&record).unwrap();

        let loaded = store.get_history(10).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].rule_id, "rule-1");
        assert_eq!(loaded[0].severity, graphwatch_core::Severity::Critical);
        assert_eq!(loaded[0].metadata, notification.metadata);
        assert_eq!(loaded[0].channel_ids, vec!["chan-1".to_string()]);
    }

    #[test]
    fn settings_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get_setting("defaultChannelId").unwrap().is_none());
        store.set_setting("defaultChannelId", "chan-1").unwrap();
        store.set_setting("defaultChannelId", "chan-2").unwrap();
        assert_eq!(
            store.get_setting("defaultChannelId").unwrap().as_deref(),
            Some("chan-2")
        );
    }

    #[test]
    fn open_on_disk_persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("graphwatch.db");
        let rule = sample_rule();
        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_rules(std::slice::from_ref(&rule)).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_rules().unwrap()[0].id, rule.id);
    }
}
