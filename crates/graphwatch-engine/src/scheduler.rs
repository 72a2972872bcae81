//! Per-rule polling scheduler.
//!
//! Each enabled rule gets its own timer task running at the rule's interval
//! (or the global default). Timers only decide *when* to evaluate; every
//! evaluation goes through the shared data cache and a single cycle lock, so
//! overlapping timers share one fetch and never interleave incident
//! mutations.

use crate::config::EngineConfig;
use crate::engine::{NotificationEngine, TestRunReport};
use crate::{CycleReport, Error, Result};
use chrono::{DateTime, Utc};
use graphwatch_core::{PreviousState, RuleConfig, Snapshot};
use graphwatch_fetch::DataCache;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Setting key the cross-cycle deployment snapshot persists under
pub const PREVIOUS_STATE_SETTING: &str = "previousState";

struct RuleTimer {
    interval: Duration,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns the per-rule timers and drives evaluations through the engine
pub struct RuleScheduler {
    engine: Arc<NotificationEngine>,
    cache: Arc<DataCache>,
    config: EngineConfig,
    timers: Mutex<HashMap<String, RuleTimer>>,
    /// Serializes whole evaluations; two timers firing together must not
    /// interleave their incident reads and writes.
    cycle_lock: tokio::sync::Mutex<()>,
    last_evaluated: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RuleScheduler {
    pub fn new(engine: Arc<NotificationEngine>, cache: Arc<DataCache>, config: EngineConfig) -> Self {
        Self {
            engine,
            cache,
            config,
            timers: Mutex::new(HashMap::new()),
            cycle_lock: tokio::sync::Mutex::new(()),
            last_evaluated: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<NotificationEngine> {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<DataCache> {
        &self.cache
    }

    /// One immediate full pass, then timers for every enabled rule
    pub async fn start(self: &Arc<Self>) -> Result<CycleReport> {
        let report = self.evaluate_all_rules().await?;
        self.resync()?;
        Ok(report)
    }

    /// Reconcile running timers with the stored rule set. Call after any rule
    /// create/update/delete; missing timers are spawned, stale ones stopped,
    /// interval changes restart the timer.
    pub fn resync(self: &Arc<Self>) -> Result<()> {
        let rules = self.engine.store().get_rules()?;
        let mut desired: HashMap<String, Duration> = HashMap::new();
        for rule in rules.iter().filter(|r| r.enabled) {
            desired.insert(rule.id.clone(), self.interval_for(rule));
        }

        let mut timers = self.timers.lock().unwrap();

        let stale: Vec<String> = timers
            .iter()
            .filter(|(id, timer)| desired.get(*id) != Some(&timer.interval))
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(timer) = timers.remove(&id) {
                timer.stop.store(true, Ordering::Relaxed);
                timer.handle.abort();
                tracing::debug!("stopped timer for rule {id}");
            }
        }

        for (id, interval) in desired {
            if timers.contains_key(&id) {
                continue;
            }
            let stop = Arc::new(AtomicBool::new(false));
            let handle = self.spawn_timer(id.clone(), interval, stop.clone());
            tracing::info!("scheduled rule {id} every {interval:?}");
            timers.insert(
                id,
                RuleTimer {
                    interval,
                    stop,
                    handle,
                },
            );
        }
        Ok(())
    }

    /// Stop all timers. In-flight evaluations finish; no new ticks fire.
    pub fn shutdown(&self) {
        let mut timers = self.timers.lock().unwrap();
        for (id, timer) in timers.drain() {
            timer.stop.store(true, Ordering::Relaxed);
            timer.handle.abort();
            tracing::debug!("stopped timer for rule {id}");
        }
    }

    pub fn timer_count(&self) -> usize {
        self.timers.lock().unwrap().len()
    }

    pub fn last_evaluated(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.last_evaluated.lock().unwrap().get(rule_id).copied()
    }

    fn interval_for(&self, rule: &RuleConfig) -> Duration {
        rule.polling_interval_minutes
            .map(|minutes| Duration::from_secs(minutes.max(1) * 60))
            .unwrap_or(self.config.polling_interval)
    }

    fn spawn_timer(
        self: &Arc<Self>,
        rule_id: String,
        interval: Duration,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the initial evaluation
            // already happened in start().
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = scheduler.evaluate_rule(&rule_id).await {
                    tracing::error!("scheduled evaluation of rule {rule_id} failed: {e}");
                }
            }
        })
    }

    /// Evaluate one rule now against a fresh-enough snapshot
    pub async fn evaluate_rule(&self, rule_id: &str) -> Result<CycleReport> {
        let _guard = self.cycle_lock.lock().await;

        // Config is re-resolved on every tick so edits take effect without a
        // restart.
        let rules = self.engine.store().get_rules()?;
        let rule = rules
            .into_iter()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| Error::UnknownRule(rule_id.to_string()))?;

        let snapshot = self.cache.refresh().await?;
        let previous = self.load_previous_state()?;
        let report = self
            .engine
            .run_cycle(std::slice::from_ref(&rule), &snapshot, previous.as_ref())
            .await?;
        self.stamp(&[rule.id]);
        Ok(report)
    }

    /// Evaluate every enabled rule against one snapshot, then roll the
    /// cross-cycle state forward. Single-rule ticks never roll it, so
    /// redeployment detection always compares against the last full pass.
    pub async fn evaluate_all_rules(&self) -> Result<CycleReport> {
        let _guard = self.cycle_lock.lock().await;

        let rules = self.engine.store().get_rules()?;
        let snapshot = self.cache.refresh().await?;
        let previous = self.load_previous_state()?;
        let report = self
            .engine
            .run_cycle(&rules, &snapshot, previous.as_ref())
            .await?;

        self.persist_previous_state(&snapshot)?;
        let evaluated: Vec<String> = rules
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.id.clone())
            .collect();
        self.stamp(&evaluated);
        Ok(report)
    }

    /// Run one rule without touching incidents; see
    /// [`NotificationEngine::test_rule`]
    pub async fn test_rule(&self, rule_id: &str) -> Result<TestRunReport> {
        let rules = self.engine.store().get_rules()?;
        let rule = rules
            .into_iter()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| Error::UnknownRule(rule_id.to_string()))?;
        let snapshot = self.cache.refresh().await?;
        let previous = self.load_previous_state()?;
        self.engine
            .test_rule(&rule, &snapshot, previous.as_ref())
            .await
    }

    fn stamp(&self, rule_ids: &[String]) {
        let now = Utc::now();
        let mut stamps = self.last_evaluated.lock().unwrap();
        for id in rule_ids {
            stamps.insert(id.clone(), now);
        }
    }

    fn load_previous_state(&self) -> Result<Option<PreviousState>> {
        let raw = match self.engine.store().get_setting(PREVIOUS_STATE_SETTING)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                // A corrupt stamp only costs one cycle of redeployment
                // detection.
                tracing::warn!("discarding unreadable previous state: {e}");
                Ok(None)
            }
        }
    }

    fn persist_previous_state(&self, snapshot: &Snapshot) -> Result<()> {
        let state = PreviousState::capture(snapshot);
        let raw = serde_json::to_string(&state).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        self.engine
            .store()
            .set_setting(PREVIOUS_STATE_SETTING, &raw)?;
        Ok(())
    }
}

impl Drop for RuleScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
