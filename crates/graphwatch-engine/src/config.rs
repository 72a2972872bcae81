//! Environment-level configuration for the scheduler and engine.

use graphwatch_fetch::FetchLimits;
use std::time::Duration;

/// Knobs consumed from the environment, with sane defaults for local runs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Global polling interval for rules without their own
    pub polling_interval: Duration,
    /// Minimum data-fetch freshness window for the shared cache
    pub min_data_freshness: Duration,
    /// Caps for the batched health fetch
    pub fetch_limits: FetchLimits,
    /// Host suffixes webhook destinations must match (SSRF guard)
    pub allowed_webhook_hosts: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(15 * 60),
            min_data_freshness: Duration::from_secs(60),
            fetch_limits: FetchLimits::default(),
            allowed_webhook_hosts: vec![
                "discord.com".to_string(),
                "discordapp.com".to_string(),
            ],
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse().ok()
}

impl EngineConfig {
    /// Read configuration from `GRAPHWATCH_*` variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(minutes) = env_u64("GRAPHWATCH_POLLING_INTERVAL_MINUTES") {
            config.polling_interval = Duration::from_secs(minutes * 60);
        }
        if let Some(seconds) = env_u64("GRAPHWATCH_MIN_FETCH_INTERVAL_SECONDS") {
            config.min_data_freshness = Duration::from_secs(seconds);
        }
        if let Some(bytes) = env_u64("GRAPHWATCH_HEALTH_BATCH_BYTES") {
            config.fetch_limits.max_batch_bytes = bytes as usize;
        }
        if let Some(concurrency) = env_u64("GRAPHWATCH_HEALTH_BATCH_CONCURRENCY") {
            config.fetch_limits.max_concurrency = (concurrency as usize).max(1);
        }
        if let Some(retries) = env_u64("GRAPHWATCH_HEALTH_BATCH_RETRIES") {
            config.fetch_limits.max_batch_retries = retries as u32;
        }
        if let Ok(hosts) = std::env::var("GRAPHWATCH_ALLOWED_WEBHOOK_HOSTS") {
            let hosts: Vec<String> = hosts
                .split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
            if !hosts.is_empty() {
                config.allowed_webhook_hosts = hosts;
            }
        }
        config
    }
}
