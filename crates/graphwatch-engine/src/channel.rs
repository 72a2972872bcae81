//! Channel seam: delivery of notification batches to external sinks.

use crate::{Error, Result};
use async_trait::async_trait;
use graphwatch_core::{ChannelConfig, Notification};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-rule evaluation summary attached to test deliveries
#[derive(Debug, Clone)]
pub struct FilterSummary {
    pub rule_name: String,
    pub summary: String,
}

/// Context for rendering a batch: human rule names for digest section headers
/// and optional filter summaries from a test run.
#[derive(Debug, Clone, Default)]
pub struct BatchContext {
    pub rule_names: HashMap<String, String>,
    pub filter_summaries: Vec<FilterSummary>,
}

/// A notification sink. Implementations own their retry and rate-limit
/// handling; a returned error means the batch was not delivered and will be
/// retried only on the rule's next natural fire.
#[async_trait]
pub trait Channel: Send + Sync {
    fn id(&self) -> &str;
    async fn send_batch(&self, notifications: &[Notification], ctx: &BatchContext) -> Result<()>;
}

/// Builds channel implementations from stored configs. The engine resolves
/// channels through this seam so tests can substitute recording channels.
pub trait ChannelFactory: Send + Sync {
    /// `Err` for configs that can never work (unknown type, missing secret,
    /// disallowed destination); the engine skips them with a warning.
    fn build(&self, config: &ChannelConfig) -> Result<Arc<dyn Channel>>;
}

/// Factory for the built-in channel types
pub struct DefaultChannelFactory {
    allowed_hosts: Vec<String>,
}

impl DefaultChannelFactory {
    pub fn new(allowed_hosts: Vec<String>) -> Self {
        Self { allowed_hosts }
    }
}

impl ChannelFactory for DefaultChannelFactory {
    fn build(&self, config: &ChannelConfig) -> Result<Arc<dyn Channel>> {
        match config.channel_type.as_str() {
            "webhook" | "discord" => {
                let channel = crate::webhook::WebhookChannel::from_config(config, &self.allowed_hosts)?;
                Ok(Arc::new(channel))
            }
            other => Err(Error::InvalidConfig(format!("unknown channel type {other:?}"))),
        }
    }
}
