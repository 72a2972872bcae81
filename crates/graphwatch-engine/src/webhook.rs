//! Webhook channel.
//!
//! Renders one alert for single-notification batches and a digest grouped by
//! rule for larger ones, truncated to a hard character budget instead of
//! failing on oversize payloads. HTTP 429 responses are honored via the
//! server's retry-after hint up to a small cap; any other non-2xx fails
//! immediately with the body captured for diagnostics.
//!
//! Destination URLs are validated against an allow-list (https + host suffix)
//! before any network call. This is an SSRF guard: channel configs are
//! user-supplied and must not be able to point the engine at internal hosts.

use crate::channel::{BatchContext, Channel};
use crate::{Error, Result};
use async_trait::async_trait;
use graphwatch_core::{Notification, Severity};
use std::time::Duration;
use url::Url;

/// Character budget for one outbound message, with headroom reserved for the
/// truncation footer (Discord caps content at 2000).
const MAX_MESSAGE_CHARS: usize = 1900;
const TRUNCATION_FOOTER: &str = "\n…truncated";

/// Attempts per delivery when the sink answers 429
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Longest the channel will sleep on a retry-after hint
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Validate a user-supplied webhook destination: https only, host must end
/// with one of the allowed suffixes. Runs before any network call.
pub fn validate_webhook_url(raw: &str, allowed_hosts: &[String]) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| Error::DisallowedDestination(format!("malformed URL: {e}")))?;
    if url.scheme() != "https" {
        return Err(Error::DisallowedDestination(format!(
            "scheme {:?} is not allowed, only https",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| Error::DisallowedDestination("URL has no host".to_string()))?;
    let allowed = allowed_hosts
        .iter()
        .any(|suffix| host == suffix || host.ends_with(&format!(".{suffix}")));
    if !allowed {
        return Err(Error::DisallowedDestination(format!(
            "host {host:?} is not in the allowed host list {allowed_hosts:?}"
        )));
    }
    Ok(url)
}

/// Webhook-style notification sink
pub struct WebhookChannel {
    id: String,
    name: String,
    url: Url,
    client: reqwest::Client,
}

impl WebhookChannel {
    /// Build from a stored channel config; fails on a missing secret or a
    /// destination outside the allow-list.
    pub fn from_config(
        config: &graphwatch_core::ChannelConfig,
        allowed_hosts: &[String],
    ) -> Result<Self> {
        let raw = config
            .config
            .get("webhookUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::InvalidConfig(format!("channel {:?} has no webhookUrl", config.name))
            })?;
        let url = validate_webhook_url(raw, allowed_hosts)?;
        Ok(Self {
            id: config.id.clone(),
            name: config.name.clone(),
            url,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One real delivery with a synthetic payload, used by the channel test
    /// action.
    pub async fn send_test(&self) -> Result<()> {
        let notification = Notification::new(
            "channel-test",
            "GraphWatch test notification",
            format!("Channel {:?} is reachable.", self.name),
            Severity::Info,
        );
        self.send_batch(std::slice::from_ref(&notification), &BatchContext::default())
            .await
    }

    async fn deliver(&self, content: String) -> Result<()> {
        let payload = serde_json::json!({
            "content": content,
            "username": "graphwatch",
        });

        for attempt in 1..=MAX_RATE_LIMIT_RETRIES {
            let response = self
                .client
                .post(self.url.clone())
                .json(&payload)
                .send()
                .await
                .map_err(|e| Error::Delivery(e.to_string()))?;
            let status = response.status();

            if status.is_success() {
                return Ok(());
            }

            if status.as_u16() == 429 {
                // No sleep once the retry budget is spent.
                let wait = match rate_limit_backoff(attempt, retry_after(&response)) {
                    Some(wait) => wait,
                    None => break,
                };
                tracing::warn!(
                    "webhook {} rate limited, attempt {attempt}/{MAX_RATE_LIMIT_RETRIES}, \
                     sleeping {wait:?}",
                    self.name
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(Error::Delivery(format!(
                "webhook {} answered HTTP {status}: {body}",
                self.name
            )));
        }

        Err(Error::RateLimited {
            attempts: MAX_RATE_LIMIT_RETRIES,
        })
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    let raw = response.headers().get("retry-after")?.to_str().ok()?;
    let seconds: f64 = raw.trim().parse().ok()?;
    Some(Duration::from_secs_f64(seconds.max(0.0)))
}

/// How long to wait before retrying a 429, or `None` when the attempt budget
/// is spent and the caller should give up immediately.
fn rate_limit_backoff(attempt: u32, hint: Option<Duration>) -> Option<Duration> {
    if attempt >= MAX_RATE_LIMIT_RETRIES {
        return None;
    }
    Some(hint.unwrap_or(Duration::from_secs(2)).min(MAX_RETRY_AFTER))
}

fn severity_marker(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "ℹ️",
        Severity::Warning => "⚠️",
        Severity::Critical => "🚨",
    }
}

fn render_single(notification: &Notification) -> String {
    format!(
        "{} **{}**\n{}",
        severity_marker(notification.severity),
        notification.title,
        notification.message
    )
}

/// Digest grouped by rule, one section per rule with its human label
fn render_digest(notifications: &[Notification], ctx: &BatchContext) -> String {
    let mut order: Vec<&str> = Vec::new();
    for n in notifications {
        if !order.contains(&n.rule_id.as_str()) {
            order.push(&n.rule_id);
        }
    }

    let mut out = format!("**{} alerts**\n", notifications.len());
    for rule_id in order {
        let label = ctx
            .rule_names
            .get(rule_id)
            .map(String::as_str)
            .unwrap_or(rule_id);
        out.push_str(&format!("\n__{label}__\n"));
        for n in notifications.iter().filter(|n| n.rule_id == rule_id) {
            out.push_str(&format!(
                "{} {}\n",
                severity_marker(n.severity),
                n.title
            ));
        }
    }
    for summary in &ctx.filter_summaries {
        out.push_str(&format!("\n_{}: {}_\n", summary.rule_name, summary.summary));
    }
    out
}

fn truncate_to_budget(text: String) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text;
    }
    let keep = MAX_MESSAGE_CHARS - TRUNCATION_FOOTER.chars().count();
    let mut kept: String = text.chars().take(keep).collect();
    kept.push_str(TRUNCATION_FOOTER);
    kept
}

#[async_trait]
impl Channel for WebhookChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_batch(&self, notifications: &[Notification], ctx: &BatchContext) -> Result<()> {
        if notifications.is_empty() {
            return Ok(());
        }
        let content = if notifications.len() == 1 {
            render_single(&notifications[0])
        } else {
            render_digest(notifications, ctx)
        };
        self.deliver(truncate_to_budget(content)).await
    }
}
