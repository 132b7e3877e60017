//! Webhook notification fan-out
//!
//! Delivery is best-effort: every listener call yields a [`DeliveryResult`]
//! and nothing here returns an error to the caller. One slow or broken
//! listener cannot delay another beyond the shared per-call timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::types::{DeliveryResult, Webhook, WebhookEvent, WebhookEventType};

pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest response body kept in a delivery result, in characters
const MAX_RESPONSE_BODY_CHARS: usize = 500;

/// Lookup of the listeners registered for an event type
#[async_trait]
pub trait ListenerSource: Send + Sync {
    /// Enabled listeners for `event_type`, queried fresh on every call
    async fn enabled_listeners(&self, event_type: WebhookEventType) -> Result<Vec<Webhook>>;
}

/// Non-propagating notification contract used by the worker and handlers
#[async_trait]
pub trait EventNotifier: Send + Sync {
    /// Send `event` to every enabled listener of its type and wait for all
    async fn notify(&self, event: &WebhookEvent) -> Vec<DeliveryResult>;

    /// Send `event` to a single listener regardless of its type or state
    async fn deliver_to(&self, webhook: &Webhook, event: &WebhookEvent) -> DeliveryResult;
}

pub struct WebhookDispatcher {
    listeners: Arc<dyn ListenerSource>,
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookDispatcher {
    pub fn new(listeners: Arc<dyn ListenerSource>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("catalog-importer/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            listeners,
            client,
            timeout,
        })
    }

    /// POST the event to one URL and capture the outcome
    pub async fn deliver(&self, url: &str, event: &WebhookEvent) -> DeliveryResult {
        let start = Instant::now();
        let response = self
            .client
            .post(url)
            .json(event)
            .timeout(self.timeout)
            .send()
            .await;

        let mut result = DeliveryResult {
            url: Some(url.to_string()),
            ..Default::default()
        };

        match response {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await;
                result.response_time_ms = Some(elapsed_ms(start));
                result.status_code = Some(status.as_u16());
                result.success = status.is_success();
                match body {
                    Ok(body) => result.response_body = Some(truncate_body(&body)),
                    Err(e) => result.error = Some(describe_error(&e)),
                }
            }
            Err(e) => {
                result.response_time_ms = Some(elapsed_ms(start));
                result.error = Some(describe_error(&e));
            }
        }

        result
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn describe_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "Request timeout".to_string()
    } else {
        e.to_string()
    }
}

fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_RESPONSE_BODY_CHARS).collect()
}

#[async_trait]
impl EventNotifier for WebhookDispatcher {
    async fn notify(&self, event: &WebhookEvent) -> Vec<DeliveryResult> {
        let event_type = event.event_type.as_str();
        let listeners = match self.listeners.enabled_listeners(event.event_type).await {
            Ok(listeners) => listeners,
            Err(e) => {
                warn!(event = event_type, "Failed to load webhook listeners: {}", e);
                return Vec::new();
            }
        };

        if listeners.is_empty() {
            debug!(event = event_type, "No webhook listeners registered");
            return Vec::new();
        }

        let results = join_all(listeners.iter().map(|webhook| self.deliver_to(webhook, event))).await;

        let failed = results.iter().filter(|r| !r.success).count();
        if failed > 0 {
            warn!(
                event = event_type,
                "Webhook fan-out: {}/{} deliveries failed",
                failed,
                results.len()
            );
        } else {
            info!(event = event_type, "Webhook fan-out: {} deliveries succeeded", results.len());
        }

        results
    }

    async fn deliver_to(&self, webhook: &Webhook, event: &WebhookEvent) -> DeliveryResult {
        let mut result = self.deliver(&webhook.url, event).await;
        result.webhook_id = Some(webhook.id);
        if !result.success {
            warn!(
                webhook_id = webhook.id,
                url = %webhook.url,
                status = ?result.status_code,
                "Webhook delivery failed: {}",
                result.error.as_deref().unwrap_or("non-2xx response")
            );
        }
        result
    }
}
