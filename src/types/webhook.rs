//! Webhook listener and notification event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{FromRow, Type};

use super::product::Product;

pub const MAX_URL_LEN: usize = 1000;

/// Catalog events a listener can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "webhook_event_type")]
pub enum WebhookEventType {
    #[sqlx(rename = "product.created")]
    #[serde(rename = "product.created")]
    ProductCreated,
    #[sqlx(rename = "product.updated")]
    #[serde(rename = "product.updated")]
    ProductUpdated,
    #[sqlx(rename = "product.deleted")]
    #[serde(rename = "product.deleted")]
    ProductDeleted,
    #[sqlx(rename = "import.completed")]
    #[serde(rename = "import.completed")]
    ImportCompleted,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventType::ProductCreated => "product.created",
            WebhookEventType::ProductUpdated => "product.updated",
            WebhookEventType::ProductDeleted => "product.deleted",
            WebhookEventType::ImportCompleted => "import.completed",
        }
    }
}

/// Registered webhook listener
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Webhook {
    pub id: i64,
    pub url: String,
    pub event_type: WebhookEventType,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register a webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    pub event_type: WebhookEventType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CreateWebhookRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_url(&self.url)
    }
}

/// Request to update a webhook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateWebhookRequest {
    pub url: Option<String>,
    pub event_type: Option<WebhookEventType>,
    pub enabled: Option<bool>,
}

impl UpdateWebhookRequest {
    pub fn validate(&self) -> Result<(), String> {
        match &self.url {
            Some(url) => validate_url(url),
            None => Ok(()),
        }
    }
}

fn validate_url(url: &str) -> Result<(), String> {
    if url.is_empty() || url.chars().count() > MAX_URL_LEN {
        return Err(format!("URL must be between 1 and {} characters", MAX_URL_LEN));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err("URL must start with http:// or https://".to_string());
    }
    Ok(())
}

/// Notification event with the payload snapshot taken when it fired.
///
/// Serialized as the request body sent to every listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "event")]
    pub event_type: WebhookEventType,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl WebhookEvent {
    pub fn new(event_type: WebhookEventType, data: Value) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn product_created(product: &Product) -> Self {
        Self::new(WebhookEventType::ProductCreated, product_snapshot(product))
    }

    pub fn product_updated(product: &Product) -> Self {
        Self::new(WebhookEventType::ProductUpdated, product_snapshot(product))
    }

    pub fn product_deleted(product: &Product) -> Self {
        Self::new(WebhookEventType::ProductDeleted, product_snapshot(product))
    }

    /// Fixed example payload used by the "test this webhook" action
    pub fn sample(event_type: WebhookEventType) -> Self {
        let data = match event_type {
            WebhookEventType::ProductCreated => json!({
                "id": 1,
                "sku": "TEST-SKU-001",
                "name": "Test Product",
                "description": "This is a test product",
                "active": true
            }),
            WebhookEventType::ProductUpdated => json!({
                "id": 1,
                "sku": "TEST-SKU-001",
                "name": "Updated Test Product",
                "description": "This is an updated test product",
                "active": true
            }),
            WebhookEventType::ProductDeleted => json!({
                "id": 1,
                "sku": "TEST-SKU-001",
                "name": "Deleted Test Product"
            }),
            WebhookEventType::ImportCompleted => json!({
                "task_id": "test-task-123",
                "total_rows": 100,
                "processed": 100,
                "created": 50,
                "updated": 50,
                "errors": 0
            }),
        };
        Self::new(event_type, data)
    }
}

fn product_snapshot(product: &Product) -> Value {
    json!({
        "id": product.id,
        "sku": product.sku,
        "name": product.name,
        "description": product.description,
        "active": product.active,
        "created_at": product.created_at,
        "updated_at": product.updated_at,
    })
}

/// Outcome of delivering one event to one listener
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub success: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<f64>,
    pub response_body: Option<String>,
    pub error: Option<String>,
}
