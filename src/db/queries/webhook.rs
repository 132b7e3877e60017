//! Webhook listener queries

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::services::webhook_dispatcher::ListenerSource;
use crate::types::webhook::{CreateWebhookRequest, UpdateWebhookRequest, Webhook, WebhookEventType};

/// List all webhooks, newest first
pub async fn list_webhooks(pool: &PgPool) -> Result<Vec<Webhook>> {
    let webhooks = sqlx::query_as::<_, Webhook>(
        r#"
        SELECT id, url, event_type, enabled, created_at, updated_at
        FROM webhooks
        ORDER BY id DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(webhooks)
}

pub async fn get_webhook(pool: &PgPool, id: i64) -> Result<Option<Webhook>> {
    let webhook = sqlx::query_as::<_, Webhook>(
        r#"
        SELECT id, url, event_type, enabled, created_at, updated_at
        FROM webhooks
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(webhook)
}

/// Enabled webhooks subscribed to an event type
pub async fn list_enabled_for_event(pool: &PgPool, event_type: WebhookEventType) -> Result<Vec<Webhook>> {
    let webhooks = sqlx::query_as::<_, Webhook>(
        r#"
        SELECT id, url, event_type, enabled, created_at, updated_at
        FROM webhooks
        WHERE event_type = $1 AND enabled = TRUE
        ORDER BY id
        "#,
    )
    .bind(event_type)
    .fetch_all(pool)
    .await?;

    Ok(webhooks)
}

pub async fn create_webhook(pool: &PgPool, req: &CreateWebhookRequest) -> Result<Webhook> {
    let webhook = sqlx::query_as::<_, Webhook>(
        r#"
        INSERT INTO webhooks (url, event_type, enabled, created_at, updated_at)
        VALUES ($1, $2, $3, NOW(), NOW())
        RETURNING id, url, event_type, enabled, created_at, updated_at
        "#,
    )
    .bind(&req.url)
    .bind(req.event_type)
    .bind(req.enabled)
    .fetch_one(pool)
    .await?;

    Ok(webhook)
}

pub async fn update_webhook(pool: &PgPool, id: i64, req: &UpdateWebhookRequest) -> Result<Option<Webhook>> {
    let webhook = sqlx::query_as::<_, Webhook>(
        r#"
        UPDATE webhooks
        SET
            url = COALESCE($2, url),
            event_type = COALESCE($3, event_type),
            enabled = COALESCE($4, enabled),
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, url, event_type, enabled, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(&req.url)
    .bind(req.event_type)
    .bind(req.enabled)
    .fetch_optional(pool)
    .await?;

    Ok(webhook)
}

pub async fn delete_webhook(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM webhooks WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Listener lookup against the `webhooks` table
#[derive(Clone)]
pub struct PgListenerSource {
    pool: PgPool,
}

impl PgListenerSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ListenerSource for PgListenerSource {
    async fn enabled_listeners(&self, event_type: WebhookEventType) -> Result<Vec<Webhook>> {
        list_enabled_for_event(&self.pool, event_type).await
    }
}
