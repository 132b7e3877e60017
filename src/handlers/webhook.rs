//! Webhook listener management endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::info;

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::db::queries::webhook as queries;
use crate::types::{CreateWebhookRequest, DeliveryResult, UpdateWebhookRequest, Webhook, WebhookEvent};

const NOT_FOUND: &str = "Webhook not found";

/// GET /api/webhooks
pub async fn list_webhooks(State(state): State<AppState>) -> ApiResult<Json<Vec<Webhook>>> {
    Ok(Json(queries::list_webhooks(&state.pool).await?))
}

/// GET /api/webhooks/:id
pub async fn get_webhook(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Webhook>> {
    queries::get_webhook(&state.pool, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(NOT_FOUND.into()))
}

/// POST /api/webhooks
pub async fn create_webhook(
    State(state): State<AppState>,
    Json(req): Json<CreateWebhookRequest>,
) -> ApiResult<(StatusCode, Json<Webhook>)> {
    req.validate().map_err(ApiError::BadRequest)?;

    let webhook = queries::create_webhook(&state.pool, &req).await?;
    info!(webhook_id = webhook.id, "Registered {} listener {}", webhook.event_type.as_str(), webhook.url);
    Ok((StatusCode::CREATED, Json(webhook)))
}

/// PUT /api/webhooks/:id
pub async fn update_webhook(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateWebhookRequest>,
) -> ApiResult<Json<Webhook>> {
    req.validate().map_err(ApiError::BadRequest)?;

    queries::update_webhook(&state.pool, id, &req)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(NOT_FOUND.into()))
}

/// DELETE /api/webhooks/:id
pub async fn delete_webhook(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    if !queries::delete_webhook(&state.pool, id).await? {
        return Err(ApiError::NotFound(NOT_FOUND.into()));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/webhooks/:id/test
///
/// Sends the sample payload of the webhook's event type, even if the
/// webhook is disabled.
pub async fn test_webhook(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeliveryResult>> {
    let webhook = queries::get_webhook(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(NOT_FOUND.into()))?;

    let event = WebhookEvent::sample(webhook.event_type);
    Ok(Json(state.notifier.deliver_to(&webhook, &event).await))
}
