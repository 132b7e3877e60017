//! Product catalog endpoints

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::{info, warn};

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::db::queries::product as queries;
use crate::services::upsert::CatalogError;
use crate::types::{
    BulkDeleteResponse, CreateProductRequest, Product, ProductListQuery, ProductListResponse,
    UpdateProductRequest, WebhookEvent,
};

const NOT_FOUND: &str = "Product not found";
const DUPLICATE_SKU: &str = "Product with this SKU already exists";

/// GET /api/products
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductListQuery>,
) -> ApiResult<Json<ProductListResponse>> {
    query.validate().map_err(ApiError::BadRequest)?;

    let (items, total) = queries::list_products(&state.pool, &query).await?;
    Ok(Json(ProductListResponse::new(items, total, query.page, query.per_page)))
}

/// GET /api/products/:id
pub async fn get_product(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Product>> {
    queries::get_product(&state.pool, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(NOT_FOUND.into()))
}

/// POST /api/products
pub async fn create_product(
    State(state): State<AppState>,
    Json(req): Json<CreateProductRequest>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    let candidate = req.into_candidate().map_err(ApiError::BadRequest)?;

    if queries::find_product_by_sku(&state.pool, &candidate.sku).await?.is_some() {
        return Err(ApiError::BadRequest(DUPLICATE_SKU.into()));
    }

    let product = match queries::create_product(&state.pool, &candidate).await {
        Ok(product) => product,
        Err(CatalogError::UniqueViolation(_)) => return Err(ApiError::BadRequest(DUPLICATE_SKU.into())),
        Err(CatalogError::Storage(e)) => return Err(ApiError::Internal(e.into())),
    };
    info!(product_id = product.id, "Created product {}", product.sku);

    notify(&state, WebhookEvent::product_created(&product)).await;
    Ok((StatusCode::CREATED, Json(product)))
}

/// PUT /api/products/:id
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateProductRequest>,
) -> ApiResult<Json<Product>> {
    req.validate().map_err(ApiError::BadRequest)?;

    let product = queries::update_product(&state.pool, id, &req)
        .await?
        .ok_or_else(|| ApiError::NotFound(NOT_FOUND.into()))?;

    notify(&state, WebhookEvent::product_updated(&product)).await;
    Ok(Json(product))
}

/// DELETE /api/products/:id
pub async fn delete_product(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    let product = queries::delete_product(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(NOT_FOUND.into()))?;
    info!(product_id = product.id, "Deleted product {}", product.sku);

    notify(&state, WebhookEvent::product_deleted(&product)).await;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/products/bulk/all
pub async fn delete_all_products(State(state): State<AppState>) -> ApiResult<Json<BulkDeleteResponse>> {
    let count = queries::delete_all_products(&state.pool).await?;
    warn!("Deleted all {} products", count);

    Ok(Json(BulkDeleteResponse {
        message: format!("Deleted {} products", count),
        count,
    }))
}

/// Fan out a catalog event. Delivery failures never fail the request.
async fn notify(state: &AppState, event: WebhookEvent) {
    let results = state.notifier.notify(&event).await;
    let failed = results.iter().filter(|r| !r.success).count();
    if failed > 0 {
        warn!(
            event = event.event_type.as_str(),
            "{}/{} webhook deliveries failed",
            failed,
            results.len()
        );
    }
}
