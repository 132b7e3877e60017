//! HTTP API handlers

pub mod error;
pub mod product;
pub mod progress;
pub mod upload;
pub mod webhook;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::job_queue::JobQueue;
use crate::services::progress::ProgressStore;
use crate::services::webhook_dispatcher::EventNotifier;

pub use progress::StreamSettings;

/// Where and how large uploads may be stored
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub dir: PathBuf,
    pub max_size: u64,
}

/// Shared state of all HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub progress: Arc<dyn ProgressStore>,
    pub queue: Arc<dyn JobQueue>,
    pub notifier: Arc<dyn EventNotifier>,
    pub uploads: UploadSettings,
    pub stream: StreamSettings,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    // The upload handler enforces its own limit while streaming to disk
    let upload_routes = Router::new()
        .route("/api/upload", post(upload::upload_csv))
        .layer(DefaultBodyLimit::disable());

    let api_routes = Router::new()
        .route("/api/health", get(health))
        .route("/api/progress/:task_id", get(progress::get_progress))
        .route("/api/stream/:task_id", get(progress::stream_progress))
        .route(
            "/api/products",
            get(product::list_products).post(product::create_product),
        )
        .route("/api/products/bulk/all", delete(product::delete_all_products))
        .route(
            "/api/products/:id",
            get(product::get_product)
                .put(product::update_product)
                .delete(product::delete_product),
        )
        .route(
            "/api/webhooks",
            get(webhook::list_webhooks).post(webhook::create_webhook),
        )
        .route(
            "/api/webhooks/:id",
            get(webhook::get_webhook)
                .put(webhook::update_webhook)
                .delete(webhook::delete_webhook),
        )
        .route("/api/webhooks/:id/test", post(webhook::test_webhook));

    upload_routes
        .merge(api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /api/health
async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::progress::DEFAULT_PROGRESS_TTL;
    use crate::testing::{MemoryJobQueue, MemoryProgressStore, RecordingNotifier};
    use crate::types::{ImportStatus, ProgressRecord, WebhookEventType};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use sqlx::postgres::PgPoolOptions;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use uuid::Uuid;

    const BOUNDARY: &str = "catalog-test-boundary";

    struct TestApp {
        dir: TempDir,
        progress: Arc<MemoryProgressStore>,
        queue: Arc<MemoryJobQueue>,
        router: Router,
    }

    fn app_with(queue: MemoryJobQueue, max_size: u64) -> TestApp {
        let dir = TempDir::new().unwrap();
        let progress = Arc::new(MemoryProgressStore::new(DEFAULT_PROGRESS_TTL));
        let queue = Arc::new(queue);
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/catalog_test")
            .unwrap();

        let state = AppState {
            pool,
            progress: progress.clone(),
            queue: queue.clone(),
            notifier: Arc::new(RecordingNotifier::new()),
            uploads: UploadSettings {
                dir: dir.path().join("uploads"),
                max_size,
            },
            stream: StreamSettings {
                poll_interval: Duration::from_millis(10),
                max_failures: 2,
            },
        };

        TestApp {
            dir,
            progress,
            queue,
            router: router(state),
        }
    }

    fn app() -> TestApp {
        app_with(MemoryJobQueue::new(), 1024)
    }

    fn multipart_request(field: &str, file_name: &str, content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"{f}\"; filename=\"{n}\"\r\nContent-Type: text/csv\r\n\r\n",
                b = BOUNDARY,
                f = field,
                n = file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn stored_files(app: &TestApp) -> usize {
        std::fs::read_dir(app.dir.path().join("uploads"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_health() {
        let response = app().router.oneshot(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "healthy"}));
    }

    #[tokio::test]
    async fn test_upload_accepts_csv_and_queues_job() {
        let app = app();
        let response = app
            .router
            .clone()
            .oneshot(multipart_request("file", "Products.CSV", b"sku,name\nA,a\n"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let task_id: Uuid = body["task_id"].as_str().unwrap().parse().unwrap();
        assert_eq!(body["message"], "File uploaded successfully. Import started.");

        let jobs = app.queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].task_id, task_id);
        assert_eq!(std::fs::read(&jobs[0].file_path).unwrap(), b"sku,name\nA,a\n");
        assert!(jobs[0].file_path.ends_with(format!("{}.csv", task_id)));

        let record = app.progress.get(task_id).await.unwrap().unwrap();
        assert_eq!(record.status, ImportStatus::Queued);
        assert_eq!((record.processed, record.total), (0, 0));
        assert_eq!(record.message, "Task queued, waiting to start...");
    }

    #[tokio::test]
    async fn test_upload_rejects_non_csv_without_side_effects() {
        let app = app();
        let response = app
            .router
            .clone()
            .oneshot(multipart_request("file", "products.xlsx", b"data"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["detail"], "File must be a CSV file");
        assert!(app.queue.jobs().is_empty());
        assert_eq!(stored_files(&app), 0);
    }

    #[tokio::test]
    async fn test_upload_without_file_field_is_bad_request() {
        let app = app();
        let response = app
            .router
            .clone()
            .oneshot(multipart_request("attachment", "products.csv", b"sku\n"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["detail"], "No file provided");
    }

    #[tokio::test]
    async fn test_upload_over_limit_is_rejected_and_removed() {
        let app = app_with(MemoryJobQueue::new(), 16);
        let response = app
            .router
            .clone()
            .oneshot(multipart_request("file", "big.csv", &[b'x'; 64]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(app.queue.jobs().is_empty());
        assert_eq!(stored_files(&app), 0);
    }

    #[tokio::test]
    async fn test_enqueue_failure_rolls_back_file_and_progress() {
        let app = app_with(MemoryJobQueue::failing(), 1024);
        let response = app
            .router
            .clone()
            .oneshot(multipart_request("file", "products.csv", b"sku,name\nA,a\n"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(stored_files(&app), 0);
        // The queued record was written, then deleted again
        let written = app.progress.all_history();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].status, ImportStatus::Queued);
        assert!(app.progress.get(written[0].task_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_progress_unknown_task_is_404() {
        let app = app();
        for uri in [
            format!("/api/progress/{}", Uuid::new_v4()),
            "/api/progress/not-a-uuid".to_string(),
        ] {
            let response = app.router.clone().oneshot(get(&uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert_eq!(body_json(response).await["detail"], "Task not found or expired");
        }
    }

    #[tokio::test]
    async fn test_progress_returns_record() {
        let app = app();
        let task_id = Uuid::new_v4();
        let record = ProgressRecord::new(task_id, ImportStatus::Importing, 5, 10, "Imported 5/10 products...");
        app.progress.put(&record).await.unwrap();

        let response = app
            .router
            .clone()
            .oneshot(get(&format!("/api/progress/{}", task_id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "importing");
        assert_eq!(body["percentage"], 50.0);
    }

    #[tokio::test]
    async fn test_progress_undecodable_is_503() {
        let app = app();
        let task_id = Uuid::new_v4();
        app.progress.put_raw(task_id, b"{broken".to_vec());

        let response = app
            .router
            .clone()
            .oneshot(get(&format!("/api/progress/{}", task_id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_stream_sends_terminal_event() {
        let app = app();
        let task_id = Uuid::new_v4();
        app.progress
            .put(&ProgressRecord::new(task_id, ImportStatus::Completed, 2, 2, "done"))
            .await
            .unwrap();

        let response = app
            .router
            .clone()
            .oneshot(get(&format!("/api/stream/{}", task_id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("data: {"), "{}", text);
        assert!(text.contains("\"status\":\"completed\""));
    }

    #[tokio::test]
    async fn test_product_id_must_be_numeric() {
        let response = app().router.oneshot(get("/api/products/abc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // Catalog endpoints against a real database: DATABASE_URL=... cargo test -- --ignored

    fn db_app(pool: PgPool) -> (Router, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let state = AppState {
            pool,
            progress: Arc::new(MemoryProgressStore::new(DEFAULT_PROGRESS_TTL)),
            queue: Arc::new(MemoryJobQueue::new()),
            notifier: notifier.clone(),
            uploads: UploadSettings {
                dir: std::env::temp_dir(),
                max_size: 1024,
            },
            stream: StreamSettings {
                poll_interval: Duration::from_millis(10),
                max_failures: 2,
            },
        };
        (router(state), notifier)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn delete(uri: &str) -> Request<Body> {
        Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore] // requires Postgres
    async fn test_product_crud_fires_catalog_events(pool: PgPool) {
        let (app, notifier) = db_app(pool);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/products", json!({"sku": "ABC-1", "name": "Widget"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = body_json(response).await["id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/products", json!({"sku": "abc-1", "name": "Copy"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["detail"], "Product with this SKU already exists");

        let response = app
            .clone()
            .oneshot(json_request("PUT", &format!("/api/products/{}", id), json!({"name": "Gadget"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["name"], "Gadget");
        assert_eq!(body["sku"], "ABC-1");

        let response = app.clone().oneshot(delete(&format!("/api/products/{}", id))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.clone().oneshot(get(&format!("/api/products/{}", id))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["detail"], "Product not found");

        let events: Vec<WebhookEventType> = notifier.events().iter().map(|e| e.event_type).collect();
        assert_eq!(
            events,
            vec![
                WebhookEventType::ProductCreated,
                WebhookEventType::ProductUpdated,
                WebhookEventType::ProductDeleted,
            ]
        );
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore] // requires Postgres
    async fn test_webhook_crud_and_test_delivery(pool: PgPool) {
        let (app, notifier) = db_app(pool);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/webhooks",
                json!({"url": "http://hooks.local/catalog", "event_type": "import.completed"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = body_json(response).await["id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(json_request("POST", &format!("/api/webhooks/{}/test", id), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], true);
        assert_eq!(notifier.events()[0].event_type, WebhookEventType::ImportCompleted);

        let response = app.clone().oneshot(delete(&format!("/api/webhooks/{}", id))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.clone().oneshot(get(&format!("/api/webhooks/{}", id))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["detail"], "Webhook not found");
    }
}
