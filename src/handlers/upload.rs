//! CSV upload intake
//!
//! Accepts the file, streams it to `<upload_dir>/<task_id>.csv`, seeds the
//! progress record and hands the job to the queue. Any failure after the
//! first byte is written rolls back what was created so far.

use std::path::{Path, PathBuf};

use anyhow::Context;
use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::Json;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::types::{ProgressRecord, QueuedImportJob, UploadResponse};

const FILE_FIELD: &str = "file";

/// POST /api/upload
pub async fn upload_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let field = loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read multipart field: {}", e)))?
            .ok_or_else(|| ApiError::BadRequest("No file provided".to_string()))?;
        if field.name() == Some(FILE_FIELD) {
            break field;
        }
    };

    let file_name = field.file_name().unwrap_or_default().to_string();
    if !has_csv_extension(&file_name) {
        return Err(ApiError::BadRequest("File must be a CSV file".to_string()));
    }

    let task_id = Uuid::new_v4();
    tokio::fs::create_dir_all(&state.uploads.dir)
        .await
        .context("Failed to create upload directory")?;
    let path = state.uploads.dir.join(format!("{}.csv", task_id));

    let size = match save_field(field, &path, state.uploads.max_size).await {
        Ok(size) => size,
        Err(e) => {
            remove_partial(&path).await;
            return Err(e);
        }
    };
    info!(task_id = %task_id, "Stored upload '{}' ({} bytes)", file_name, size);

    if let Err(e) = state.progress.put(&ProgressRecord::queued(task_id)).await {
        remove_partial(&path).await;
        return Err(ApiError::Internal(
            anyhow::Error::new(e).context("Failed to initialize import progress"),
        ));
    }

    let job = QueuedImportJob::new(task_id, path.clone());
    if let Err(e) = state.queue.enqueue(&job).await {
        error!(task_id = %task_id, "Error starting import task: {}", e);
        remove_partial(&path).await;
        if let Err(e) = state.progress.delete(task_id).await {
            warn!(task_id = %task_id, "Failed to roll back progress record: {}", e);
        }
        return Err(ApiError::Internal(
            anyhow::Error::new(e).context("Failed to enqueue import job"),
        ));
    }

    Ok(Json(UploadResponse {
        task_id,
        message: "File uploaded successfully. Import started.".to_string(),
    }))
}

fn has_csv_extension(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// Stream the field to `path`, failing once more than `max_size` bytes arrive
async fn save_field(mut field: Field<'_>, path: &PathBuf, max_size: u64) -> ApiResult<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .context("Failed to create upload file")?;
    let mut written: u64 = 0;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read uploaded file: {}", e)))?
    {
        written += chunk.len() as u64;
        if written > max_size {
            return Err(ApiError::PayloadTooLarge(format!(
                "File size exceeds maximum allowed size of {} bytes",
                max_size
            )));
        }
        file.write_all(&chunk).await.context("Failed to write upload file")?;
    }

    file.flush().await.context("Failed to write upload file")?;
    Ok(written)
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove upload {}: {}", path.display(), e);
        }
    }
}
