//! Import progress store
//!
//! Progress records live in a JetStream key-value bucket keyed by task id.
//! The bucket's `max_age` is the retention window, so every put restarts
//! the clock for that key and untouched records disappear on their own.
//!
//! Only the worker owning a task writes its record after the upload handler
//! seeds it, so last-write-wins is all the consistency needed here.

use std::time::Duration;

use anyhow::Result;
use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::types::ProgressRecord;

const BUCKET_NAME: &str = "IMPORT_PROGRESS";

pub const DEFAULT_PROGRESS_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum ProgressError {
    /// Stored bytes are not a progress record. Readers retry.
    #[error("Failed to decode progress data: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Progress store error: {0}")]
    Backend(String),
}

/// Shared, expiring task-id → progress association
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Write the record under its task id, resetting the expiry clock
    async fn put(&self, record: &ProgressRecord) -> Result<(), ProgressError>;

    /// `Ok(None)` when the task is unknown or its record expired
    async fn get(&self, task_id: Uuid) -> Result<Option<ProgressRecord>, ProgressError>;

    async fn delete(&self, task_id: Uuid) -> Result<(), ProgressError>;
}

/// JetStream KV backed progress store
pub struct KvProgressStore {
    kv: kv::Store,
}

impl KvProgressStore {
    /// Open the progress bucket, creating it with the given retention if missing
    pub async fn new(js: &jetstream::Context, ttl: Duration) -> Result<Self> {
        let kv = match js.get_key_value(BUCKET_NAME).await {
            Ok(kv) => kv,
            Err(_) => js.create_key_value(bucket_config(ttl)).await?,
        };
        info!("JetStream progress bucket '{}' ready (ttl {:?})", BUCKET_NAME, ttl);

        Ok(Self { kv })
    }
}

/// One revision per key; `max_age` expires records untouched for `ttl`
fn bucket_config(ttl: Duration) -> kv::Config {
    kv::Config {
        bucket: BUCKET_NAME.to_string(),
        description: "Import progress by task id".to_string(),
        history: 1,
        max_age: ttl,
        ..Default::default()
    }
}

fn decode_record(bytes: &[u8]) -> Result<ProgressRecord, ProgressError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn progress_key(task_id: Uuid) -> String {
    task_id.to_string()
}

#[async_trait]
impl ProgressStore for KvProgressStore {
    async fn put(&self, record: &ProgressRecord) -> Result<(), ProgressError> {
        let payload = serde_json::to_vec(record)?;
        self.kv
            .put(progress_key(record.task_id), payload.into())
            .await
            .map_err(|e| ProgressError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<ProgressRecord>, ProgressError> {
        let entry = self
            .kv
            .get(progress_key(task_id))
            .await
            .map_err(|e| ProgressError::Backend(e.to_string()))?;

        match entry {
            Some(bytes) => decode_record(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn delete(&self, task_id: Uuid) -> Result<(), ProgressError> {
        self.kv
            .purge(progress_key(task_id))
            .await
            .map_err(|e| ProgressError::Backend(e.to_string()))
    }
}
