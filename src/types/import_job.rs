//! Import job and progress types for the JetStream-based import pipeline
//!
//! These types travel between the upload handler, the job queue, the
//! progress store and the import workers:
//! - `QueuedImportJob` is the work-queue message
//! - `ProgressRecord` is the value stored per task in the progress bucket
//! - `ImportSummary` is the `import.completed` webhook payload

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

// ==========================================================================
// Tests First (TDD)
// ==========================================================================


// ==========================================================================
// Import Job Types
// ==========================================================================

/// Lifecycle of an import task as seen through the progress store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Queued,
    Reading,
    Parsing,
    Validating,
    Importing,
    Completed,
    Error,
}

impl ImportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportStatus::Completed | ImportStatus::Error)
    }
}

/// Progress of one import task, stored under its task id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub task_id: Uuid,
    pub status: ImportStatus,
    /// Rows written to the catalog so far
    pub processed: u64,
    /// Rows expected; valid-row count once importing starts
    pub total: u64,
    pub percentage: f64,
    pub message: String,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub updated: u64,
}

impl ProgressRecord {
    pub fn new(
        task_id: Uuid,
        status: ImportStatus,
        processed: u64,
        total: u64,
        message: impl Into<String>,
    ) -> Self {
        let percentage = if total > 0 {
            processed as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            task_id,
            status,
            processed,
            total,
            percentage,
            message: message.into(),
            errors: Vec::new(),
            created: 0,
            updated: 0,
        }
    }

    /// Initial record written by the upload handler before handoff
    pub fn queued(task_id: Uuid) -> Self {
        Self::new(task_id, ImportStatus::Queued, 0, 0, "Task queued, waiting to start...")
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_counts(mut self, created: u64, updated: u64) -> Self {
        self.created = created;
        self.updated = updated;
        self
    }
}

/// A queued import job in JetStream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedImportJob {
    /// Task id, also the progress key and the upload file stem
    pub task_id: Uuid,
    /// Location of the uploaded CSV in the scratch directory
    pub file_path: PathBuf,
    /// When the job was submitted
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

impl QueuedImportJob {
    pub fn new(task_id: Uuid, file_path: PathBuf) -> Self {
        Self {
            task_id,
            file_path,
            submitted_at: chrono::Utc::now(),
        }
    }
}

/// Response when an upload is accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub task_id: Uuid,
    pub message: String,
}

/// Final counts of a finished import, sent with `import.completed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub task_id: Uuid,
    pub total_rows: u64,
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    /// Number of rejected rows
    pub errors: u64,
}

impl ImportSummary {
    pub fn to_event_data(&self) -> Value {
        json!({
            "task_id": self.task_id,
            "total_rows": self.total_rows,
            "processed": self.processed,
            "created": self.created,
            "updated": self.updated,
            "errors": self.errors,
        })
    }
}
