//! CSV product import worker
//!
//! Runs one queued job through
//! `reading → parsing → validating → importing → completed`, writing the
//! progress record at every transition and after every upsert batch. Any
//! fatal failure ends the job in `error` with the counts gathered so far.
//! The uploaded file is removed once the job ends, whatever the outcome.

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::services::csv_import::{parse_csv, validate_rows, CsvImportError, CsvRow};
use crate::services::progress::ProgressStore;
use crate::services::upsert::{CatalogError, UpsertCounts, UpsertEngine};
use crate::services::webhook_dispatcher::EventNotifier;
use crate::types::{
    ImportStatus, ImportSummary, ProgressRecord, QueuedImportJob, WebhookEvent, WebhookEventType,
};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to read uploaded file: {0}")]
    Read(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] CsvImportError),
    #[error("CSV file is empty")]
    EmptyFile,
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("Worker panicked: {0}")]
    Panicked(String),
}

/// Counters of the job in flight, kept when the job fails part way
#[derive(Debug, Default)]
struct JobState {
    total_rows: u64,
    total: u64,
    processed: u64,
    counts: UpsertCounts,
    errors: Vec<String>,
}

pub struct ImportWorker {
    engine: UpsertEngine,
    progress: Arc<dyn ProgressStore>,
    notifier: Arc<dyn EventNotifier>,
}

impl ImportWorker {
    pub fn new(
        engine: UpsertEngine,
        progress: Arc<dyn ProgressStore>,
        notifier: Arc<dyn EventNotifier>,
    ) -> Self {
        Self {
            engine,
            progress,
            notifier,
        }
    }

    /// Process one job to its terminal state and return the final record.
    ///
    /// Never fails: every outcome is reported through the progress store.
    pub async fn process(&self, job: &QueuedImportJob) -> ProgressRecord {
        let task_id = job.task_id;
        let start_time = Instant::now();
        info!(task_id = %task_id, "Processing import from {}", job.file_path.display());

        let mut state = JobState::default();
        let outcome = AssertUnwindSafe(self.run(job, &mut state))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ImportError::Panicked(panic_message(panic))));

        remove_upload(task_id, &job.file_path).await;

        match outcome {
            Ok(()) => {
                let message = format!(
                    "Import complete! Created: {}, Updated: {}, Errors: {}",
                    state.counts.created,
                    state.counts.updated,
                    state.errors.len()
                );
                let record = state.record(task_id, ImportStatus::Completed, message);
                self.publish(&record).await;
                info!(
                    task_id = %task_id,
                    "Import completed in {}ms: {} created, {} updated, {} rejected",
                    start_time.elapsed().as_millis(),
                    state.counts.created,
                    state.counts.updated,
                    state.errors.len()
                );
                self.notify_completed(task_id, &state).await;
                record
            }
            Err(ImportError::EmptyFile) => {
                warn!(task_id = %task_id, "Import rejected: CSV file is empty");
                let record = state.record(task_id, ImportStatus::Error, "CSV file is empty");
                self.publish(&record).await;
                record
            }
            Err(e) => {
                error!(task_id = %task_id, "Import failed: {}", e);
                state.errors.push(e.to_string());
                let record = state.record(task_id, ImportStatus::Error, format!("Import failed: {}", e));
                self.publish(&record).await;
                record
            }
        }
    }

    async fn run(&self, job: &QueuedImportJob, state: &mut JobState) -> Result<(), ImportError> {
        let task_id = job.task_id;

        self.publish(&state.record(task_id, ImportStatus::Reading, "Reading CSV file..."))
            .await;
        let content = tokio::fs::read(&job.file_path).await?;

        self.publish(&state.record(task_id, ImportStatus::Parsing, "Parsing CSV file..."))
            .await;
        let rows: Vec<CsvRow> = parse_csv(&content)?.collect::<Result<_, _>>()?;
        drop(content);

        state.total_rows = rows.len() as u64;
        if rows.is_empty() {
            return Err(ImportError::EmptyFile);
        }

        state.total = state.total_rows;
        let message = format!("Validating {} rows...", state.total_rows);
        self.publish(&state.record(task_id, ImportStatus::Validating, message))
            .await;
        let validated = validate_rows(&rows);
        drop(rows);

        state.errors = validated.errors;
        state.total = validated.candidates.len() as u64;
        self.publish(&state.record(task_id, ImportStatus::Importing, "Importing products..."))
            .await;

        for batch in self.engine.batches(&validated.candidates) {
            let counts = self.engine.upsert_batch(batch).await?;
            state.counts += counts;
            state.processed += counts.total();

            let message = format!("Imported {}/{} products...", state.processed, state.total);
            self.publish(&state.record(task_id, ImportStatus::Importing, message))
                .await;
        }

        Ok(())
    }

    /// Write a progress record. A failed write is logged and the job goes on.
    async fn publish(&self, record: &ProgressRecord) {
        if let Err(e) = self.progress.put(record).await {
            warn!(
                task_id = %record.task_id,
                status = ?record.status,
                "Failed to publish import progress: {}",
                e
            );
        }
    }

    async fn notify_completed(&self, task_id: Uuid, state: &JobState) {
        let summary = ImportSummary {
            task_id,
            total_rows: state.total_rows,
            processed: state.processed,
            created: state.counts.created,
            updated: state.counts.updated,
            errors: state.errors.len() as u64,
        };
        let event = WebhookEvent::new(WebhookEventType::ImportCompleted, summary.to_event_data());

        let results = self.notifier.notify(&event).await;
        let failed = results.iter().filter(|r| !r.success).count();
        if failed > 0 {
            warn!(
                task_id = %task_id,
                "import.completed notification failed for {}/{} listeners",
                failed,
                results.len()
            );
        }
    }
}

impl JobState {
    fn record(&self, task_id: Uuid, status: ImportStatus, message: impl Into<String>) -> ProgressRecord {
        ProgressRecord::new(task_id, status, self.processed, self.total, message)
            .with_errors(self.errors.clone())
            .with_counts(self.counts.created, self.counts.updated)
    }
}

async fn remove_upload(task_id: Uuid, path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => error!(task_id = %task_id, "Error cleaning up {}: {}", path.display(), e),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
