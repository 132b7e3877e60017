//! Import job queue
//!
//! Hands import jobs from the upload handler to the workers through a
//! JetStream work-queue stream:
//! - publishing waits for the server ack, so an accepted job is durable
//! - each worker pulls from one shared durable consumer
//! - a job is acked on receipt, so a crashed worker never replays a job
//!   whose upload file it may already have removed
//!
//! ## Streams
//! - `CATALOG_IMPORT_JOBS` - CSV product imports

use std::sync::Arc;

use anyhow::Result;
use async_nats::jetstream::{self, consumer::PullConsumer, Context as JsContext};
use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::services::import_worker::ImportWorker;
use crate::types::QueuedImportJob;

// Stream and consumer names
const STREAM_NAME: &str = "CATALOG_IMPORT_JOBS";
const CONSUMER_NAME: &str = "catalog_import_workers";
const SUBJECT: &str = "catalog.jobs.import";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Failed to encode import job: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Failed to publish import job: {0}")]
    Publish(String),
}

/// Producer side of the import queue
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &QueuedImportJob) -> Result<(), QueueError>;
}

/// JetStream work queue for import jobs
pub struct JetStreamJobQueue {
    js: JsContext,
}

impl JetStreamJobQueue {
    /// Create the queue, initializing the JetStream stream
    pub async fn new(js: JsContext) -> Result<Self> {
        let stream_config = jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![SUBJECT.to_string()],
            max_messages: 10_000,
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };
        js.get_or_create_stream(stream_config).await?;
        info!("JetStream import stream '{}' ready", STREAM_NAME);

        Ok(Self { js })
    }

    /// Run `concurrency` workers until `shutdown` fires.
    ///
    /// A worker finishes the job it holds before observing shutdown.
    pub async fn run_workers(
        &self,
        worker: Arc<ImportWorker>,
        concurrency: usize,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let stream = self.js.get_stream(STREAM_NAME).await?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(CONSUMER_NAME.to_string()),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            max_deliver: 3,
            ..Default::default()
        };
        let consumer: PullConsumer = stream
            .get_or_create_consumer(CONSUMER_NAME, consumer_config)
            .await?;
        info!("JetStream import consumer '{}' ready", CONSUMER_NAME);

        let mut workers = JoinSet::new();
        for worker_index in 0..concurrency.max(1) {
            let consumer = consumer.clone();
            let worker = Arc::clone(&worker);
            let shutdown = shutdown.clone();
            workers.spawn(async move {
                if let Err(e) = consume(worker_index, consumer, worker, shutdown).await {
                    error!("Import worker {} stopped: {}", worker_index, e);
                }
            });
        }
        info!("Started {} import worker(s)", concurrency.max(1));

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Import worker task failed: {}", e);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl JobQueue for JetStreamJobQueue {
    async fn enqueue(&self, job: &QueuedImportJob) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(job)?;
        self.js
            .publish(SUBJECT, payload.into())
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        info!(task_id = %job.task_id, "Import job enqueued");
        Ok(())
    }
}

/// Decode a queued job, logging and dropping anything else
fn decode_job(payload: &[u8]) -> Option<QueuedImportJob> {
    match serde_json::from_slice(payload) {
        Ok(job) => Some(job),
        Err(e) => {
            warn!("Dropping undecodable import job: {}", e);
            None
        }
    }
}

/// Pull jobs one at a time and run each to completion before the next
async fn consume(
    worker_index: usize,
    consumer: PullConsumer,
    worker: Arc<ImportWorker>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut messages = consumer.messages().await?;

    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = messages.next() => match next {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    error!("Error receiving import message: {}", e);
                    continue;
                }
                None => break,
            },
        };

        // ACK immediately to prevent redelivery during long processing
        if let Err(e) = msg.ack().await {
            error!("Failed to ack import job: {:?}", e);
        }

        let Some(job) = decode_job(&msg.payload) else {
            continue;
        };

        info!(task_id = %job.task_id, worker = worker_index, "Import job received");
        worker.process(&job).await;
    }

    info!("Import worker {} shutting down", worker_index);
    Ok(())
}
