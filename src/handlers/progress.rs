//! Progress readers: a single-read endpoint and a server-sent event stream.
//!
//! Both read the progress store directly and never talk to the worker, so
//! they keep working across worker restarts and from any API replica.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::header::HeaderName;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::services::progress::{ProgressError, ProgressStore};
use crate::types::{ImportStatus, ProgressRecord};

const NOT_FOUND_MESSAGE: &str = "Task not found or expired";
const UNREADABLE_MESSAGE: &str = "Failed to parse progress data";

/// Polling parameters of the event stream
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub poll_interval: Duration,
    pub max_failures: u32,
}

/// One `data:` payload of the event stream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamFrame {
    Progress(ProgressRecord),
    /// Sent once before the stream gives up on an unreadable task
    Failed { status: ImportStatus, message: String },
}

/// GET /api/progress/:task_id
pub async fn get_progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<ProgressRecord>> {
    let task_id = Uuid::parse_str(&task_id).map_err(|_| ApiError::NotFound(NOT_FOUND_MESSAGE.into()))?;

    match state.progress.get(task_id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(ApiError::NotFound(NOT_FOUND_MESSAGE.into())),
        Err(ProgressError::Decode(e)) => Err(ApiError::Unavailable(format!(
            "Error parsing progress data: {}",
            e
        ))),
        Err(e) => Err(ApiError::Internal(e.into())),
    }
}

/// GET /api/stream/:task_id
pub async fn stream_progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let task_id = Uuid::parse_str(&task_id).ok();
    let frames = progress_events(state.progress.clone(), task_id, state.stream);

    let events = frames.map(|frame| {
        let event = Event::default()
            .json_data(&frame)
            .unwrap_or_else(|_| Event::default().data("{}"));
        Ok::<_, Infallible>(event)
    });

    (
        [(HeaderName::from_static("x-accel-buffering"), "no")],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
}

struct PollState {
    store: Arc<dyn ProgressStore>,
    task_id: Option<Uuid>,
    settings: StreamSettings,
    last_sent: Option<(ImportStatus, u64)>,
    failures: u32,
    polled: bool,
    finished: bool,
}

enum ReadFailure {
    Missing,
    Unreadable,
}

/// Poll the store until the task reaches a terminal status or keeps failing.
///
/// A frame is produced when the status or processed count changes. Missing
/// and undecodable records both count as failed reads; any good read resets
/// the count.
pub fn progress_events(
    store: Arc<dyn ProgressStore>,
    task_id: Option<Uuid>,
    settings: StreamSettings,
) -> impl Stream<Item = StreamFrame> + Send {
    let initial = PollState {
        store,
        task_id,
        settings,
        last_sent: None,
        failures: 0,
        polled: false,
        finished: false,
    };

    stream::unfold(initial, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            if state.polled {
                tokio::time::sleep(state.settings.poll_interval).await;
            }
            state.polled = true;

            let failure = match state.read().await {
                Ok(record) => {
                    state.failures = 0;
                    let key = (record.status, record.processed);
                    let terminal = record.status.is_terminal();
                    if terminal || state.last_sent != Some(key) {
                        state.last_sent = Some(key);
                        state.finished = terminal;
                        return Some((StreamFrame::Progress(record), state));
                    }
                    continue;
                }
                Err(failure) => failure,
            };

            state.failures += 1;
            if state.failures >= state.settings.max_failures.max(1) {
                let message = match failure {
                    ReadFailure::Missing => NOT_FOUND_MESSAGE,
                    ReadFailure::Unreadable => UNREADABLE_MESSAGE,
                };
                state.finished = true;
                let frame = StreamFrame::Failed {
                    status: ImportStatus::Error,
                    message: message.to_string(),
                };
                return Some((frame, state));
            }
        }
    })
}

impl PollState {
    async fn read(&self) -> Result<ProgressRecord, ReadFailure> {
        let Some(task_id) = self.task_id else {
            return Err(ReadFailure::Missing);
        };
        match self.store.get(task_id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(ReadFailure::Missing),
            Err(e) => {
                debug!(task_id = %task_id, "Progress read failed: {}", e);
                Err(ReadFailure::Unreadable)
            }
        }
    }
}
