//! Configuration management

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{self, Context, Result};

use crate::services::progress::DEFAULT_PROGRESS_TTL;
use crate::services::upsert::DEFAULT_BATCH_SIZE;
use crate::services::webhook_dispatcher::DEFAULT_WEBHOOK_TIMEOUT;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string
    pub database_url: String,

    /// NATS server URL
    pub nats_url: String,

    /// Optional NATS credentials, used only when both are set
    pub nats_user: Option<String>,
    pub nats_password: Option<String>,

    /// Address the HTTP API listens on
    pub http_addr: SocketAddr,

    /// Scratch directory for uploaded CSV files
    pub upload_dir: PathBuf,

    /// Largest accepted upload in bytes
    pub max_upload_size: u64,

    /// Candidates per upsert batch
    pub import_batch_size: usize,

    /// Retention window of progress records
    pub progress_ttl: Duration,

    /// Per-call timeout for webhook deliveries
    pub webhook_timeout: Duration,

    /// Import workers per process
    pub worker_concurrency: usize,

    /// Polling interval of the progress event stream
    pub stream_poll_interval: Duration,

    /// Consecutive failed polls before the event stream gives up
    pub stream_max_failures: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let nats_url =
            std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
        let nats_user = non_empty_var("NATS_USER");
        let nats_password = non_empty_var("NATS_PASSWORD");

        let http_addr = parse_var("HTTP_ADDR", "0.0.0.0:8000".parse::<SocketAddr>()?)?;
        let upload_dir = PathBuf::from(
            std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()),
        );
        let max_upload_size = parse_var("MAX_UPLOAD_SIZE", 500 * 1024 * 1024)?;

        let import_batch_size: usize = parse_var("IMPORT_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        if import_batch_size == 0 {
            anyhow::bail!("IMPORT_BATCH_SIZE must be at least 1");
        }

        let worker_concurrency: usize = parse_var("WORKER_CONCURRENCY", 1)?;
        if worker_concurrency == 0 {
            anyhow::bail!("WORKER_CONCURRENCY must be at least 1");
        }

        let progress_ttl = Duration::from_secs(parse_var(
            "PROGRESS_TTL_SECS",
            DEFAULT_PROGRESS_TTL.as_secs(),
        )?);
        let webhook_timeout = Duration::from_secs(parse_var(
            "WEBHOOK_TIMEOUT_SECS",
            DEFAULT_WEBHOOK_TIMEOUT.as_secs(),
        )?);
        let stream_poll_interval = Duration::from_millis(parse_var("STREAM_POLL_INTERVAL_MS", 1000)?);
        let stream_max_failures = parse_var("STREAM_MAX_FAILURES", 10)?;

        Ok(Self {
            database_url,
            nats_url,
            nats_user,
            nats_password,
            http_addr,
            upload_dir,
            max_upload_size,
            import_batch_size,
            progress_ttl,
            webhook_timeout,
            worker_concurrency,
            stream_poll_interval,
            stream_max_failures,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Parse `name` if set, else return `default`
fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{} has an invalid value: {:?}", name, raw))
}
