//! Catalog Importer - asynchronous CSV product import service
//!
//! Serves the HTTP API and runs import workers that drain a NATS JetStream
//! work queue. Progress lives in a JetStream key-value bucket, products and
//! webhook listeners in PostgreSQL.

mod cli;
mod config;
mod db;
mod handlers;
mod services;
mod types;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::db::queries::product::PgProductStore;
use crate::db::queries::webhook::PgListenerSource;
use crate::handlers::{AppState, StreamSettings, UploadSettings};
use crate::services::import_worker::ImportWorker;
use crate::services::job_queue::JetStreamJobQueue;
use crate::services::progress::KvProgressStore;
use crate::services::upsert::UpsertEngine;
use crate::services::webhook_dispatcher::{EventNotifier, WebhookDispatcher};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs directory - use LOGS_DIR env var or default to ./logs
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "./logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "importer.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,catalog_importer=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    let command = cli.command();
    info!("Starting Catalog Importer ({:?})...", command);

    let config = Config::from_env()?;
    info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, pool_size(&config)).await?;
    info!("Connected to PostgreSQL");

    db::run_migrations(&pool).await?;
    if command == Command::Migrate {
        return Ok(());
    }

    let nats_client = connect_nats(&config).await?;
    info!("Connected to NATS at {}", config.nats_url);
    let js = async_nats::jetstream::new(nats_client);

    let progress = Arc::new(KvProgressStore::new(&js, config.progress_ttl).await?);
    let queue = Arc::new(JetStreamJobQueue::new(js).await?);
    let notifier: Arc<dyn EventNotifier> = Arc::new(WebhookDispatcher::new(
        Arc::new(PgListenerSource::new(pool.clone())),
        config.webhook_timeout,
    )?);

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_ctrl_c(shutdown.clone()));

    let mut tasks = tokio::task::JoinSet::new();

    if command.runs_workers() {
        let worker = Arc::new(ImportWorker::new(
            UpsertEngine::new(
                Arc::new(PgProductStore::new(pool.clone())),
                config.import_batch_size,
            ),
            progress.clone(),
            notifier.clone(),
        ));
        let queue = queue.clone();
        let concurrency = config.worker_concurrency;
        let shutdown = shutdown.clone();
        tasks.spawn(async move { queue.run_workers(worker, concurrency, shutdown).await });
    }

    if command.runs_api() {
        let state = AppState {
            pool: pool.clone(),
            progress,
            queue,
            notifier,
            uploads: UploadSettings {
                dir: config.upload_dir.clone(),
                max_size: config.max_upload_size,
            },
            stream: StreamSettings {
                poll_interval: config.stream_poll_interval,
                max_failures: config.stream_max_failures,
            },
        };
        let addr = config.http_addr;
        let shutdown = shutdown.clone();
        tasks.spawn(async move { serve_api(state, addr, shutdown).await });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Service error: {:#}", e);
                shutdown.cancel();
            }
            Err(e) => {
                error!("Service task failed: {}", e);
                shutdown.cancel();
            }
        }
    }

    pool.close().await;
    info!("Catalog Importer stopped");
    Ok(())
}

/// Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth)
async fn connect_nats(config: &Config) -> Result<async_nats::Client> {
    let client = match (&config.nats_user, &config.nats_password) {
        (Some(user), Some(password)) => {
            async_nats::ConnectOptions::new()
                .user_and_password(user.clone(), password.clone())
                .connect(&config.nats_url)
                .await
        }
        _ => async_nats::connect(&config.nats_url).await,
    };
    client.with_context(|| format!("Failed to connect to NATS at {}", config.nats_url))
}

/// Room for every worker plus the API's own queries
fn pool_size(config: &Config) -> u32 {
    (config.worker_concurrency as u32).saturating_add(10)
}

async fn serve_api(state: AppState, addr: std::net::SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, handlers::router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server error")?;

    info!("HTTP API stopped");
    Ok(())
}

async fn watch_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
    shutdown.cancel();
}
