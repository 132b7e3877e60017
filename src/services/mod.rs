//! Import pipeline services

pub mod csv_import;
pub mod import_worker;
pub mod job_queue;
pub mod progress;
pub mod upsert;
pub mod webhook_dispatcher;
