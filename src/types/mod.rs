//! Type definitions

pub mod import_job;
pub mod product;
pub mod webhook;

pub use import_job::*;
pub use product::*;
pub use webhook::*;
