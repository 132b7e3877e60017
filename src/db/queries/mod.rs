//! Database queries

pub mod product;
pub mod webhook;
