//! Product catalog types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const MAX_SKU_LEN: usize = 255;
pub const MAX_NAME_LEN: usize = 500;

/// Product entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row ready to be written to the catalog by the import pipeline.
///
/// The `sku` keeps the casing from the source file; matching against the
/// catalog always goes through [`ProductCandidate::key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCandidate {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
}

impl ProductCandidate {
    /// Case-insensitive catalog key
    pub fn key(&self) -> String {
        self.sku.to_lowercase()
    }
}

/// Request to create a product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl CreateProductRequest {
    /// Validate and normalize into a catalog candidate.
    pub fn into_candidate(self) -> Result<ProductCandidate, String> {
        let sku = self.sku.trim().to_string();
        if sku.is_empty() {
            return Err("SKU cannot be empty".to_string());
        }
        if sku.chars().count() > MAX_SKU_LEN {
            return Err(format!("SKU must be at most {} characters", MAX_SKU_LEN));
        }
        validate_name(&self.name)?;

        Ok(ProductCandidate {
            sku,
            name: self.name,
            description: self.description,
            active: self.active,
        })
    }
}

/// Request to update a product. The SKU is immutable and not accepted here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub active: Option<bool>,
}

impl UpdateProductRequest {
    pub fn validate(&self) -> Result<(), String> {
        match &self.name {
            Some(name) => validate_name(name),
            None => Ok(()),
        }
    }
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Name cannot be empty".to_string());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("Name must be at most {} characters", MAX_NAME_LEN));
    }
    Ok(())
}

/// Query string for the product list
#[derive(Debug, Clone, Deserialize)]
pub struct ProductListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
    pub sku: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub active: Option<bool>,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    50
}

impl Default for ProductListQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
            sku: None,
            name: None,
            description: None,
            active: None,
        }
    }
}

impl ProductListQuery {
    pub fn validate(&self) -> Result<(), String> {
        if self.page < 1 {
            return Err("page must be >= 1".to_string());
        }
        if !(1..=100).contains(&self.per_page) {
            return Err("per_page must be between 1 and 100".to_string());
        }
        Ok(())
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }
}

/// Paginated product list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductListResponse {
    pub items: Vec<Product>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub pages: i64,
}

impl ProductListResponse {
    pub fn new(items: Vec<Product>, total: i64, page: i64, per_page: i64) -> Self {
        let pages = if total > 0 { (total + per_page - 1) / per_page } else { 0 };
        Self {
            items,
            total,
            page,
            per_page,
            pages,
        }
    }
}

/// Response for deleting the whole catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkDeleteResponse {
    pub message: String,
    pub count: u64,
}
