//! Product database queries

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgDatabaseError;
use sqlx::{PgExecutor, PgPool};

use crate::services::upsert::{CatalogError, ProductStore};
use crate::types::product::{Product, ProductCandidate, ProductListQuery, UpdateProductRequest};

const PRODUCT_COLUMNS: &str = "id, sku, name, description, active, created_at, updated_at";

/// List products with optional substring filters, newest first.
///
/// Returns the requested page and the total number of matching rows.
pub async fn list_products(pool: &PgPool, query: &ProductListQuery) -> Result<(Vec<Product>, i64)> {
    let filter = r#"
        WHERE ($1::text IS NULL OR sku ILIKE '%' || $1 || '%')
          AND ($2::text IS NULL OR name ILIKE '%' || $2 || '%')
          AND ($3::text IS NULL OR description ILIKE '%' || $3 || '%')
          AND ($4::bool IS NULL OR active = $4)
    "#;

    let items = sqlx::query_as::<_, Product>(&format!(
        "SELECT {} FROM products {} ORDER BY id DESC LIMIT $5 OFFSET $6",
        PRODUCT_COLUMNS, filter
    ))
    .bind(&query.sku)
    .bind(&query.name)
    .bind(&query.description)
    .bind(query.active)
    .bind(query.per_page)
    .bind(query.offset())
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM products {}", filter))
        .bind(&query.sku)
        .bind(&query.name)
        .bind(&query.description)
        .bind(query.active)
        .fetch_one(pool)
        .await?;

    Ok((items, total))
}

/// Get product by ID
pub async fn get_product(pool: &PgPool, id: i64) -> Result<Option<Product>> {
    let product = sqlx::query_as::<_, Product>(&format!(
        "SELECT {} FROM products WHERE id = $1",
        PRODUCT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(product)
}

/// Find a product by SKU, ignoring case
pub async fn find_product_by_sku(pool: &PgPool, sku: &str) -> Result<Option<Product>> {
    let product = sqlx::query_as::<_, Product>(&format!(
        "SELECT {} FROM products WHERE LOWER(sku) = LOWER($1)",
        PRODUCT_COLUMNS
    ))
    .bind(sku)
    .fetch_optional(pool)
    .await?;

    Ok(product)
}

/// Create a single product
pub async fn create_product(pool: &PgPool, candidate: &ProductCandidate) -> Result<Product, CatalogError> {
    sqlx::query_as::<_, Product>(&format!(
        r#"
        INSERT INTO products (sku, name, description, active, created_at, updated_at)
        VALUES ($1, $2, $3, $4, NOW(), NOW())
        RETURNING {}
        "#,
        PRODUCT_COLUMNS
    ))
    .bind(&candidate.sku)
    .bind(&candidate.name)
    .bind(&candidate.description)
    .bind(candidate.active)
    .fetch_one(pool)
    .await
    .map_err(|e| map_insert_error(e, &candidate.sku))
}

/// Update name, description and active. Absent fields keep their value.
pub async fn update_product(
    pool: &PgPool,
    id: i64,
    req: &UpdateProductRequest,
) -> Result<Option<Product>> {
    let product = sqlx::query_as::<_, Product>(&format!(
        r#"
        UPDATE products
        SET
            name = COALESCE($2, name),
            description = COALESCE($3, description),
            active = COALESCE($4, active),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        PRODUCT_COLUMNS
    ))
    .bind(id)
    .bind(&req.name)
    .bind(&req.description)
    .bind(req.active)
    .fetch_optional(pool)
    .await?;

    Ok(product)
}

/// Delete a product, returning the row as it was
pub async fn delete_product(pool: &PgPool, id: i64) -> Result<Option<Product>> {
    let product = sqlx::query_as::<_, Product>(&format!(
        "DELETE FROM products WHERE id = $1 RETURNING {}",
        PRODUCT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(product)
}

/// Delete every product
pub async fn delete_all_products(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM products").execute(pool).await?;
    Ok(result.rows_affected())
}

// ==========================================================================
// Import store
// ==========================================================================

/// Postgres product store used by the import pipeline.
///
/// Bulk writes go through `UNNEST`; a batch's insert and update share one
/// transaction.
#[derive(Clone)]
pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Turn a unique violation on `ix_products_sku_lower` into a catalog conflict
fn map_insert_error(e: sqlx::Error, sku: &str) -> CatalogError {
    match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            let conflicting = db_err
                .try_downcast_ref::<PgDatabaseError>()
                .and_then(|pg| pg.detail())
                .and_then(conflicting_key)
                .unwrap_or(sku);
            CatalogError::UniqueViolation(conflicting.to_string())
        }
        _ => CatalogError::Storage(e),
    }
}

/// Extract the key from `Key (lower((sku)::text))=(abc) already exists.`
fn conflicting_key(detail: &str) -> Option<&str> {
    let start = detail.find(")=(")? + 3;
    let end = detail.rfind(") already exists")?;
    (start <= end).then(|| &detail[start..end])
}

fn candidate_columns(
    candidates: &[ProductCandidate],
) -> (Vec<String>, Vec<String>, Vec<Option<String>>, Vec<bool>) {
    let mut skus = Vec::with_capacity(candidates.len());
    let mut names = Vec::with_capacity(candidates.len());
    let mut descriptions = Vec::with_capacity(candidates.len());
    let mut actives = Vec::with_capacity(candidates.len());
    for c in candidates {
        skus.push(c.sku.clone());
        names.push(c.name.clone());
        descriptions.push(c.description.clone());
        actives.push(c.active);
    }
    (skus, names, descriptions, actives)
}

async fn insert_rows<'e, E>(executor: E, candidates: &[ProductCandidate]) -> Result<(), CatalogError>
where
    E: PgExecutor<'e>,
{
    let (skus, names, descriptions, actives) = candidate_columns(candidates);

    sqlx::query(
        r#"
        INSERT INTO products (sku, name, description, active, created_at, updated_at)
        SELECT sku, name, description, active, NOW(), NOW()
        FROM UNNEST($1::varchar[], $2::varchar[], $3::text[], $4::bool[])
            AS t(sku, name, description, active)
        "#,
    )
    .bind(&skus)
    .bind(&names)
    .bind(&descriptions)
    .bind(&actives)
    .execute(executor)
    .await
    .map_err(|e| map_insert_error(e, skus.first().map(String::as_str).unwrap_or_default()))?;

    Ok(())
}

/// Overwrite the given ids, returning those that still exist
async fn update_rows<'e, E>(executor: E, updates: &[(i64, ProductCandidate)]) -> Result<Vec<i64>, CatalogError>
where
    E: PgExecutor<'e>,
{
    let ids: Vec<i64> = updates.iter().map(|(id, _)| *id).collect();
    let candidates: Vec<ProductCandidate> = updates.iter().map(|(_, c)| c.clone()).collect();
    let (_, names, descriptions, actives) = candidate_columns(&candidates);

    let updated = sqlx::query_scalar(
        r#"
        UPDATE products AS p
        SET
            name = u.name,
            description = u.description,
            active = u.active,
            updated_at = NOW()
        FROM UNNEST($1::bigint[], $2::varchar[], $3::text[], $4::bool[])
            AS u(id, name, description, active)
        WHERE p.id = u.id
        RETURNING p.id
        "#,
    )
    .bind(&ids)
    .bind(&names)
    .bind(&descriptions)
    .bind(&actives)
    .fetch_all(executor)
    .await?;

    Ok(updated)
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn find_ids_by_keys(&self, keys: &[String]) -> Result<HashMap<String, i64>, CatalogError> {
        // Rows come back under the caller's key, whatever LOWER() makes of it
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT k.key, p.id
            FROM UNNEST($1::text[]) AS k(key)
            JOIN products p ON LOWER(p.sku) = LOWER(k.key)
            "#,
        )
        .bind(keys)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn write_batch(
        &self,
        inserts: &[ProductCandidate],
        updates: &[(i64, ProductCandidate)],
    ) -> Result<Vec<i64>, CatalogError> {
        let mut tx = self.pool.begin().await?;

        if !inserts.is_empty() {
            insert_rows(&mut *tx, inserts).await?;
        }
        let updated = if updates.is_empty() {
            Vec::new()
        } else {
            update_rows(&mut *tx, updates).await?
        };

        tx.commit().await?;
        Ok(updated)
    }

    async fn insert_one(&self, candidate: &ProductCandidate) -> Result<i64, CatalogError> {
        sqlx::query_scalar(
            r#"
            INSERT INTO products (sku, name, description, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(&candidate.sku)
        .bind(&candidate.name)
        .bind(&candidate.description)
        .bind(candidate.active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &candidate.sku))
    }

    async fn update_many(&self, updates: &[(i64, ProductCandidate)]) -> Result<Vec<i64>, CatalogError> {
        update_rows(&self.pool, updates).await
    }

    async fn update_by_key(&self, candidate: &ProductCandidate) -> Result<Option<i64>, CatalogError> {
        let id = sqlx::query_scalar(
            r#"
            UPDATE products
            SET name = $2, description = $3, active = $4, updated_at = NOW()
            WHERE LOWER(sku) = LOWER($1)
            RETURNING id
            "#,
        )
        .bind(&candidate.sku)
        .bind(&candidate.name)
        .bind(&candidate.description)
        .bind(candidate.active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }
}
