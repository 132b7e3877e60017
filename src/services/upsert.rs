//! Batched, case-insensitive insert-or-update of import candidates
//!
//! Each batch is applied in two steps:
//! 1. one lookup resolving every lowercased SKU of the batch to an existing id
//! 2. one transaction inserting unknown keys and overwriting known ones
//!
//! A unique violation rolls the transaction back: another importer created
//! one of the keys after the lookup. The batch is then replayed outside a
//! transaction, turning each conflicting insert into an update by key.
//! Updates whose product was deleted in the meantime are written again.

use std::collections::{HashMap, HashSet};
use std::ops::AddAssign;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::ProductCandidate;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Product with SKU '{0}' already exists")]
    UniqueViolation(String),
    #[error("Catalog storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Write access to the product catalog used by the import pipeline
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Ids of existing products matching `keys`, keyed exactly as passed in
    async fn find_ids_by_keys(&self, keys: &[String]) -> Result<HashMap<String, i64>, CatalogError>;

    /// Insert `inserts` and overwrite `updates` in one transaction.
    ///
    /// Returns the ids that were updated; an id missing from the result no
    /// longer exists. On error nothing is written.
    async fn write_batch(
        &self,
        inserts: &[ProductCandidate],
        updates: &[(i64, ProductCandidate)],
    ) -> Result<Vec<i64>, CatalogError>;

    async fn insert_one(&self, candidate: &ProductCandidate) -> Result<i64, CatalogError>;

    /// Overwrite name, description and active of the given ids. SKUs are untouched.
    /// Returns the ids that still existed.
    async fn update_many(&self, updates: &[(i64, ProductCandidate)]) -> Result<Vec<i64>, CatalogError>;

    /// Update the product matching the candidate's key, if any
    async fn update_by_key(&self, candidate: &ProductCandidate) -> Result<Option<i64>, CatalogError>;
}

/// Created/updated counters for a batch or a whole import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub created: u64,
    pub updated: u64,
}

impl UpsertCounts {
    pub fn total(&self) -> u64 {
        self.created + self.updated
    }
}

impl AddAssign for UpsertCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.created += rhs.created;
        self.updated += rhs.updated;
    }
}

/// Writes of one batch after folding repeated keys and ids
#[derive(Debug, Default)]
struct BatchPlan {
    inserts: Vec<ProductCandidate>,
    updates: Vec<(i64, ProductCandidate)>,
    counts: UpsertCounts,
}

/// Split a batch into inserts and updates.
///
/// Every candidate is counted exactly once: a key seen for the first time
/// and absent from the catalog is a creation, everything else is an update.
/// A repeated key keeps the SKU of its first row and the values of its last.
fn plan_batch(batch: &[ProductCandidate], existing: &HashMap<String, i64>) -> BatchPlan {
    let mut plan = BatchPlan::default();
    let mut insert_positions: HashMap<String, usize> = HashMap::new();
    let mut update_positions: HashMap<i64, usize> = HashMap::new();

    for candidate in batch {
        let key = candidate.key();
        if let Some(&id) = existing.get(&key) {
            plan.counts.updated += 1;
            match update_positions.get(&id) {
                Some(&pos) => plan.updates[pos].1 = candidate.clone(),
                None => {
                    update_positions.insert(id, plan.updates.len());
                    plan.updates.push((id, candidate.clone()));
                }
            }
        } else if let Some(&pos) = insert_positions.get(&key) {
            plan.counts.updated += 1;
            let row = &mut plan.inserts[pos];
            row.name = candidate.name.clone();
            row.description = candidate.description.clone();
            row.active = candidate.active;
        } else {
            plan.counts.created += 1;
            insert_positions.insert(key, plan.inserts.len());
            plan.inserts.push(candidate.clone());
        }
    }

    plan
}

pub struct UpsertEngine {
    store: Arc<dyn ProductStore>,
    batch_size: usize,
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn ProductStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Split candidates into batches in file order
    pub fn batches<'a>(
        &self,
        candidates: &'a [ProductCandidate],
    ) -> impl Iterator<Item = &'a [ProductCandidate]> {
        candidates.chunks(self.batch_size)
    }

    /// Apply one batch against the catalog's current state.
    ///
    /// Repeated keys within the batch end with the last row's values.
    pub async fn upsert_batch(&self, batch: &[ProductCandidate]) -> Result<UpsertCounts, CatalogError> {
        if batch.is_empty() {
            return Ok(UpsertCounts::default());
        }

        let keys: Vec<String> = batch
            .iter()
            .map(ProductCandidate::key)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let existing = self.store.find_ids_by_keys(&keys).await?;

        let plan = plan_batch(batch, &existing);
        let mut counts = plan.counts;

        let updated = match self.store.write_batch(&plan.inserts, &plan.updates).await {
            Ok(updated) => updated,
            Err(CatalogError::UniqueViolation(sku)) => {
                warn!(
                    "Batch insert hit existing SKU '{}', retrying {} rows individually",
                    sku,
                    plan.inserts.len()
                );
                self.replay_rows(&plan, &mut counts).await?
            }
            Err(e) => return Err(e),
        };

        self.restore_vanished(&plan.updates, &updated, &mut counts).await?;

        debug!(
            "Upserted batch of {}: {} created, {} updated",
            batch.len(),
            counts.created,
            counts.updated
        );
        Ok(counts)
    }

    /// Apply a rolled back batch statement by statement
    async fn replay_rows(&self, plan: &BatchPlan, counts: &mut UpsertCounts) -> Result<Vec<i64>, CatalogError> {
        let updated = if plan.updates.is_empty() {
            Vec::new()
        } else {
            self.store.update_many(&plan.updates).await?
        };

        for candidate in &plan.inserts {
            if !self.place_row(candidate).await? {
                counts.created -= 1;
                counts.updated += 1;
            }
        }

        Ok(updated)
    }

    /// Write again every planned update whose product disappeared
    async fn restore_vanished(
        &self,
        updates: &[(i64, ProductCandidate)],
        updated: &[i64],
        counts: &mut UpsertCounts,
    ) -> Result<(), CatalogError> {
        if updated.len() == updates.len() {
            return Ok(());
        }

        let updated: HashSet<i64> = updated.iter().copied().collect();
        for (id, candidate) in updates.iter().filter(|(id, _)| !updated.contains(id)) {
            warn!(
                "Product {} (SKU '{}') was deleted during import, writing it again",
                id, candidate.sku
            );
            if self.place_row(candidate).await? {
                counts.updated -= 1;
                counts.created += 1;
            }
        }

        Ok(())
    }

    /// Insert the candidate, or update by key when another writer holds it.
    /// Returns `true` if a new product was created.
    async fn place_row(&self, candidate: &ProductCandidate) -> Result<bool, CatalogError> {
        match self.store.insert_one(candidate).await {
            Ok(_) => Ok(true),
            Err(CatalogError::UniqueViolation(_)) => match self.store.update_by_key(candidate).await? {
                Some(_) => Ok(false),
                None => Err(CatalogError::UniqueViolation(candidate.sku.clone())),
            },
            Err(e) => Err(e),
        }
    }
}
