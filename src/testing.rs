//! In-memory stand-ins for the catalog, progress bucket, job queue and
//! webhook plumbing, shared by unit tests across the crate.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::services::job_queue::{JobQueue, QueueError};
use crate::services::progress::{ProgressError, ProgressStore};
use crate::services::upsert::{CatalogError, ProductStore};
use crate::services::webhook_dispatcher::{EventNotifier, ListenerSource};
use crate::types::{
    DeliveryResult, Product, ProductCandidate, ProgressRecord, QueuedImportJob, Webhook,
    WebhookEvent, WebhookEventType,
};

pub fn candidate(sku: &str, name: &str) -> ProductCandidate {
    ProductCandidate {
        sku: sku.to_string(),
        name: name.to_string(),
        description: None,
        active: true,
    }
}

pub fn webhook(id: i64, url: &str, event_type: WebhookEventType) -> Webhook {
    let now = Utc::now();
    Webhook {
        id,
        url: url.to_string(),
        event_type,
        enabled: true,
        created_at: now,
        updated_at: now,
    }
}

// ==========================================================================
// Product catalog
// ==========================================================================

#[derive(Default)]
struct CatalogState {
    products: Vec<Product>,
    next_id: i64,
    writes: usize,
    fail_after_writes: Option<usize>,
    injected: Option<ProductCandidate>,
    vanishing: Option<String>,
}

impl CatalogState {
    fn find(&self, key: &str) -> Option<usize> {
        self.products.iter().position(|p| p.sku.to_lowercase() == key)
    }

    fn add(&mut self, candidate: &ProductCandidate) -> i64 {
        self.next_id += 1;
        let now = Utc::now();
        self.products.push(Product {
            id: self.next_id,
            sku: candidate.sku.clone(),
            name: candidate.name.clone(),
            description: candidate.description.clone(),
            active: candidate.active,
            created_at: now,
            updated_at: now,
        });
        self.next_id
    }

    fn insert_all(&mut self, candidates: &[ProductCandidate]) -> Result<(), CatalogError> {
        let mut seen = HashSet::new();
        for candidate in candidates {
            let key = candidate.key();
            if self.find(&key).is_some() || !seen.insert(key) {
                return Err(CatalogError::UniqueViolation(candidate.sku.clone()));
            }
        }
        for candidate in candidates {
            self.add(candidate);
        }
        Ok(())
    }

    fn update_all(&mut self, updates: &[(i64, ProductCandidate)]) -> Vec<i64> {
        let mut updated = Vec::new();
        for (id, candidate) in updates {
            if let Some(index) = self.products.iter().position(|p| p.id == *id) {
                self.overwrite(index, candidate);
                updated.push(*id);
            }
        }
        updated
    }

    fn apply(
        &mut self,
        inserts: &[ProductCandidate],
        updates: &[(i64, ProductCandidate)],
    ) -> Result<Vec<i64>, CatalogError> {
        if !inserts.is_empty() {
            self.begin_write()?;
            self.insert_all(inserts)?;
        }
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        self.begin_write()?;
        Ok(self.update_all(updates))
    }

    fn overwrite(&mut self, index: usize, candidate: &ProductCandidate) {
        let product = &mut self.products[index];
        product.name = candidate.name.clone();
        product.description = candidate.description.clone();
        product.active = candidate.active;
        product.updated_at = Utc::now();
    }

    fn begin_write(&mut self) -> Result<(), CatalogError> {
        if let Some(limit) = self.fail_after_writes {
            if self.writes >= limit {
                return Err(CatalogError::Storage(sqlx::Error::Protocol(
                    "simulated storage failure".to_string(),
                )));
            }
        }
        self.writes += 1;
        Ok(())
    }
}

/// Product store with the unique lowercase-SKU constraint of the real table
#[derive(Default)]
pub struct MemoryProductStore {
    state: Mutex<CatalogState>,
}

impl MemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, candidate: ProductCandidate) -> i64 {
        self.state.lock().add(&candidate)
    }

    pub fn len(&self) -> usize {
        self.state.lock().products.len()
    }

    pub fn get_by_key(&self, key: &str) -> Option<Product> {
        let state = self.state.lock();
        state.find(&key.to_lowercase()).map(|i| state.products[i].clone())
    }

    /// All products ordered by id
    pub fn snapshot(&self) -> Vec<Product> {
        let mut products = self.state.lock().products.clone();
        products.sort_by_key(|p| p.id);
        products
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    /// Fail every write after the first `limit` ones
    pub fn fail_after_writes(&self, limit: usize) {
        self.state.lock().fail_after_writes = Some(limit);
    }

    /// Simulate another importer creating `candidate` right before the next batch write
    pub fn inject_before_next_batch(&self, candidate: ProductCandidate) {
        self.state.lock().injected = Some(candidate);
    }

    /// Simulate a concurrent delete of `key` right before the next batch write
    pub fn delete_before_next_batch(&self, key: &str) {
        self.state.lock().vanishing = Some(key.to_lowercase());
    }
}

#[async_trait]
impl ProductStore for MemoryProductStore {
    async fn find_ids_by_keys(&self, keys: &[String]) -> Result<HashMap<String, i64>, CatalogError> {
        let state = self.state.lock();
        Ok(keys
            .iter()
            .filter_map(|key| state.find(key).map(|i| (key.clone(), state.products[i].id)))
            .collect())
    }

    async fn write_batch(
        &self,
        inserts: &[ProductCandidate],
        updates: &[(i64, ProductCandidate)],
    ) -> Result<Vec<i64>, CatalogError> {
        let mut state = self.state.lock();
        if let Some(injected) = state.injected.take() {
            state.add(&injected);
        }
        if let Some(key) = state.vanishing.take() {
            if let Some(index) = state.find(&key) {
                state.products.remove(index);
            }
        }

        // Rolled back on any failure below
        let products = state.products.clone();
        let next_id = state.next_id;

        let result = state.apply(inserts, updates);
        if result.is_err() {
            state.products = products;
            state.next_id = next_id;
        }
        result
    }

    async fn insert_one(&self, candidate: &ProductCandidate) -> Result<i64, CatalogError> {
        let mut state = self.state.lock();
        state.begin_write()?;
        if state.find(&candidate.key()).is_some() {
            return Err(CatalogError::UniqueViolation(candidate.sku.clone()));
        }
        Ok(state.add(candidate))
    }

    async fn update_many(&self, updates: &[(i64, ProductCandidate)]) -> Result<Vec<i64>, CatalogError> {
        let mut state = self.state.lock();
        state.begin_write()?;
        Ok(state.update_all(updates))
    }

    async fn update_by_key(&self, candidate: &ProductCandidate) -> Result<Option<i64>, CatalogError> {
        let mut state = self.state.lock();
        state.begin_write()?;
        match state.find(&candidate.key()) {
            Some(index) => {
                state.overwrite(index, candidate);
                Ok(Some(state.products[index].id))
            }
            None => Ok(None),
        }
    }
}

// ==========================================================================
// Progress bucket
// ==========================================================================

/// Progress store honoring a per-key retention window like the KV bucket
pub struct MemoryProgressStore {
    ttl: Duration,
    entries: Mutex<HashMap<Uuid, (Vec<u8>, Instant)>>,
    history: Mutex<Vec<ProgressRecord>>,
}

impl MemoryProgressStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Store arbitrary bytes under a task id, bypassing encoding
    pub fn put_raw(&self, task_id: Uuid, bytes: Vec<u8>) {
        self.entries.lock().insert(task_id, (bytes, Instant::now()));
    }

    /// Every record written for `task_id`, oldest first
    pub fn history(&self, task_id: Uuid) -> Vec<ProgressRecord> {
        self.history
            .lock()
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Every record written, across all tasks
    pub fn all_history(&self) -> Vec<ProgressRecord> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn put(&self, record: &ProgressRecord) -> Result<(), ProgressError> {
        let bytes = serde_json::to_vec(record)?;
        self.entries.lock().insert(record.task_id, (bytes, Instant::now()));
        self.history.lock().push(record.clone());
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<ProgressRecord>, ProgressError> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(&task_id) {
            None => return Ok(None),
            Some((_, written)) => written.elapsed() >= self.ttl,
        };
        if expired {
            entries.remove(&task_id);
            return Ok(None);
        }
        match entries.get(&task_id) {
            Some((bytes, _)) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, task_id: Uuid) -> Result<(), ProgressError> {
        self.entries.lock().remove(&task_id);
        Ok(())
    }
}

// ==========================================================================
// Job queue
// ==========================================================================

#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<QueuedImportJob>>,
    fail: bool,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue whose every publish is rejected
    pub fn failing() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn jobs(&self) -> Vec<QueuedImportJob> {
        self.jobs.lock().clone()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &QueuedImportJob) -> Result<(), QueueError> {
        if self.fail {
            return Err(QueueError::Publish("queue unavailable".to_string()));
        }
        self.jobs.lock().push(job.clone());
        Ok(())
    }
}

// ==========================================================================
// Webhooks
// ==========================================================================

pub struct StaticListeners {
    webhooks: Vec<Webhook>,
}

impl StaticListeners {
    pub fn new(webhooks: Vec<Webhook>) -> Self {
        Self { webhooks }
    }
}

#[async_trait]
impl ListenerSource for StaticListeners {
    async fn enabled_listeners(&self, event_type: WebhookEventType) -> anyhow::Result<Vec<Webhook>> {
        Ok(self
            .webhooks
            .iter()
            .filter(|w| w.enabled && w.event_type == event_type)
            .cloned()
            .collect())
    }
}

/// Notifier that records events instead of sending them
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<WebhookEvent>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier reporting every delivery as failed
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<WebhookEvent> {
        self.events.lock().clone()
    }

    fn result(&self, webhook_id: Option<i64>) -> DeliveryResult {
        if self.fail {
            DeliveryResult {
                webhook_id,
                error: Some("connection refused".to_string()),
                ..Default::default()
            }
        } else {
            DeliveryResult {
                webhook_id,
                success: true,
                status_code: Some(200),
                ..Default::default()
            }
        }
    }
}

#[async_trait]
impl EventNotifier for RecordingNotifier {
    async fn notify(&self, event: &WebhookEvent) -> Vec<DeliveryResult> {
        self.events.lock().push(event.clone());
        vec![self.result(None)]
    }

    async fn deliver_to(&self, webhook: &Webhook, event: &WebhookEvent) -> DeliveryResult {
        self.events.lock().push(event.clone());
        self.result(Some(webhook.id))
    }
}
