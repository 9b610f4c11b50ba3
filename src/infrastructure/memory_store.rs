//! In-memory store for tests and dry runs
//!
//! Batches stage their writes locally and apply them under one write lock
//! on commit, so a dropped or rolled back batch leaves no trace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::domain::errors::{TrackerError, TrackerResult};
use crate::domain::product::{
    PricePoint, ProductEntity, ProductFilter, ScrapeRunLog, StoredPricePoint, TrackedSearchTerm,
};
use crate::domain::repositories::{ProductBatch, ProductStore, RunLogRepository, SearchTermRepository};

#[derive(Debug, Default)]
struct MemoryState {
    products: BTreeMap<String, ProductEntity>,
    price_points: Vec<StoredPricePoint>,
    next_point_id: i64,
    terms: BTreeMap<String, TrackedSearchTerm>,
    run_logs: Vec<ScrapeRunLog>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every batch write fails with a store error
    pub fn set_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn product_count(&self) -> usize {
        self.state.read().await.products.len()
    }

    pub async fn price_point_count(&self) -> usize {
        self.state.read().await.price_points.len()
    }
}

pub struct MemoryBatch {
    state: Arc<RwLock<MemoryState>>,
    fail_writes: Arc<AtomicBool>,
    staged_products: HashMap<String, ProductEntity>,
    staged_points: Vec<PricePoint>,
}

impl MemoryBatch {
    fn check_writable(&self) -> TrackerResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TrackerError::StoreState("write rejected by store".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductBatch for MemoryBatch {
    async fn find_by_sku_id(&mut self, sku_id: &str) -> TrackerResult<Option<ProductEntity>> {
        if let Some(staged) = self.staged_products.get(sku_id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.state.read().await.products.get(sku_id).cloned())
    }

    async fn upsert_entity(&mut self, entity: &ProductEntity) -> TrackerResult<()> {
        self.check_writable()?;
        self.staged_products.insert(entity.sku_id.clone(), entity.clone());
        Ok(())
    }

    async fn append_price_point(&mut self, point: &PricePoint) -> TrackerResult<()> {
        self.check_writable()?;
        self.staged_points.push(point.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> TrackerResult<()> {
        let batch = *self;
        let mut state = batch.state.write().await;

        if let Some(orphan) = batch
            .staged_points
            .iter()
            .find(|p| !batch.staged_products.contains_key(&p.sku_id) && !state.products.contains_key(&p.sku_id))
        {
            return Err(TrackerError::StoreState(format!(
                "price point references unknown sku '{}'",
                orphan.sku_id
            )));
        }

        state.products.extend(batch.staged_products);
        for point in batch.staged_points {
            state.next_point_id += 1;
            let id = state.next_point_id;
            state.price_points.push(StoredPricePoint { id, point });
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> TrackerResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn begin_batch(&self) -> TrackerResult<Box<dyn ProductBatch>> {
        Ok(Box::new(MemoryBatch {
            state: Arc::clone(&self.state),
            fail_writes: Arc::clone(&self.fail_writes),
            staged_products: HashMap::new(),
            staged_points: Vec::new(),
        }))
    }

    async fn find_by_sku_id(&self, sku_id: &str) -> TrackerResult<Option<ProductEntity>> {
        Ok(self.state.read().await.products.get(sku_id).cloned())
    }

    async fn query(&self, filter: &ProductFilter) -> TrackerResult<Vec<ProductEntity>> {
        let state = self.state.read().await;
        let mut hits: Vec<ProductEntity> = state.products.values().filter(|e| filter.matches(e)).cloned().collect();
        hits.sort_by(|a, b| {
            (&a.base_product_id, &a.variant_label, &a.sku_id).cmp(&(&b.base_product_id, &b.variant_label, &b.sku_id))
        });
        Ok(hits)
    }

    async fn price_history(
        &self,
        sku_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> TrackerResult<Vec<StoredPricePoint>> {
        let state = self.state.read().await;
        let mut points: Vec<StoredPricePoint> = state
            .price_points
            .iter()
            .filter(|p| p.point.sku_id == sku_id && since.is_none_or(|s| p.point.observed_at >= s))
            .cloned()
            .collect();
        points.sort_by(|a, b| a.point.observed_at.cmp(&b.point.observed_at).then(a.id.cmp(&b.id)));
        Ok(points)
    }

    async fn rewrite_price_point(
        &self,
        point_id: i64,
        sale_price: Option<f64>,
        original_price: Option<f64>,
    ) -> TrackerResult<()> {
        let mut state = self.state.write().await;
        let stored = state
            .price_points
            .iter_mut()
            .find(|p| p.id == point_id)
            .ok_or_else(|| TrackerError::not_found("price point", point_id.to_string()))?;
        stored.point.sale_price = sale_price;
        stored.point.original_price = original_price;
        Ok(())
    }

    async fn save_tracking(&self, entities: &[ProductEntity]) -> TrackerResult<()> {
        let mut state = self.state.write().await;
        for entity in entities {
            if let Some(existing) = state.products.get_mut(&entity.sku_id) {
                existing.is_tracked = entity.is_tracked;
                existing.tracked_since = entity.tracked_since;
            }
        }
        Ok(())
    }

    async fn delete_price_points_before(&self, cutoff: DateTime<Utc>) -> TrackerResult<u64> {
        let mut state = self.state.write().await;
        let before = state.price_points.len();
        state.price_points.retain(|p| p.point.observed_at >= cutoff);
        Ok((before - state.price_points.len()) as u64)
    }

    async fn deactivate_stale_untracked(&self, cutoff: DateTime<Utc>) -> TrackerResult<u64> {
        let mut state = self.state.write().await;
        let mut count = 0;
        for entity in state.products.values_mut() {
            if entity.is_active && !entity.is_tracked && entity.updated_at < cutoff {
                entity.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn reset_all(&self) -> TrackerResult<()> {
        *self.state.write().await = MemoryState::default();
        Ok(())
    }
}

#[async_trait]
impl SearchTermRepository for MemoryStore {
    async fn list_terms(&self, active_only: bool) -> TrackerResult<Vec<TrackedSearchTerm>> {
        Ok(self
            .state
            .read()
            .await
            .terms
            .values()
            .filter(|t| !active_only || t.is_active)
            .cloned()
            .collect())
    }

    async fn find_term(&self, keyword: &str) -> TrackerResult<Option<TrackedSearchTerm>> {
        Ok(self.state.read().await.terms.get(keyword).cloned())
    }

    async fn save_term(&self, term: &TrackedSearchTerm) -> TrackerResult<()> {
        self.state.write().await.terms.insert(term.keyword.clone(), term.clone());
        Ok(())
    }

    async fn delete_term(&self, keyword: &str) -> TrackerResult<bool> {
        Ok(self.state.write().await.terms.remove(keyword).is_some())
    }

    async fn mark_scraped(&self, keyword: &str, at: DateTime<Utc>) -> TrackerResult<()> {
        if let Some(term) = self.state.write().await.terms.get_mut(keyword) {
            term.last_scraped_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl RunLogRepository for MemoryStore {
    async fn save_run_log(&self, log: &ScrapeRunLog) -> TrackerResult<()> {
        let mut state = self.state.write().await;
        match state.run_logs.iter_mut().find(|l| l.id == log.id) {
            Some(existing) => *existing = log.clone(),
            None => state.run_logs.push(log.clone()),
        }
        Ok(())
    }

    async fn recent_run_logs(&self, limit: u32) -> TrackerResult<Vec<ScrapeRunLog>> {
        let state = self.state.read().await;
        let mut logs = state.run_logs.clone();
        logs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        logs.truncate(limit as usize);
        Ok(logs)
    }

    async fn delete_run_logs_before(&self, cutoff: DateTime<Utc>) -> TrackerResult<u64> {
        let mut state = self.state.write().await;
        let before = state.run_logs.len();
        state.run_logs.retain(|l| l.started_at >= cutoff);
        Ok((before - state.run_logs.len()) as u64)
    }
}
