//! Repository interfaces for listing persistence
//!
//! The core only sees these traits. Writes made during one ingestion call go
//! through a [`ProductBatch`] and become visible on `commit`; a batch dropped
//! without commit is rolled back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::TrackerResult;
use crate::domain::product::{
    PricePoint, ProductEntity, ProductFilter, ScrapeRunLog, StoredPricePoint, TrackedSearchTerm,
};

/// Batch-scoped unit of work over listings and their history
#[async_trait]
pub trait ProductBatch: Send {
    async fn find_by_sku_id(&mut self, sku_id: &str) -> TrackerResult<Option<ProductEntity>>;
    async fn upsert_entity(&mut self, entity: &ProductEntity) -> TrackerResult<()>;
    async fn append_price_point(&mut self, point: &PricePoint) -> TrackerResult<()>;
    async fn commit(self: Box<Self>) -> TrackerResult<()>;
    async fn rollback(self: Box<Self>) -> TrackerResult<()>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn begin_batch(&self) -> TrackerResult<Box<dyn ProductBatch>>;

    async fn find_by_sku_id(&self, sku_id: &str) -> TrackerResult<Option<ProductEntity>>;
    async fn query(&self, filter: &ProductFilter) -> TrackerResult<Vec<ProductEntity>>;

    /// Points for one entity observed at or after `since`, oldest first
    async fn price_history(
        &self,
        sku_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> TrackerResult<Vec<StoredPricePoint>>;

    /// Offline repair path; the only way history is ever rewritten
    async fn rewrite_price_point(
        &self,
        point_id: i64,
        sale_price: Option<f64>,
        original_price: Option<f64>,
    ) -> TrackerResult<()>;

    /// Updates the tracking flags of existing entities only
    async fn save_tracking(&self, entities: &[ProductEntity]) -> TrackerResult<()>;

    async fn delete_price_points_before(&self, cutoff: DateTime<Utc>) -> TrackerResult<u64>;

    /// Soft-deletes active, untracked entities not updated since `cutoff`
    async fn deactivate_stale_untracked(&self, cutoff: DateTime<Utc>) -> TrackerResult<u64>;

    /// Removes every listing, price point, search term and run log
    async fn reset_all(&self) -> TrackerResult<()>;
}

#[async_trait]
pub trait SearchTermRepository: Send + Sync {
    async fn list_terms(&self, active_only: bool) -> TrackerResult<Vec<TrackedSearchTerm>>;
    async fn find_term(&self, keyword: &str) -> TrackerResult<Option<TrackedSearchTerm>>;
    async fn save_term(&self, term: &TrackedSearchTerm) -> TrackerResult<()>;
    async fn delete_term(&self, keyword: &str) -> TrackerResult<bool>;
    async fn mark_scraped(&self, keyword: &str, at: DateTime<Utc>) -> TrackerResult<()>;
}

#[async_trait]
pub trait RunLogRepository: Send + Sync {
    async fn save_run_log(&self, log: &ScrapeRunLog) -> TrackerResult<()>;
    async fn recent_run_logs(&self, limit: u32) -> TrackerResult<Vec<ScrapeRunLog>>;
    async fn delete_run_logs_before(&self, cutoff: DateTime<Utc>) -> TrackerResult<u64>;
}

/// Everything the scheduler needs from persistence
pub trait TrackerStore: ProductStore + SearchTermRepository + RunLogRepository {}

impl<T> TrackerStore for T where T: ProductStore + SearchTermRepository + RunLogRepository {}
