//! SQLite persistence for listings, price history, search terms and run logs
//!
//! One ingestion batch maps to one sqlx transaction. Entity upserts use
//! `ON CONFLICT DO UPDATE` so an existing row (and the history cascading
//! from it) is never deleted and re-inserted.

#![allow(clippy::uninlined_format_args)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Executor, QueryBuilder, Row, Sqlite, Transaction};
use tracing::{debug, info};

use crate::domain::errors::{TrackerError, TrackerResult};
use crate::domain::product::{
    PricePoint, ProductEntity, ProductFilter, RunStatus, ScrapeRunLog, StoreIdentity, StoredPricePoint,
    TrackedSearchTerm,
};
use crate::domain::repositories::{ProductBatch, ProductStore, RunLogRepository, SearchTermRepository};
use crate::infrastructure::config::DatabaseConfig;
use crate::infrastructure::database_connection::DatabaseConnection;

const PRODUCT_COLUMNS: &str = "sku_id, base_product_id, spu_id, title, variant_label, image_url, listing_url, \
     store_name, store_id, store_url, currency, rating, order_count, created_at, updated_at, \
     is_active, is_tracked, tracked_since";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens the configured database and creates the schema
    pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let connection = DatabaseConnection::from_config(config).await?;
        connection.migrate().await?;
        info!("SQLite store ready at {}", config.url);
        Ok(Self::new(connection.into_pool()))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub struct SqliteBatch {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl ProductBatch for SqliteBatch {
    async fn find_by_sku_id(&mut self, sku_id: &str) -> TrackerResult<Option<ProductEntity>> {
        fetch_entity(&mut *self.tx, sku_id).await
    }

    async fn upsert_entity(&mut self, entity: &ProductEntity) -> TrackerResult<()> {
        upsert_entity(&mut *self.tx, entity).await
    }

    async fn append_price_point(&mut self, point: &PricePoint) -> TrackerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO price_points (sku_id, sale_price, original_price, discount_percent, observed_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&point.sku_id)
        .bind(point.sale_price)
        .bind(point.original_price)
        .bind(point.discount_percent)
        .bind(point.observed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> TrackerResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> TrackerResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl ProductStore for SqliteStore {
    async fn begin_batch(&self) -> TrackerResult<Box<dyn ProductBatch>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteBatch { tx }))
    }

    async fn find_by_sku_id(&self, sku_id: &str) -> TrackerResult<Option<ProductEntity>> {
        fetch_entity(&self.pool, sku_id).await
    }

    async fn query(&self, filter: &ProductFilter) -> TrackerResult<Vec<ProductEntity>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM products WHERE 1 = 1", PRODUCT_COLUMNS));

        if filter.tracked_only {
            builder.push(" AND is_tracked = 1");
        }
        if filter.active_only {
            builder.push(" AND is_active = 1");
        }
        if let Some(base) = &filter.base_product_id {
            builder.push(" AND base_product_id = ").push_bind(base.clone());
        }
        if let Some(spu) = &filter.spu_id {
            builder.push(" AND spu_id = ").push_bind(spu.clone());
        }
        if let Some(needle) = &filter.title_contains {
            builder
                .push(" AND instr(lower(title), lower(")
                .push_bind(needle.clone())
                .push(")) > 0");
        }
        builder.push(" ORDER BY base_product_id, variant_label, sku_id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(entity_from_row).collect()
    }

    async fn price_history(
        &self,
        sku_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> TrackerResult<Vec<StoredPricePoint>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sku_id, sale_price, original_price, discount_percent, observed_at
            FROM price_points
            WHERE sku_id = ? AND (? IS NULL OR observed_at >= ?)
            ORDER BY observed_at ASC, id ASC
            "#,
        )
        .bind(sku_id)
        .bind(since)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(StoredPricePoint {
                    id: row.try_get("id")?,
                    point: PricePoint {
                        sku_id: row.try_get("sku_id")?,
                        sale_price: row.try_get("sale_price")?,
                        original_price: row.try_get("original_price")?,
                        discount_percent: row.try_get("discount_percent")?,
                        observed_at: row.try_get("observed_at")?,
                    },
                })
            })
            .collect()
    }

    async fn rewrite_price_point(
        &self,
        point_id: i64,
        sale_price: Option<f64>,
        original_price: Option<f64>,
    ) -> TrackerResult<()> {
        let result = sqlx::query("UPDATE price_points SET sale_price = ?, original_price = ? WHERE id = ?")
            .bind(sale_price)
            .bind(original_price)
            .bind(point_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::not_found("price point", point_id.to_string()));
        }
        Ok(())
    }

    async fn save_tracking(&self, entities: &[ProductEntity]) -> TrackerResult<()> {
        let mut tx = self.pool.begin().await?;
        for entity in entities {
            sqlx::query("UPDATE products SET is_tracked = ?, tracked_since = ? WHERE sku_id = ?")
                .bind(entity.is_tracked)
                .bind(entity.tracked_since)
                .bind(&entity.sku_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_price_points_before(&self, cutoff: DateTime<Utc>) -> TrackerResult<u64> {
        let result = sqlx::query("DELETE FROM price_points WHERE observed_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn deactivate_stale_untracked(&self, cutoff: DateTime<Utc>) -> TrackerResult<u64> {
        let result = sqlx::query(
            "UPDATE products SET is_active = 0 WHERE is_active = 1 AND is_tracked = 0 AND updated_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reset_all(&self) -> TrackerResult<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["price_points", "products", "search_terms", "scrape_run_logs"] {
            sqlx::query(&format!("DELETE FROM {}", table)).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!("All tracker data deleted");
        Ok(())
    }
}

#[async_trait]
impl SearchTermRepository for SqliteStore {
    async fn list_terms(&self, active_only: bool) -> TrackerResult<Vec<TrackedSearchTerm>> {
        let rows = sqlx::query(
            r#"
            SELECT keyword, is_active, discovery_enabled, scrape_frequency_hours,
                   tracked_update_frequency_hours, last_scraped_at, created_at
            FROM search_terms
            WHERE (? = 0 OR is_active = 1)
            ORDER BY keyword
            "#,
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(term_from_row).collect()
    }

    async fn find_term(&self, keyword: &str) -> TrackerResult<Option<TrackedSearchTerm>> {
        let row = sqlx::query(
            r#"
            SELECT keyword, is_active, discovery_enabled, scrape_frequency_hours,
                   tracked_update_frequency_hours, last_scraped_at, created_at
            FROM search_terms WHERE keyword = ?
            "#,
        )
        .bind(keyword)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(term_from_row).transpose()
    }

    async fn save_term(&self, term: &TrackedSearchTerm) -> TrackerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO search_terms
                (keyword, is_active, discovery_enabled, scrape_frequency_hours,
                 tracked_update_frequency_hours, last_scraped_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(keyword) DO UPDATE SET
                is_active = excluded.is_active,
                discovery_enabled = excluded.discovery_enabled,
                scrape_frequency_hours = excluded.scrape_frequency_hours,
                tracked_update_frequency_hours = excluded.tracked_update_frequency_hours,
                last_scraped_at = excluded.last_scraped_at
            "#,
        )
        .bind(&term.keyword)
        .bind(term.is_active)
        .bind(term.discovery_enabled)
        .bind(term.scrape_frequency_hours)
        .bind(term.tracked_update_frequency_hours)
        .bind(term.last_scraped_at)
        .bind(term.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_term(&self, keyword: &str) -> TrackerResult<bool> {
        let result = sqlx::query("DELETE FROM search_terms WHERE keyword = ?")
            .bind(keyword)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_scraped(&self, keyword: &str, at: DateTime<Utc>) -> TrackerResult<()> {
        sqlx::query("UPDATE search_terms SET last_scraped_at = ? WHERE keyword = ?")
            .bind(at)
            .bind(keyword)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RunLogRepository for SqliteStore {
    async fn save_run_log(&self, log: &ScrapeRunLog) -> TrackerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scrape_run_logs
                (id, keyword, started_at, finished_at, status, items_found, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                finished_at = excluded.finished_at,
                status = excluded.status,
                items_found = excluded.items_found,
                error_message = excluded.error_message
            "#,
        )
        .bind(&log.id)
        .bind(&log.keyword)
        .bind(log.started_at)
        .bind(log.finished_at)
        .bind(log.status.as_str())
        .bind(log.items_found)
        .bind(&log.error_message)
        .execute(&self.pool)
        .await?;
        debug!(keyword = %log.keyword, status = log.status.as_str(), "Run log saved");
        Ok(())
    }

    async fn recent_run_logs(&self, limit: u32) -> TrackerResult<Vec<ScrapeRunLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, keyword, started_at, finished_at, status, items_found, error_message
            FROM scrape_run_logs
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                Ok(ScrapeRunLog {
                    id: row.try_get("id")?,
                    keyword: row.try_get("keyword")?,
                    started_at: row.try_get("started_at")?,
                    finished_at: row.try_get("finished_at")?,
                    status: RunStatus::parse(&status)
                        .ok_or_else(|| TrackerError::StoreState(format!("unknown run status '{}'", status)))?,
                    items_found: row.try_get("items_found")?,
                    error_message: row.try_get("error_message")?,
                })
            })
            .collect()
    }

    async fn delete_run_logs_before(&self, cutoff: DateTime<Utc>) -> TrackerResult<u64> {
        let result = sqlx::query("DELETE FROM scrape_run_logs WHERE started_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

async fn fetch_entity<'e, E>(executor: E, sku_id: &str) -> TrackerResult<Option<ProductEntity>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!("SELECT {} FROM products WHERE sku_id = ?", PRODUCT_COLUMNS))
        .bind(sku_id)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(entity_from_row).transpose()
}

async fn upsert_entity<'e, E>(executor: E, entity: &ProductEntity) -> TrackerResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO products
            (sku_id, base_product_id, spu_id, title, variant_label, image_url, listing_url,
             store_name, store_id, store_url, currency, rating, order_count, created_at, updated_at,
             is_active, is_tracked, tracked_since)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(sku_id) DO UPDATE SET
            base_product_id = excluded.base_product_id,
            spu_id = excluded.spu_id,
            title = excluded.title,
            variant_label = excluded.variant_label,
            image_url = excluded.image_url,
            listing_url = excluded.listing_url,
            store_name = excluded.store_name,
            store_id = excluded.store_id,
            store_url = excluded.store_url,
            currency = excluded.currency,
            rating = excluded.rating,
            order_count = excluded.order_count,
            updated_at = excluded.updated_at,
            is_active = excluded.is_active,
            is_tracked = excluded.is_tracked,
            tracked_since = excluded.tracked_since
        "#,
    )
    .bind(&entity.sku_id)
    .bind(&entity.base_product_id)
    .bind(&entity.spu_id)
    .bind(&entity.title)
    .bind(&entity.variant_label)
    .bind(&entity.image_url)
    .bind(&entity.listing_url)
    .bind(&entity.store.name)
    .bind(&entity.store.id)
    .bind(&entity.store.url)
    .bind(&entity.currency)
    .bind(entity.rating)
    .bind(entity.order_count)
    .bind(entity.created_at)
    .bind(entity.updated_at)
    .bind(entity.is_active)
    .bind(entity.is_tracked)
    .bind(entity.tracked_since)
    .execute(executor)
    .await?;
    Ok(())
}

fn entity_from_row(row: &SqliteRow) -> TrackerResult<ProductEntity> {
    Ok(ProductEntity {
        base_product_id: row.try_get("base_product_id")?,
        sku_id: row.try_get("sku_id")?,
        spu_id: row.try_get("spu_id")?,
        title: row.try_get("title")?,
        variant_label: row.try_get("variant_label")?,
        image_url: row.try_get("image_url")?,
        listing_url: row.try_get("listing_url")?,
        store: StoreIdentity {
            name: row.try_get("store_name")?,
            id: row.try_get("store_id")?,
            url: row.try_get("store_url")?,
        },
        currency: row.try_get("currency")?,
        rating: row.try_get("rating")?,
        order_count: row.try_get("order_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        is_active: row.try_get("is_active")?,
        is_tracked: row.try_get("is_tracked")?,
        tracked_since: row.try_get("tracked_since")?,
    })
}

fn term_from_row(row: &SqliteRow) -> TrackerResult<TrackedSearchTerm> {
    Ok(TrackedSearchTerm {
        keyword: row.try_get("keyword")?,
        is_active: row.try_get("is_active")?,
        discovery_enabled: row.try_get("discovery_enabled")?,
        scrape_frequency_hours: row.try_get("scrape_frequency_hours")?,
        tracked_update_frequency_hours: row.try_get("tracked_update_frequency_hours")?,
        last_scraped_at: row.try_get("last_scraped_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn memory_store() -> TrackerResult<SqliteStore> {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        };
        SqliteStore::connect(&config)
            .await
            .map_err(|e| TrackerError::Config(e.to_string()))
    }

    fn entity(sku: &str, base: &str, now: DateTime<Utc>) -> ProductEntity {
        ProductEntity {
            base_product_id: base.to_string(),
            sku_id: sku.to_string(),
            spu_id: None,
            title: format!("PLA Filament {sku}"),
            variant_label: Some("Black".to_string()),
            image_url: None,
            listing_url: format!("https://www.aliexpress.com/item/{base}.html"),
            store: StoreIdentity::default(),
            currency: Some("EUR".to_string()),
            rating: Some(4.5),
            order_count: Some(100),
            created_at: now,
            updated_at: now,
            is_active: true,
            is_tracked: false,
            tracked_since: None,
        }
    }

    fn point(sku: &str, price: f64, at: DateTime<Utc>) -> PricePoint {
        PricePoint {
            sku_id: sku.to_string(),
            sale_price: Some(price),
            original_price: None,
            discount_percent: None,
            observed_at: at,
        }
    }

    #[tokio::test]
    async fn committed_batch_is_visible() -> TrackerResult<()> {
        let store = memory_store().await?;
        let now = Utc::now();

        let mut batch = store.begin_batch().await?;
        batch.upsert_entity(&entity("s1", "b1", now)).await?;
        batch.append_price_point(&point("s1", 12.59, now)).await?;
        assert!(batch.find_by_sku_id("s1").await?.is_some());
        batch.commit().await?;

        let stored = store.find_by_sku_id("s1").await?.expect("entity stored");
        assert_eq!(stored.title, "PLA Filament s1");
        assert_eq!(store.price_history("s1", None).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn rolled_back_batch_leaves_no_trace() -> TrackerResult<()> {
        let store = memory_store().await?;
        let mut batch = store.begin_batch().await?;
        batch.upsert_entity(&entity("s1", "b1", Utc::now())).await?;
        batch.rollback().await?;

        assert!(store.find_by_sku_id("s1").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn upsert_keeps_history_and_created_at() -> TrackerResult<()> {
        let store = memory_store().await?;
        let first = Utc::now() - Duration::days(1);
        let mut batch = store.begin_batch().await?;
        batch.upsert_entity(&entity("s1", "b1", first)).await?;
        batch.append_price_point(&point("s1", 10.0, first)).await?;
        batch.commit().await?;

        let mut updated = entity("s1", "b1", Utc::now());
        updated.created_at = first;
        updated.title = "Renamed".to_string();
        let mut batch = store.begin_batch().await?;
        batch.upsert_entity(&updated).await?;
        batch.commit().await?;

        let stored = store.find_by_sku_id("s1").await?.expect("entity stored");
        assert_eq!(stored.title, "Renamed");
        assert_eq!(stored.created_at, first);
        assert_eq!(store.price_history("s1", None).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn query_filters_by_title_and_tracking() -> TrackerResult<()> {
        let store = memory_store().await?;
        let now = Utc::now();
        let mut tracked = entity("s1", "b1", now);
        tracked.start_tracking(now);
        let mut batch = store.begin_batch().await?;
        batch.upsert_entity(&tracked).await?;
        batch.upsert_entity(&entity("s2", "b2", now)).await?;
        batch.commit().await?;

        let hits = store.query(&ProductFilter::tracked_matching("pla filament")).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].sku_id, "s1");

        let family = store.query(&ProductFilter::family("b2")).await?;
        assert_eq!(family.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn retention_and_reset() -> TrackerResult<()> {
        let store = memory_store().await?;
        let old = Utc::now() - Duration::days(120);
        let mut batch = store.begin_batch().await?;
        batch.upsert_entity(&entity("s1", "b1", old)).await?;
        batch.append_price_point(&point("s1", 1.0, old)).await?;
        batch.append_price_point(&point("s1", 2.0, Utc::now())).await?;
        batch.commit().await?;

        let cutoff = Utc::now() - Duration::days(90);
        assert_eq!(store.delete_price_points_before(cutoff).await?, 1);
        assert_eq!(store.deactivate_stale_untracked(cutoff).await?, 1);
        assert!(!store.find_by_sku_id("s1").await?.expect("entity kept").is_active);

        store.save_term(&TrackedSearchTerm::new("pla", Utc::now())).await?;
        store.reset_all().await?;
        assert!(store.find_by_sku_id("s1").await?.is_none());
        assert!(store.list_terms(false).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn search_terms_and_run_logs_round_trip() -> TrackerResult<()> {
        let store = memory_store().await?;
        let now = Utc::now();
        let mut term = TrackedSearchTerm::new("pla", now);
        term.is_active = false;
        store.save_term(&term).await?;
        store.save_term(&TrackedSearchTerm::new("petg", now)).await?;

        assert_eq!(store.list_terms(true).await?.len(), 1);
        store.mark_scraped("petg", now).await?;
        let petg = store.find_term("petg").await?.expect("term stored");
        assert!(petg.last_scraped_at.is_some());
        assert!(store.delete_term("pla").await?);
        assert!(!store.delete_term("pla").await?);

        let mut log = ScrapeRunLog::open("petg", now);
        store.save_run_log(&log).await?;
        log.complete(7, now);
        store.save_run_log(&log).await?;
        let logs = store.recent_run_logs(10).await?;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, RunStatus::Completed);
        assert_eq!(logs[0].items_found, 7);
        Ok(())
    }
}
