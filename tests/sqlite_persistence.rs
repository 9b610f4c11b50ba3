//! Full flow against an on-disk SQLite database

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use price_tracker_lib::application::{CatalogService, IngestOptions, IngestionPipeline, MaintenanceService};
use price_tracker_lib::domain::{ProductStore, ProgressSink, ScrapedRecord, TrackerStore};
use price_tracker_lib::infrastructure::SqliteStore;
use price_tracker_lib::infrastructure::config::{DatabaseConfig, RetentionConfig};

fn database(dir: &TempDir) -> DatabaseConfig {
    DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("data").join("tracker.db").display()),
        max_connections: 2,
    }
}

fn variant(sku: &str, label: &str, price: &str) -> ScrapedRecord {
    ScrapedRecord {
        base_product_id: Some("100".into()),
        sku_id: Some(sku.into()),
        title: Some(format!("SUNLU PLA Filament {}", label)),
        variant_label: Some(label.into()),
        sale_price: Some(price.into()),
        currency: Some("EUR".into()),
        ..ScrapedRecord::default()
    }
}

async fn ingest(store: &Arc<SqliteStore>, records: Vec<ScrapedRecord>) -> Result<()> {
    IngestionPipeline::new(store.clone())
        .ingest_records("pla", records, IngestOptions::default(), &CancellationToken::new(), &ProgressSink::disabled())
        .await?;
    Ok(())
}

#[tokio::test]
async fn history_survives_upserts_and_reopening() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = database(&dir);

    {
        let store = Arc::new(SqliteStore::connect(&config).await?);
        ingest(&store, vec![variant("1", "Black", "€12,59"), variant("2", "White", "€12,99")]).await?;

        let tracker_store: Arc<dyn TrackerStore> = store.clone();
        let catalog = CatalogService::new(tracker_store);
        assert_eq!(catalog.set_family_tracking("100", true).await?, 2);

        ingest(&store, vec![variant("1", "Black", "€11,49")]).await?;
        store.pool().close().await;
    }

    let store = Arc::new(SqliteStore::connect(&config).await?);
    let black = store.find_by_sku_id("1").await?.context("variant persisted")?;
    assert!(black.is_tracked);
    assert!(black.tracked_since.is_some());

    let prices: Vec<_> = store
        .price_history("1", None)
        .await?
        .into_iter()
        .filter_map(|p| p.point.sale_price)
        .collect();
    assert_eq!(prices, vec![12.59, 11.49]);

    let tracker_store: Arc<dyn TrackerStore> = store.clone();
    let document = MaintenanceService::new(tracker_store, RetentionConfig::default())
        .export(Utc::now())
        .await?;
    assert_eq!(document.total_products, 2);
    assert!(document.products.iter().all(|p| p.currency.as_deref() == Some("EUR")));
    Ok(())
}

#[tokio::test]
async fn failed_batch_leaves_no_rows() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(SqliteStore::connect(&database(&dir)).await?);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = IngestionPipeline::new(store.clone())
        .ingest_records(
            "pla",
            vec![variant("1", "Black", "€12,59")],
            IngestOptions::default(),
            &cancel,
            &ProgressSink::disabled(),
        )
        .await;

    assert!(result.is_err());
    assert!(store.find_by_sku_id("1").await?.is_none());
    Ok(())
}
