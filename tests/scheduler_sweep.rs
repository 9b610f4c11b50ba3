//! Scheduled sweeps with fake provider collaborators

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use price_tracker_lib::application::{AutoScraper, IngestOptions, SearchCollector};
use price_tracker_lib::domain::{
    ProgressSink, ProviderFetcher, RawProviderItem, RawVariantPayload, RunLogRepository, RunStatus,
    ScrapedRecord, SearchTermRepository, SessionContext, SessionProvider, TrackedSearchTerm, TrackerResult,
};
use price_tracker_lib::infrastructure::MemoryStore;
use price_tracker_lib::infrastructure::config::{IngestionConfig, SchedulerConfig};

/// Serves one page of results per keyword, then nothing
#[derive(Default)]
struct FakeMarketplace {
    first_pages: HashMap<String, Vec<RawProviderItem>>,
    calls: AtomicU32,
}

impl FakeMarketplace {
    fn with_listing(mut self, keyword: &str, product_id: &str, title: &str) -> Self {
        let item = serde_json::from_value(serde_json::json!({
            "productId": product_id,
            "title": { "displayTitle": title },
            "prices": { "skuId": format!("{}-1", product_id), "salePrice": { "formattedPrice": "€15,99" } }
        }))
        .unwrap_or_default();
        self.first_pages.entry(keyword.to_string()).or_default().push(item);
        self
    }
}

#[async_trait]
impl ProviderFetcher for FakeMarketplace {
    async fn fetch_search_page(
        &self,
        keyword: &str,
        page_number: u32,
        _session: &SessionContext,
    ) -> TrackerResult<Vec<RawProviderItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if page_number > 1 {
            return Ok(Vec::new());
        }
        Ok(self.first_pages.get(keyword).cloned().unwrap_or_default())
    }

    async fn fetch_product_variants(
        &self,
        _base_product_id: &str,
        _session: &SessionContext,
    ) -> TrackerResult<Option<RawVariantPayload>> {
        Ok(None)
    }
}

#[async_trait]
impl SessionProvider for FakeMarketplace {
    async fn session_for(&self, _keyword: &str) -> TrackerResult<SessionContext> {
        Ok(SessionContext::default())
    }
}

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        page_delay_ms: 0,
        page_delay_jitter_ms: 0,
        ..SchedulerConfig::default()
    }
}

fn scraper(store: &MemoryStore, market: Arc<FakeMarketplace>) -> AutoScraper {
    let collector = SearchCollector::new(market.clone(), market, Duration::from_secs(5));
    AutoScraper::new(Arc::new(store.clone()), collector, scheduler_config(), IngestionConfig::default())
}

async fn add_term(store: &MemoryStore, keyword: &str) -> Result<TrackedSearchTerm> {
    let term = TrackedSearchTerm::new(keyword, Utc::now());
    store.save_term(&term).await?;
    Ok(term)
}

#[tokio::test]
async fn sweep_runs_due_terms_and_marks_them_scraped() -> Result<()> {
    let store = MemoryStore::new();
    let market = Arc::new(
        FakeMarketplace::default()
            .with_listing("pla", "100", "SUNLU PLA Filament")
            .with_listing("petg", "200", "Elegoo PETG Filament"),
    );
    add_term(&store, "pla").await?;
    add_term(&store, "petg").await?;
    let mut paused = add_term(&store, "abs").await?;
    paused.is_active = false;
    store.save_term(&paused).await?;

    let scraper = scraper(&store, market);
    let report = scraper.run_sweep(&CancellationToken::new()).await?;
    assert_eq!(report.due, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(store.product_count().await, 2);

    for keyword in ["pla", "petg"] {
        let term = store.find_term(keyword).await?.context("term exists")?;
        assert!(term.last_scraped_at.is_some());
    }
    assert!(store.find_term("abs").await?.context("term exists")?.last_scraped_at.is_none());

    let logs = store.recent_run_logs(10).await?;
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|log| log.status == RunStatus::Completed && log.items_found == 1));

    let again = scraper.run_sweep(&CancellationToken::new()).await?;
    assert_eq!(again.due, 0);
    Ok(())
}

#[tokio::test]
async fn one_failing_term_does_not_block_the_next() -> Result<()> {
    let store = MemoryStore::new();
    let market = Arc::new(FakeMarketplace::default().with_listing("pla", "100", "SUNLU PLA Filament"));
    add_term(&store, "pla").await?;
    add_term(&store, "petg").await?;
    store.set_write_failure(true);

    let report = scraper(&store, market).run_sweep(&CancellationToken::new()).await?;
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 1);

    let logs = store.recent_run_logs(10).await?;
    let failed = logs.iter().find(|log| log.keyword == "pla").context("pla log")?;
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(failed.error_message.is_some());
    assert!(failed.finished_at.is_some());

    let pla = store.find_term("pla").await?.context("term exists")?;
    assert!(pla.last_scraped_at.is_none(), "failed term stays due");
    assert!(store.find_term("petg").await?.context("term exists")?.last_scraped_at.is_some());
    Ok(())
}

#[tokio::test]
async fn discovery_disabled_counts_tracked_listings_without_fetching() -> Result<()> {
    let store = MemoryStore::new();
    let market = Arc::new(FakeMarketplace::default().with_listing("pla", "100", "SUNLU PLA Filament"));
    let scraper = scraper(&store, market.clone());

    scraper
        .pipeline()
        .ingest_records(
            "pla",
            vec![ScrapedRecord {
                base_product_id: Some("100".into()),
                sku_id: Some("100-1".into()),
                title: Some("SUNLU PLA Filament".into()),
                sale_price: Some("€15,99".into()),
                ..ScrapedRecord::default()
            }],
            IngestOptions { track: true, ..IngestOptions::default() },
            &CancellationToken::new(),
            &ProgressSink::disabled(),
        )
        .await?;

    let mut term = add_term(&store, "pla").await?;
    term.discovery_enabled = false;
    store.save_term(&term).await?;

    let log = scraper
        .run_term(&term, &CancellationToken::new())
        .await?
        .context("run was not skipped")?;
    assert_eq!(log.status, RunStatus::Completed);
    assert_eq!(log.items_found, 1);
    assert_eq!(market.calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn run_loop_stops_on_cancellation() -> Result<()> {
    let store = MemoryStore::new();
    add_term(&store, "pla").await?;
    let scraper = Arc::new(scraper(&store, Arc::new(FakeMarketplace::default())));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let scraper = Arc::clone(&scraper);
        let cancel = cancel.clone();
        async move { scraper.run(cancel).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle).await??;

    // The first tick fires immediately, so the never-scraped term ran once
    assert!(store.find_term("pla").await?.context("term exists")?.last_scraped_at.is_some());
    Ok(())
}
