//! Variant discovery fallback chain
//!
//! Strategies are tried in order; the first non-empty result wins and is
//! ingested like any other batch. Failing strategies count as empty. The
//! whole chain runs under one deadline.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ingestion::{IngestOptions, IngestOutcome, IngestionPipeline};
use crate::domain::errors::{TrackerError, TrackerResult};
use crate::domain::events::{ProgressSink, ProgressStage};
use crate::domain::product::{ProductEntity, ProductFilter};
use crate::domain::provider_item::ScrapedRecord;
use crate::domain::services::{ProviderFetcher, SessionProvider, VariantDiscoveryStrategy, VariantPageSource};
use crate::infrastructure::parsing::ItemExtractor;

/// Asks the marketplace variant endpoint for the SKU list
pub struct ApiVariantStrategy {
    fetcher: Arc<dyn ProviderFetcher>,
    sessions: Arc<dyn SessionProvider>,
    extractor: ItemExtractor,
    fetch_timeout: Duration,
}

impl ApiVariantStrategy {
    pub fn new(
        fetcher: Arc<dyn ProviderFetcher>,
        sessions: Arc<dyn SessionProvider>,
        extractor: ItemExtractor,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            sessions,
            extractor,
            fetch_timeout,
        }
    }
}

#[async_trait]
impl VariantDiscoveryStrategy for ApiVariantStrategy {
    fn name(&self) -> &str {
        "variant_api"
    }

    async fn discover_variants(&self, base_product_id: &str) -> TrackerResult<Vec<ScrapedRecord>> {
        let session = self.sessions.session_for(base_product_id).await?;
        let payload = tokio::time::timeout(
            self.fetch_timeout,
            self.fetcher.fetch_product_variants(base_product_id, &session),
        )
        .await
        .map_err(|_| TrackerError::provider_fetch(base_product_id, "variant request timed out"))??;

        Ok(payload
            .map(|payload| self.extractor.extract_variant_payload(base_product_id, &payload))
            .unwrap_or_default())
    }
}

/// Labels variants from swatch images of the rendered product page
pub struct PageSwatchStrategy {
    source: Arc<dyn VariantPageSource>,
    extractor: ItemExtractor,
}

impl PageSwatchStrategy {
    pub fn new(source: Arc<dyn VariantPageSource>, extractor: ItemExtractor) -> Self {
        Self { source, extractor }
    }
}

#[async_trait]
impl VariantDiscoveryStrategy for PageSwatchStrategy {
    fn name(&self) -> &str {
        "page_swatches"
    }

    async fn discover_variants(&self, base_product_id: &str) -> TrackerResult<Vec<ScrapedRecord>> {
        let images = self.source.variant_images(base_product_id).await?;
        Ok(self.extractor.extract_variant_images(base_product_id, &images))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryResult {
    /// Name of the strategy that produced the records, if any did
    pub strategy: Option<String>,
    pub records: Vec<ScrapedRecord>,
}

pub struct DiscoveryChain {
    strategies: Vec<Box<dyn VariantDiscoveryStrategy>>,
    deadline: Duration,
}

impl DiscoveryChain {
    pub fn new(deadline: Duration) -> Self {
        Self {
            strategies: Vec::new(),
            deadline,
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: impl VariantDiscoveryStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn discover(&self, base_product_id: &str, cancel: &CancellationToken) -> TrackerResult<DiscoveryResult> {
        let seconds = self.deadline.as_secs();
        tokio::select! {
            _ = cancel.cancelled() => Err(TrackerError::Cancelled),
            result = tokio::time::timeout(self.deadline, self.run_strategies(base_product_id)) => {
                result.map_err(|_| {
                    warn!(base_product_id, seconds, "Variant discovery deadline exceeded");
                    TrackerError::DeadlineExceeded {
                        operation: format!("variant discovery for {}", base_product_id),
                        seconds,
                    }
                })
            }
        }
    }

    async fn run_strategies(&self, base_product_id: &str) -> DiscoveryResult {
        for strategy in &self.strategies {
            match strategy.discover_variants(base_product_id).await {
                Ok(records) if !records.is_empty() => {
                    info!(base_product_id, strategy = strategy.name(), variants = records.len(), "Variants discovered");
                    return DiscoveryResult {
                        strategy: Some(strategy.name().to_string()),
                        records,
                    };
                }
                Ok(_) => debug!(base_product_id, strategy = strategy.name(), "No variants, trying next strategy"),
                Err(e) => warn!(base_product_id, strategy = strategy.name(), "Strategy failed: {}", e),
            }
        }
        DiscoveryResult::default()
    }

    /// Discovers variants of a known listing and ingests them. Records
    /// inherit the listing's title, store and grouping ids where they
    /// carry none of their own.
    pub async fn discover_and_ingest(
        &self,
        pipeline: &IngestionPipeline,
        base_product_id: &str,
        options: IngestOptions,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> TrackerResult<IngestOutcome> {
        progress.emit(ProgressStage::Discovery, format!("Discovering variants of {}", base_product_id), 0, 1);
        let result = self.discover(base_product_id, cancel).await?;
        if result.records.is_empty() {
            info!(base_product_id, "No strategy found variants");
            return Ok(IngestOutcome::default());
        }

        let parent = pipeline
            .store()
            .query(&ProductFilter::family(base_product_id))
            .await?
            .into_iter()
            .next();
        let records = result
            .records
            .into_iter()
            .map(|record| inherit_from_parent(record, parent.as_ref()))
            .collect();

        pipeline
            .ingest_records(base_product_id, records, options, cancel, progress)
            .await
    }
}

fn inherit_from_parent(mut record: ScrapedRecord, parent: Option<&ProductEntity>) -> ScrapedRecord {
    let Some(parent) = parent else {
        return record;
    };
    if record.title.is_none() {
        record.title = Some(parent.title.clone());
    }
    if record.spu_id.is_none() {
        record.spu_id.clone_from(&parent.spu_id);
    }
    if record.currency.is_none() {
        record.currency.clone_from(&parent.currency);
    }
    if record.store.name.is_none() && record.store.id.is_none() {
        record.store = parent.store.clone();
    }
    if record.image_url.is_none() {
        record.image_url.clone_from(&parent.image_url);
    }
    record
}
