//! Scrape-to-storage ingestion
//!
//! Records are processed in input order inside one store batch. Per-record
//! problems (missing identity, unparsable price) are skipped; a store
//! failure or cancellation rolls the whole batch back.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reconciler::{ReconcileOptions, VariantReconciler};
use crate::domain::errors::{TrackerError, TrackerResult};
use crate::domain::events::{ProgressSink, ProgressStage};
use crate::domain::product::PricePoint;
use crate::domain::provider_item::{RawProviderItem, ScrapedRecord};
use crate::domain::repositories::{ProductBatch, ProductStore};
use crate::infrastructure::parsing::{FieldSelection, ItemExtractor, parse_price};

pub type IngestOptions = ReconcileOptions;

/// Aggregate counts of one ingestion call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    /// New entities saved with a first price point
    pub created: u32,
    /// New entities saved without a price point because no price parsed
    pub saved_without_price: u32,
    pub updated: u32,
    pub history_points_written: u32,
    /// Eligible records saved without a point because no price parsed
    pub prices_skipped: u32,
    /// Records dropped for lacking a base product identity
    pub records_skipped: u32,
}

impl IngestOutcome {
    pub fn entities_saved(&self) -> u32 {
        self.created + self.saved_without_price + self.updated
    }
}

enum RecordResult {
    Created { point_written: bool, price_skipped: bool },
    Updated { point_written: bool, price_skipped: bool },
}

pub struct IngestionPipeline {
    store: Arc<dyn ProductStore>,
    extractor: ItemExtractor,
    reconciler: VariantReconciler,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn ProductStore>) -> Self {
        Self::with_extractor(store, ItemExtractor::default())
    }

    pub fn with_extractor(store: Arc<dyn ProductStore>, extractor: ItemExtractor) -> Self {
        Self {
            store,
            extractor,
            reconciler: VariantReconciler::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ProductStore> {
        &self.store
    }

    pub fn extractor(&self) -> &ItemExtractor {
        &self.extractor
    }

    /// Extracts the selected fields of each raw item, then ingests them
    pub async fn ingest(
        &self,
        keyword: &str,
        raw_items: &[RawProviderItem],
        selection: &FieldSelection,
        options: IngestOptions,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> TrackerResult<IngestOutcome> {
        let total = u32::try_from(raw_items.len()).unwrap_or(u32::MAX);
        progress.emit(ProgressStage::Extracting, format!("Extracting {} items", total), 0, total);

        let records: Vec<ScrapedRecord> = raw_items
            .iter()
            .map(|raw| self.extractor.extract_search_item(raw, selection))
            .collect();
        self.ingest_records(keyword, records, options, cancel, progress).await
    }

    pub async fn ingest_records(
        &self,
        keyword: &str,
        records: Vec<ScrapedRecord>,
        options: IngestOptions,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> TrackerResult<IngestOutcome> {
        let total = u32::try_from(records.len()).unwrap_or(u32::MAX);
        let mut outcome = IngestOutcome::default();
        let mut batch = self.store.begin_batch().await?;

        for (index, record) in records.iter().enumerate() {
            let step = u32::try_from(index + 1).unwrap_or(u32::MAX);
            if cancel.is_cancelled() {
                warn!(keyword, processed = index, "Ingestion cancelled, rolling back batch");
                abandon(batch).await;
                progress.emit(ProgressStage::Failed, "Cancelled", step, total);
                return Err(TrackerError::Cancelled);
            }

            match self.process_record(batch.as_mut(), record, options).await {
                Ok(RecordResult::Created { point_written, price_skipped }) => {
                    if price_skipped {
                        outcome.saved_without_price += 1;
                    } else {
                        outcome.created += 1;
                    }
                    outcome.history_points_written += u32::from(point_written);
                    outcome.prices_skipped += u32::from(price_skipped);
                }
                Ok(RecordResult::Updated { point_written, price_skipped }) => {
                    outcome.updated += 1;
                    outcome.history_points_written += u32::from(point_written);
                    outcome.prices_skipped += u32::from(price_skipped);
                }
                Err(e) if e.is_recoverable() => {
                    debug!(keyword, index, "Skipping record: {}", e);
                    outcome.records_skipped += 1;
                }
                Err(e) => {
                    warn!(keyword, index, "Store failure, rolling back batch: {}", e);
                    abandon(batch).await;
                    progress.emit(ProgressStage::Failed, e.to_string(), step, total);
                    return Err(e);
                }
            }
            progress.emit(ProgressStage::Reconciling, format!("Processed record {}/{}", step, total), step, total);
        }

        progress.emit(ProgressStage::Committing, "Committing batch", total, total);
        batch.commit().await?;

        info!(
            keyword,
            created = outcome.created,
            saved_without_price = outcome.saved_without_price,
            updated = outcome.updated,
            history_points = outcome.history_points_written,
            prices_skipped = outcome.prices_skipped,
            records_skipped = outcome.records_skipped,
            "Ingestion batch committed"
        );
        progress.emit(
            ProgressStage::Finished,
            format!(
                "{} created, {} saved without price, {} updated",
                outcome.created, outcome.saved_without_price, outcome.updated
            ),
            total,
            total,
        );
        Ok(outcome)
    }

    async fn process_record(
        &self,
        batch: &mut dyn ProductBatch,
        record: &ScrapedRecord,
        options: IngestOptions,
    ) -> TrackerResult<RecordResult> {
        let sku_id = self.reconciler.identify(record)?;
        let existing = batch.find_by_sku_id(&sku_id).await?;
        let now = Utc::now();
        let decision = self.reconciler.apply(record, sku_id, existing, options, now)?;

        batch.upsert_entity(&decision.entity).await?;

        let mut point_written = false;
        let mut price_skipped = false;
        if decision.history_eligible {
            match record.sale_price.as_deref().and_then(parse_price) {
                Some(sale_price) => {
                    batch
                        .append_price_point(&PricePoint {
                            sku_id: decision.entity.sku_id.clone(),
                            sale_price: Some(sale_price),
                            original_price: record.original_price.as_deref().and_then(parse_price),
                            discount_percent: record.discount_percent,
                            observed_at: now,
                        })
                        .await?;
                    point_written = true;
                }
                None => {
                    debug!(sku_id = %decision.entity.sku_id, raw = ?record.sale_price, "No parsable sale price");
                    price_skipped = true;
                }
            }
        }

        Ok(if decision.is_new {
            RecordResult::Created { point_written, price_skipped }
        } else {
            RecordResult::Updated { point_written, price_skipped }
        })
    }
}

async fn abandon(batch: Box<dyn ProductBatch>) {
    if let Err(e) = batch.rollback().await {
        warn!("Batch rollback failed: {}", e);
    }
}
