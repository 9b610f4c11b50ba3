//! Variant identity reconciliation
//!
//! Decides, for one scraped record, which stored entity it is and whether
//! its price may be written to history. Pure: persistence is the caller's
//! job.

use chrono::{DateTime, Utc};

use crate::domain::errors::{TrackerError, TrackerResult};
use crate::domain::product::{ProductEntity, StoreIdentity};
use crate::domain::provider_item::ScrapedRecord;
use crate::infrastructure::parsing::item_extractor::listing_url_for;

/// Hex digits of the label hash kept in a synthesized SKU id
const SYNTHETIC_SKU_HASH_LEN: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Start tracking every reconciled entity
    pub track: bool,
    /// Write history even for passive re-sightings
    pub force_history: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileDecision {
    pub entity: ProductEntity,
    pub is_new: bool,
    pub history_eligible: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VariantReconciler;

impl VariantReconciler {
    pub fn new() -> Self {
        Self
    }

    /// SKU id for a record: the provider's, else `<base>_<hash8(label)>`,
    /// else the base id for single-variant listings
    pub fn identify(&self, record: &ScrapedRecord) -> TrackerResult<String> {
        let base = record
            .base_product_id
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or(TrackerError::MissingIdentity)?;

        if let Some(sku) = record.sku_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            return Ok(sku.to_string());
        }

        match record.variant_label.clone().or_else(|| record.creation_label()) {
            Some(label) if !label.trim().is_empty() => Ok(synthetic_sku_id(base, label.trim())),
            _ => Ok(base.to_string()),
        }
    }

    pub fn reconcile(
        &self,
        record: &ScrapedRecord,
        lookup: impl FnOnce(&str) -> Option<ProductEntity>,
        options: ReconcileOptions,
        now: DateTime<Utc>,
    ) -> TrackerResult<ReconcileDecision> {
        let sku_id = self.identify(record)?;
        let existing = lookup(&sku_id);
        self.apply(record, sku_id, existing, options, now)
    }

    /// Second half of [`reconcile`](Self::reconcile) for callers that look
    /// the entity up themselves
    pub fn apply(
        &self,
        record: &ScrapedRecord,
        sku_id: String,
        existing: Option<ProductEntity>,
        options: ReconcileOptions,
        now: DateTime<Utc>,
    ) -> TrackerResult<ReconcileDecision> {
        let base = record
            .base_product_id
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or(TrackerError::MissingIdentity)?;

        let (mut entity, is_new) = match existing {
            Some(mut entity) => {
                refresh(&mut entity, record, now);
                (entity, false)
            }
            None => (create(record, base, sku_id, now), true),
        };

        if options.track {
            entity.start_tracking(now);
        }

        let history_eligible = is_new || entity.is_tracked || options.force_history;
        Ok(ReconcileDecision {
            entity,
            is_new,
            history_eligible,
        })
    }
}

pub fn synthetic_sku_id(base_product_id: &str, label: &str) -> String {
    let hash = blake3::hash(label.as_bytes());
    let hex = hash.to_hex();
    format!("{}_{}", base_product_id, &hex.as_str()[..SYNTHETIC_SKU_HASH_LEN])
}

fn create(record: &ScrapedRecord, base: &str, sku_id: String, now: DateTime<Utc>) -> ProductEntity {
    ProductEntity {
        base_product_id: base.to_string(),
        sku_id,
        spu_id: record.spu_id.clone(),
        title: record.title.clone().unwrap_or_default(),
        variant_label: record.creation_label(),
        image_url: record.image_url.clone(),
        listing_url: record.listing_url.clone().unwrap_or_else(|| listing_url_for(base)),
        store: record.store.clone(),
        currency: record.currency.clone(),
        rating: record.rating,
        order_count: record.order_count,
        created_at: now,
        updated_at: now,
        is_active: true,
        is_tracked: false,
        tracked_since: None,
    }
}

/// Present fields overwrite, absent fields keep the stored value
fn refresh(entity: &mut ProductEntity, record: &ScrapedRecord, now: DateTime<Utc>) {
    fn keep_or<T: Clone>(slot: &mut Option<T>, incoming: Option<&T>) {
        if let Some(value) = incoming {
            *slot = Some(value.clone());
        }
    }

    if let Some(title) = record.title.as_ref().filter(|t| !t.is_empty()) {
        entity.title = title.clone();
    }
    keep_or(&mut entity.variant_label, record.creation_label().as_ref());
    keep_or(&mut entity.spu_id, record.spu_id.as_ref());
    keep_or(&mut entity.image_url, record.image_url.as_ref());
    keep_or(&mut entity.currency, record.currency.as_ref());
    keep_or(&mut entity.rating, record.rating.as_ref());
    keep_or(&mut entity.order_count, record.order_count.as_ref());
    if let Some(url) = &record.listing_url {
        entity.listing_url = url.clone();
    }

    let StoreIdentity { name, id, url } = &record.store;
    keep_or(&mut entity.store.name, name.as_ref());
    keep_or(&mut entity.store.id, id.as_ref());
    keep_or(&mut entity.store.url, url.as_ref());

    entity.is_active = true;
    entity.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(base: Option<&str>, sku: Option<&str>, label: Option<&str>) -> ScrapedRecord {
        ScrapedRecord {
            base_product_id: base.map(str::to_string),
            sku_id: sku.map(str::to_string),
            title: Some("SUNLU PLA Filament".to_string()),
            variant_label: label.map(str::to_string),
            sale_price: Some("€12,59".to_string()),
            ..ScrapedRecord::default()
        }
    }

    #[test]
    fn missing_base_identity_is_rejected() {
        let reconciler = VariantReconciler::new();
        let err = reconciler
            .reconcile(&record(None, Some("1"), None), |_| None, ReconcileOptions::default(), Utc::now())
            .expect_err("must reject");
        assert!(matches!(err, TrackerError::MissingIdentity));

        assert!(reconciler.identify(&record(Some("  "), None, None)).is_err());
    }

    #[test]
    fn sku_resolution_order() {
        let reconciler = VariantReconciler::new();
        assert_eq!(reconciler.identify(&record(Some("100"), Some("55"), Some("Black"))).ok().as_deref(), Some("55"));
        assert_eq!(reconciler.identify(&record(Some("100"), None, None)).ok().as_deref(), Some("100"));

        let synthetic = reconciler.identify(&record(Some("100"), None, Some("Black"))).unwrap_or_default();
        assert!(synthetic.starts_with("100_"));
        assert_eq!(synthetic.len(), "100_".len() + 8);
    }

    #[test]
    fn synthetic_sku_is_stable_per_label() {
        let reconciler = VariantReconciler::new();
        let a = reconciler.identify(&record(Some("100"), None, Some("Black"))).ok();
        let b = reconciler.identify(&record(Some("100"), None, Some("Black"))).ok();
        let c = reconciler.identify(&record(Some("100"), None, Some("White"))).ok();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn new_entity_is_history_eligible() {
        let decision = VariantReconciler::new()
            .reconcile(&record(Some("100"), Some("55"), None), |_| None, ReconcileOptions::default(), Utc::now())
            .expect("valid record");
        assert!(decision.is_new);
        assert!(decision.history_eligible);
        assert!(!decision.entity.is_tracked);
        assert_eq!(decision.entity.listing_url, "https://www.aliexpress.com/item/100.html");
    }

    #[test]
    fn passive_resighting_is_not_eligible() {
        let reconciler = VariantReconciler::new();
        let created = Utc::now() - Duration::days(3);
        let existing = reconciler
            .reconcile(&record(Some("100"), Some("55"), None), |_| None, ReconcileOptions::default(), created)
            .expect("valid record")
            .entity;

        let now = Utc::now();
        let decision = reconciler
            .reconcile(
                &record(Some("100"), Some("55"), None),
                |_| Some(existing.clone()),
                ReconcileOptions::default(),
                now,
            )
            .expect("valid record");
        assert!(!decision.is_new);
        assert!(!decision.history_eligible);
        assert_eq!(decision.entity.created_at, created);
        assert_eq!(decision.entity.updated_at, now);

        let forced = reconciler
            .reconcile(
                &record(Some("100"), Some("55"), None),
                |_| Some(existing.clone()),
                ReconcileOptions { force_history: true, ..ReconcileOptions::default() },
                now,
            )
            .expect("valid record");
        assert!(forced.history_eligible);
    }

    #[test]
    fn tracked_entities_and_track_option_are_eligible() {
        let reconciler = VariantReconciler::new();
        let now = Utc::now();
        let mut existing = reconciler
            .reconcile(&record(Some("100"), Some("55"), None), |_| None, ReconcileOptions::default(), now)
            .expect("valid record")
            .entity;
        existing.start_tracking(now);

        let decision = reconciler
            .reconcile(&record(Some("100"), Some("55"), None), |_| Some(existing.clone()), ReconcileOptions::default(), now)
            .expect("valid record");
        assert!(decision.history_eligible);

        existing.stop_tracking();
        let tracked = reconciler
            .reconcile(
                &record(Some("100"), Some("55"), None),
                |_| Some(existing.clone()),
                ReconcileOptions { track: true, ..ReconcileOptions::default() },
                now,
            )
            .expect("valid record");
        assert!(tracked.entity.is_tracked);
        assert_eq!(tracked.entity.tracked_since, Some(now));
        assert!(tracked.history_eligible);
    }

    #[test]
    fn refresh_keeps_fields_the_record_lacks() {
        let reconciler = VariantReconciler::new();
        let now = Utc::now();
        let mut full = record(Some("100"), Some("55"), Some("Black"));
        full.rating = Some(4.7);
        full.store.name = Some("Shop".to_string());
        let mut existing = reconciler
            .reconcile(&full, |_| None, ReconcileOptions::default(), now)
            .expect("valid record")
            .entity;
        existing.is_active = false;

        let mut sparse = record(Some("100"), Some("55"), None);
        sparse.title = None;
        let refreshed = reconciler
            .reconcile(&sparse, |_| Some(existing.clone()), ReconcileOptions::default(), now)
            .expect("valid record")
            .entity;

        assert!(refreshed.is_active);
        assert_eq!(refreshed.title, "SUNLU PLA Filament");
        assert_eq!(refreshed.variant_label.as_deref(), Some("Black"));
        assert_eq!(refreshed.rating, Some(4.7));
        assert_eq!(refreshed.store.name.as_deref(), Some("Shop"));
    }
}
