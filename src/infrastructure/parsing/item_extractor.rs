//! Provider item normalization
//!
//! Turns raw search items, variant payloads and page swatches into
//! [`ScrapedRecord`]s. Only fields named in the [`FieldSelection`] are
//! carried over; everything else is left absent.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;
use url::Url;

use super::variant_signals::VariantSignalExtractor;
use crate::domain::product::StoreIdentity;
use crate::domain::provider_item::{
    RawPrice, RawProviderItem, RawVariantItem, RawVariantPayload, ScrapedRecord, SkuPropertyDef, VariantImage,
};

pub const LISTING_URL_BASE: &str = "https://www.aliexpress.com/item/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductField {
    ProductId,
    SkuId,
    SpuId,
    Title,
    VariantTitle,
    VariantAttributes,
    SalePrice,
    OriginalPrice,
    Discount,
    Currency,
    Rating,
    OrderCount,
    StoreName,
    StoreId,
    StoreUrl,
    ProductUrl,
    ImageUrl,
}

impl ProductField {
    pub const ALL: [ProductField; 17] = [
        Self::ProductId,
        Self::SkuId,
        Self::SpuId,
        Self::Title,
        Self::VariantTitle,
        Self::VariantAttributes,
        Self::SalePrice,
        Self::OriginalPrice,
        Self::Discount,
        Self::Currency,
        Self::Rating,
        Self::OrderCount,
        Self::StoreName,
        Self::StoreId,
        Self::StoreUrl,
        Self::ProductUrl,
        Self::ImageUrl,
    ];
}

/// Which provider fields an ingestion run extracts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelection(BTreeSet<ProductField>);

impl Default for FieldSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl FieldSelection {
    pub fn all() -> Self {
        Self(ProductField::ALL.into_iter().collect())
    }

    pub fn only(fields: impl IntoIterator<Item = ProductField>) -> Self {
        Self(fields.into_iter().collect())
    }

    pub fn contains(&self, field: ProductField) -> bool {
        self.0.contains(&field)
    }

    fn pick<T>(&self, field: ProductField, value: impl FnOnce() -> Option<T>) -> Option<T> {
        if self.contains(field) { value() } else { None }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ItemExtractor {
    signals: VariantSignalExtractor,
}

impl ItemExtractor {
    pub fn new(signals: VariantSignalExtractor) -> Self {
        Self { signals }
    }

    pub fn signals(&self) -> &VariantSignalExtractor {
        &self.signals
    }

    pub fn extract_search_item(&self, raw: &RawProviderItem, selection: &FieldSelection) -> ScrapedRecord {
        let prices = raw.prices.as_ref();
        let sale = prices.and_then(|p| p.sale_price.as_ref());
        let original = prices.and_then(|p| p.original_price.as_ref());
        let store = raw.store.as_ref();

        let base_product_id = selection.pick(ProductField::ProductId, || raw.product_id.clone());
        let title = selection.pick(ProductField::Title, || {
            raw.title
                .as_ref()
                .and_then(|t| t.display_title.as_deref())
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        });

        let variant_attributes = selection
            .pick(ProductField::VariantAttributes, || {
                let attrs = prices
                    .and_then(|p| p.sku_attr.as_deref())
                    .map(|attr| self.signals.extract_from_sku_attributes(attr, &[]))
                    .unwrap_or_default();
                (!attrs.is_empty()).then_some(attrs)
            })
            .unwrap_or_default();

        // Free-form price attributes only feed the label when the title has no signal
        let variant_label = selection.pick(ProductField::VariantTitle, || {
            let fallback: Vec<(String, String)> = prices
                .map(|p| {
                    p.attributes
                        .iter()
                        .filter_map(|(key, value)| value_to_text(value).map(|v| (key.clone(), v)))
                        .collect()
                })
                .unwrap_or_default();
            self.variant_label(title.as_deref(), &fallback)
        });

        ScrapedRecord {
            sku_id: selection.pick(ProductField::SkuId, || prices.and_then(|p| p.sku_id.clone())),
            spu_id: selection.pick(ProductField::SpuId, || {
                raw.trace.as_ref().and_then(|t| t.ut_log_map.as_ref()).and_then(|m| m.spu_id.clone())
            }),
            sale_price: selection.pick(ProductField::SalePrice, || formatted_price(sale)),
            original_price: selection.pick(ProductField::OriginalPrice, || formatted_price(original)),
            discount_percent: selection.pick(ProductField::Discount, || {
                sale.and_then(|p| p.discount.as_ref()).and_then(discount_value)
            }),
            currency: selection.pick(ProductField::Currency, || {
                sale.and_then(|p| p.currency_code.clone())
                    .or_else(|| original.and_then(|p| p.currency_code.clone()))
                    .filter(|c| !c.trim().is_empty())
            }),
            rating: selection.pick(ProductField::Rating, || {
                raw.evaluation.as_ref().and_then(|e| e.star_rating.as_ref()).and_then(rating_value)
            }),
            order_count: selection.pick(ProductField::OrderCount, || {
                raw.trade.as_ref().and_then(|t| t.real_trade_count.as_ref()).and_then(order_count_value)
            }),
            store: StoreIdentity {
                name: selection.pick(ProductField::StoreName, || {
                    store.and_then(|s| s.store_name.clone()).filter(|n| !n.trim().is_empty())
                }),
                id: selection.pick(ProductField::StoreId, || store.and_then(|s| s.store_id.clone())),
                url: selection.pick(ProductField::StoreUrl, || {
                    store.and_then(|s| s.store_url.as_deref()).and_then(normalize_url)
                }),
            },
            listing_url: selection.pick(ProductField::ProductUrl, || base_product_id.as_deref().map(listing_url_for)),
            image_url: selection.pick(ProductField::ImageUrl, || {
                raw.image.as_ref().and_then(|i| i.img_url.as_deref()).and_then(normalize_url)
            }),
            base_product_id,
            title,
            variant_label,
            variant_attributes,
        }
    }

    /// One record per SKU of the variant endpoint response
    pub fn extract_variant_payload(&self, base_product_id: &str, payload: &RawVariantPayload) -> Vec<ScrapedRecord> {
        payload
            .skus
            .iter()
            .map(|sku| self.extract_variant_item(base_product_id, sku, &payload.properties))
            .collect()
    }

    fn extract_variant_item(
        &self,
        base_product_id: &str,
        sku: &RawVariantItem,
        properties: &[SkuPropertyDef],
    ) -> ScrapedRecord {
        let attr_string = sku.sku_attr.as_deref().unwrap_or_default();
        let variant_attributes = self.signals.extract_from_sku_attributes(attr_string, properties);
        let image_url = sku
            .image_url
            .as_deref()
            .and_then(normalize_url)
            .or_else(|| swatch_image(attr_string, properties));

        ScrapedRecord {
            base_product_id: Some(base_product_id.to_string()),
            sku_id: sku.sku_id.clone(),
            variant_label: self.variant_label(None, &variant_attributes),
            variant_attributes,
            sale_price: sku.sale_price.as_ref().and_then(value_to_text),
            original_price: sku.original_price.as_ref().and_then(value_to_text),
            discount_percent: sku.discount.as_ref().and_then(discount_value),
            currency: sku.currency_code.clone().filter(|c| !c.trim().is_empty()),
            listing_url: Some(listing_url_for(base_product_id)),
            image_url,
            ..ScrapedRecord::default()
        }
    }

    /// Records labeled from swatch alt text; swatches without a usable
    /// label, and repeated labels, are skipped
    pub fn extract_variant_images(&self, base_product_id: &str, images: &[VariantImage]) -> Vec<ScrapedRecord> {
        let mut seen = HashSet::new();
        images
            .iter()
            .filter_map(|image| {
                let label = self
                    .signals
                    .extract_from_alt_text(&image.alt_text)
                    .or_else(|| self.signals.extract_from_sku_code(&image.alt_text))?;
                if !seen.insert(label.to_lowercase()) {
                    debug!(base_product_id, label = %label, "Duplicate swatch label skipped");
                    return None;
                }
                Some(ScrapedRecord {
                    base_product_id: Some(base_product_id.to_string()),
                    sku_id: image.sku_id.clone(),
                    variant_label: Some(label),
                    listing_url: Some(listing_url_for(base_product_id)),
                    image_url: image.image_url.as_deref().and_then(normalize_url),
                    ..ScrapedRecord::default()
                })
            })
            .collect()
    }

    /// Title signals first, then the same battery over attribute values
    fn variant_label(&self, title: Option<&str>, attributes: &[(String, String)]) -> Option<String> {
        title
            .and_then(|t| self.signals.extract_from_title(t))
            .or_else(|| attributes.iter().find_map(|(_, value)| self.signals.extract_from_title(value)))
    }
}

pub fn listing_url_for(base_product_id: &str) -> String {
    format!("{LISTING_URL_BASE}{base_product_id}.html")
}

/// Protocol-relative URLs get `https:`; anything unparsable is dropped
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = if trimmed.starts_with("//") {
        format!("https:{trimmed}")
    } else {
        trimmed.to_string()
    };
    match Url::parse(&candidate) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
            debug!("Dropping unparsable url '{}': {}", trimmed, e);
            None
        }
    }
}

fn formatted_price(price: Option<&RawPrice>) -> Option<String> {
    price
        .and_then(|p| p.formatted_price.as_deref())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn discount_value(value: &Value) -> Option<f64> {
    value_to_f64(value).map(f64::abs)
}

fn rating_value(value: &Value) -> Option<f64> {
    value_to_f64(value).filter(|r| (0.0..=5.0).contains(r))
}

/// `"1,000+ sold"` → 1000
fn order_count_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let digits: String = s.chars().filter(char::is_ascii_digit).collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

fn swatch_image(attr_string: &str, properties: &[SkuPropertyDef]) -> Option<String> {
    properties
        .iter()
        .flat_map(|p| p.sku_property_values.iter())
        .filter(|v| {
            v.property_value_id
                .as_deref()
                .is_some_and(|id| attr_string.split([',', ';', '#']).any(|part| part.ends_with(&format!(":{id}"))))
        })
        .find_map(|v| v.sku_property_image_path.as_deref().and_then(normalize_url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider_item::SkuPropertyValue;
    use serde_json::json;

    fn search_item() -> RawProviderItem {
        serde_json::from_value(json!({
            "productId": "1005001",
            "title": { "displayTitle": "  SUNLU PLA Filament 1.75mm 1kg Black  " },
            "prices": {
                "skuId": 12000036,
                "salePrice": { "formattedPrice": "€ 12,59", "currencyCode": "EUR", "discount": "35%" },
                "originalPrice": { "formattedPrice": "€ 19,49" }
            },
            "trace": { "utLogMap": { "spu_id": "777" } },
            "image": { "imgUrl": "//ae01.alicdn.com/kf/abc.jpg" },
            "store": { "storeName": "SUNLU Official", "storeId": 1234, "storeUrl": "//www.aliexpress.com/store/1234" },
            "trade": { "realTradeCount": "1,000+ sold" },
            "evaluation": { "starRating": "4.8" }
        }))
        .expect("valid item")
    }

    #[test]
    fn extracts_all_fields_by_default() {
        let record = ItemExtractor::default().extract_search_item(&search_item(), &FieldSelection::default());

        assert_eq!(record.base_product_id.as_deref(), Some("1005001"));
        assert_eq!(record.sku_id.as_deref(), Some("12000036"));
        assert_eq!(record.spu_id.as_deref(), Some("777"));
        assert_eq!(record.title.as_deref(), Some("SUNLU PLA Filament 1.75mm 1kg Black"));
        assert_eq!(record.variant_label.as_deref(), Some("1kg"));
        assert_eq!(record.sale_price.as_deref(), Some("€ 12,59"));
        assert_eq!(record.original_price.as_deref(), Some("€ 19,49"));
        assert_eq!(record.discount_percent, Some(35.0));
        assert_eq!(record.currency.as_deref(), Some("EUR"));
        assert_eq!(record.rating, Some(4.8));
        assert_eq!(record.order_count, Some(1000));
        assert_eq!(record.store.id.as_deref(), Some("1234"));
        assert_eq!(record.store.url.as_deref(), Some("https://www.aliexpress.com/store/1234"));
        assert_eq!(record.image_url.as_deref(), Some("https://ae01.alicdn.com/kf/abc.jpg"));
        assert_eq!(record.listing_url.as_deref(), Some("https://www.aliexpress.com/item/1005001.html"));
    }

    #[test]
    fn search_item_sku_attributes_become_the_creation_label() {
        let item: RawProviderItem = serde_json::from_value(json!({
            "productId": "300",
            "title": { "displayTitle": "Travel Suitcase" },
            "prices": {
                "skuId": "3001",
                "skuAttr": "14:173,5:100014064#Black;14:365,200000463:100007326#2 Wheels",
                "salePrice": { "formattedPrice": "€89,00" },
                "attributes": { "note": "ignored for attributes" }
            }
        }))
        .expect("valid item");

        let record = ItemExtractor::default().extract_search_item(&item, &FieldSelection::all());
        assert_eq!(
            record.variant_attributes,
            vec![("Variant_0".to_string(), "Black".to_string()), ("Variant_1".to_string(), "2 Wheels".to_string())]
        );
        assert_eq!(record.creation_label().as_deref(), Some("Black, 2 Wheels"));
    }

    #[test]
    fn price_attributes_only_back_up_the_title_label() {
        let item: RawProviderItem = serde_json::from_value(json!({
            "productId": "301",
            "title": { "displayTitle": "Plain description without signals" },
            "prices": {
                "skuId": "3011",
                "salePrice": { "formattedPrice": "€9,00" },
                "attributes": { "colour": "Blue" }
            }
        }))
        .expect("valid item");

        let record = ItemExtractor::default().extract_search_item(&item, &FieldSelection::all());
        assert!(record.variant_attributes.is_empty());
        assert_eq!(record.variant_label.as_deref(), Some("Blue"));
        assert_eq!(record.creation_label().as_deref(), Some("Blue"));

        let titled = ItemExtractor::default().extract_search_item(&search_item(), &FieldSelection::all());
        assert!(titled.variant_attributes.is_empty());
    }

    #[test]
    fn unselected_fields_are_absent() {
        let selection = FieldSelection::only([ProductField::ProductId, ProductField::Title, ProductField::SalePrice]);
        let record = ItemExtractor::default().extract_search_item(&search_item(), &selection);

        assert_eq!(record.base_product_id.as_deref(), Some("1005001"));
        assert!(record.sku_id.is_none());
        assert!(record.variant_label.is_none());
        assert!(record.listing_url.is_none());
        assert!(record.store.name.is_none());
        assert_eq!(record.sale_price.as_deref(), Some("€ 12,59"));
    }

    #[test]
    fn variant_payload_maps_sku_attributes() {
        let payload = RawVariantPayload {
            skus: vec![RawVariantItem {
                sku_id: Some("55".into()),
                sku_attr: Some("14:173#Black;5:361386#1KG".into()),
                sale_price: Some(json!(12.5)),
                currency_code: Some("USD".into()),
                ..RawVariantItem::default()
            }],
            properties: vec![
                SkuPropertyDef {
                    sku_property_id: Some("14".into()),
                    sku_property_name: Some("Color".into()),
                    sku_property_values: vec![SkuPropertyValue {
                        property_value_id: Some("173".into()),
                        sku_property_image_path: Some("//img.example.com/black.jpg".into()),
                    }],
                },
                SkuPropertyDef {
                    sku_property_id: Some("5".into()),
                    sku_property_name: Some("Size".into()),
                    ..SkuPropertyDef::default()
                },
            ],
        };

        let records = ItemExtractor::default().extract_variant_payload("42", &payload);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(
            record.variant_attributes,
            vec![("Color".to_string(), "Black".to_string()), ("Size".to_string(), "1KG".to_string())]
        );
        assert_eq!(record.variant_label.as_deref(), Some("Black"));
        assert_eq!(record.creation_label().as_deref(), Some("Black, 1KG"));
        assert_eq!(record.sale_price.as_deref(), Some("12.5"));
        assert_eq!(record.image_url.as_deref(), Some("https://img.example.com/black.jpg"));
    }

    #[test]
    fn swatch_images_become_labeled_records() {
        let images = vec![
            VariantImage { alt_text: "PLA Orange".into(), ..VariantImage::default() },
            VariantImage { alt_text: "pla orange".into(), ..VariantImage::default() },
            VariantImage { alt_text: "   ".into(), ..VariantImage::default() },
            VariantImage { alt_text: "Bundle B".into(), sku_id: Some("9".into()), ..VariantImage::default() },
        ];
        let records = ItemExtractor::default().extract_variant_images("42", &images);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].variant_label.as_deref(), Some("PLA Orange"));
        assert_eq!(records[1].variant_label.as_deref(), Some("Bundle B"));
        assert_eq!(records[1].sku_id.as_deref(), Some("9"));
    }

    #[test]
    fn normalizes_urls() {
        assert_eq!(normalize_url("//a.com/x").as_deref(), Some("https://a.com/x"));
        assert_eq!(normalize_url("https://a.com/x").as_deref(), Some("https://a.com/x"));
        assert_eq!(normalize_url("not a url"), None);
        assert_eq!(normalize_url("  "), None);
    }
}
