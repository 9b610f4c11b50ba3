//! Provider payload shapes and the normalized record consumed by reconciliation
//!
//! The marketplace search API returns loosely typed JSON: ids arrive as
//! strings or numbers, ratings as strings or floats. The raw types accept
//! both and leave interpretation to `infrastructure::item_extractor`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::product::StoreIdentity;

/// One item from a search result page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawProviderItem {
    #[serde(deserialize_with = "flexible_id")]
    pub product_id: Option<String>,
    pub title: Option<RawTitle>,
    pub prices: Option<RawPrices>,
    pub trace: Option<RawTrace>,
    pub image: Option<RawImage>,
    pub store: Option<RawStore>,
    pub trade: Option<RawTrade>,
    pub evaluation: Option<RawEvaluation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTitle {
    pub display_title: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPrices {
    #[serde(deserialize_with = "flexible_id")]
    pub sku_id: Option<String>,
    /// e.g. `"14:173,5:100014064#Black;14:365,200000463:100007326#2 Wheels"`
    pub sku_attr: Option<String>,
    pub sale_price: Option<RawPrice>,
    pub original_price: Option<RawPrice>,
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPrice {
    pub formatted_price: Option<String>,
    pub currency_code: Option<String>,
    pub discount: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawTrace {
    #[serde(rename = "utLogMap")]
    pub ut_log_map: Option<RawUtLogMap>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawUtLogMap {
    #[serde(deserialize_with = "flexible_id")]
    pub spu_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawImage {
    pub img_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawStore {
    pub store_name: Option<String>,
    #[serde(deserialize_with = "flexible_id")]
    pub store_id: Option<String>,
    pub store_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTrade {
    pub real_trade_count: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawEvaluation {
    pub star_rating: Option<Value>,
}

/// One SKU returned by the per-product variant endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawVariantItem {
    #[serde(deserialize_with = "flexible_id")]
    pub sku_id: Option<String>,
    pub sku_attr: Option<String>,
    pub sale_price: Option<Value>,
    pub original_price: Option<Value>,
    pub discount: Option<Value>,
    pub currency_code: Option<String>,
    pub image_url: Option<String>,
}

/// Variant endpoint response: SKUs plus the property definitions that name
/// the attribute ids inside `sku_attr`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawVariantPayload {
    pub skus: Vec<RawVariantItem>,
    pub properties: Vec<SkuPropertyDef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkuPropertyDef {
    #[serde(deserialize_with = "flexible_id")]
    pub sku_property_id: Option<String>,
    pub sku_property_name: Option<String>,
    pub sku_property_values: Vec<SkuPropertyValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkuPropertyValue {
    #[serde(deserialize_with = "flexible_id")]
    pub property_value_id: Option<String>,
    pub sku_property_image_path: Option<String>,
}

/// A variant swatch image scraped from a rendered product page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VariantImage {
    pub alt_text: String,
    pub image_url: Option<String>,
    pub sku_id: Option<String>,
}

/// Normalized listing fields, ready for reconciliation.
///
/// Prices stay as provider text so the pipeline can tell "no price given"
/// from "price given but unparsable".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedRecord {
    pub base_product_id: Option<String>,
    pub sku_id: Option<String>,
    pub spu_id: Option<String>,
    pub title: Option<String>,
    pub variant_label: Option<String>,
    /// Property name to display value, in attribute order
    pub variant_attributes: Vec<(String, String)>,
    pub sale_price: Option<String>,
    pub original_price: Option<String>,
    pub discount_percent: Option<f64>,
    pub currency: Option<String>,
    pub rating: Option<f64>,
    pub order_count: Option<i64>,
    pub store: StoreIdentity,
    pub listing_url: Option<String>,
    pub image_url: Option<String>,
}

impl ScrapedRecord {
    /// Label stored on first sighting: joined SKU attribute values win over
    /// the title-derived label
    pub fn creation_label(&self) -> Option<String> {
        if self.variant_attributes.is_empty() {
            self.variant_label.clone()
        } else {
            Some(
                self.variant_attributes
                    .iter()
                    .map(|(_, value)| value.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        }
    }
}

/// Accepts `"123"`, `123` or `null`; empty strings become `None`
fn flexible_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
