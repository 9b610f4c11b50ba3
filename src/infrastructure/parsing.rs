//! Parsing heuristics for marketplace data
//!
//! Pure functions over provider text: price strings, variant signals and
//! raw item normalization. Nothing here performs I/O.

pub mod item_extractor;
pub mod price_parser;
pub mod variant_signals;

pub use item_extractor::{FieldSelection, ItemExtractor, ProductField};
pub use price_parser::{PriceParser, parse_price};
pub use variant_signals::{SignalCategory, VariantRule, VariantSignal, VariantSignalExtractor};
