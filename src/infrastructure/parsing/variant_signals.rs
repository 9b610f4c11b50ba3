//! Variant label heuristics
//!
//! A listing title is run through an ordered table of pattern rules. Every
//! rule tags its matches with a [`SignalCategory`]; the winner is the first
//! match of the highest-priority category present. Titles are noisy and the
//! token lists overlap (`Matte` is both a finish and a filament line), so
//! results are best-effort.

use regex::Regex;
use tracing::warn;

use crate::domain::provider_item::SkuPropertyDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalCategory {
    Hardware,
    Quantity,
    Material,
    Color,
    Power,
    Dimension,
    Size,
    Generic,
}

/// Resolution order; categories not listed only win through the
/// first-match fallback
pub const DEFAULT_PRIORITY: &[SignalCategory] = &[
    SignalCategory::Hardware,
    SignalCategory::Quantity,
    SignalCategory::Material,
    SignalCategory::Color,
    SignalCategory::Power,
    SignalCategory::Dimension,
];

const COLOR_WORDS: &str = "Black|White|Red|Blue|Green|Yellow|Orange|Purple|Pink|Gray|Grey|Silver|Gold|Brown|Clear|Transparent|Cyan|Magenta|Lime|Navy|Maroon|Olive|Teal|Aqua|Fuchsia|Beige|Ivory|Khaki|Lavender|Coral|Salmon|Turquoise|Violet|Indigo|Crimson|Rose|Amber|Emerald|Ruby|Sapphire|Pearl|Bronze|Copper|Platinum|Metallic|Matte|Glossy|Satin";

const DEFAULT_RULES: &[(&str, SignalCategory, &str)] = &[
    ("intel_low_power", SignalCategory::Hardware, r"\b(N100|N150|N200|N300|N5100|N6000)\b"),
    ("ryzen", SignalCategory::Hardware, r"\b(Ryzen\s+\d+\w*)\b"),
    ("memory", SignalCategory::Hardware, r"\b(\d+GB\s+DDR[45]?)\b"),
    ("core", SignalCategory::Hardware, r"\b(Core\s+i[3579]-\d+\w*)\b"),
    ("celeron", SignalCategory::Hardware, r"\b(Celeron\s+\w+)\b"),
    ("storage", SignalCategory::Hardware, r"\b(\d+TB?\s+SSD)\b"),
    ("wifi", SignalCategory::Hardware, r"\b(WiFi\s*[56])\b"),
    ("filament_material", SignalCategory::Material, r"\b(PLA|ABS|PETG|TPU|PLA\+|WOOD|SILK|GLOW|CARBON)\b"),
    ("filament_diameter", SignalCategory::Dimension, r"\b(1\.75mm|3\.0mm|2\.85mm)\b"),
    ("kilograms", SignalCategory::Quantity, r"\b(\d+(?:\.\d+)?kg)\b"),
    ("meters", SignalCategory::Quantity, r"\b(\d+M)\b"),
    ("grams", SignalCategory::Quantity, r"\b(\d+g)\b"),
    ("color", SignalCategory::Color, ""),
    ("clothing_size", SignalCategory::Size, r"\b(XS|S|M|L|XL|XXL|XXXL)\b"),
    ("measurement", SignalCategory::Dimension, r"\b(\d+\.?\d*\s*(?:mm|cm|m|inch|in))\b"),
    ("dimensions", SignalCategory::Dimension, r"\b(\d+x\d+(?:x\d+)?)\b"),
    ("battery", SignalCategory::Power, r"\b(\d+mAh)\b"),
    ("watts", SignalCategory::Power, r"\b(\d+W)\b"),
    ("amps", SignalCategory::Power, r"\b(\d+A)\b"),
    ("volts", SignalCategory::Power, r"\b(\d+V)\b"),
    ("connector_type", SignalCategory::Generic, r"\b(Type-?\s*[A-C])\b"),
    ("model", SignalCategory::Generic, r"\b(Model\s*[A-Z0-9]+)\b"),
    ("version", SignalCategory::Generic, r"\b(V\d+(?:\.\d+)?)\b"),
];

const ALT_MATERIALS: &[&str] = &["PLA", "PETG", "TPU", "ABS", "ASA", "WOOD", "SILK", "MATTE"];
const ALT_COLORS: &[&str] = &[
    "Black", "White", "Red", "Blue", "Green", "Yellow", "Orange", "Purple", "Pink", "Gray", "Grey", "Silver", "Gold",
    "Brown", "Transparent", "Clear", "Beige",
];
const ALT_TEXT_MAX_LEN: usize = 30;

const SKU_ALT_PATTERNS: &[&str] = &[
    r"^(PETG|PLA|PLAp|ABS|TPU|SILK|HS\s+PETG|HS\s+Matte\s+PLA|HS\s+PLAp)",
    r"(\d+M)",
    r"(\d+kg|\d+g)",
    r"(BK|WT|RD|BL|GY|GN|YL|OR|PK|SV|CL)",
];

/// One pattern rule in the title battery
#[derive(Debug, Clone)]
pub struct VariantRule {
    pub name: String,
    pub category: SignalCategory,
    regex: Regex,
}

impl VariantRule {
    /// Patterns are compiled case-insensitively; the first capture group is
    /// the signal text
    pub fn new(name: impl Into<String>, category: SignalCategory, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            category,
            regex: Regex::new(&format!("(?i){pattern}"))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSignal {
    pub category: SignalCategory,
    pub rule: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct VariantSignalExtractor {
    rules: Vec<VariantRule>,
    priority: Vec<SignalCategory>,
    sku_alt_patterns: Vec<Regex>,
}

impl Default for VariantSignalExtractor {
    fn default() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .filter_map(|(name, category, pattern)| {
                let pattern = if *category == SignalCategory::Color {
                    format!(r"\b({COLOR_WORDS})\b")
                } else {
                    (*pattern).to_string()
                };
                match VariantRule::new(*name, *category, &pattern) {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        warn!("Failed to compile variant rule '{}': {}", name, e);
                        None
                    }
                }
            })
            .collect();

        let sku_alt_patterns = SKU_ALT_PATTERNS
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!("Failed to compile SKU alt pattern '{}': {}", pattern, e);
                    None
                }
            })
            .collect();

        Self {
            rules,
            priority: DEFAULT_PRIORITY.to_vec(),
            sku_alt_patterns,
        }
    }
}

impl VariantSignalExtractor {
    pub fn with_rules(rules: Vec<VariantRule>, priority: Vec<SignalCategory>) -> Self {
        Self {
            rules,
            priority,
            ..Self::default()
        }
    }

    /// Appends a rule after the built-in battery
    pub fn push_rule(&mut self, rule: VariantRule) {
        self.rules.push(rule);
    }

    /// Every match of every rule, in rule order then position order
    pub fn collect_signals(&self, title: &str) -> Vec<VariantSignal> {
        let mut signals = Vec::new();
        for rule in &self.rules {
            for caps in rule.regex.captures_iter(title) {
                if let Some(m) = caps.get(1).or_else(|| caps.get(0)) {
                    signals.push(VariantSignal {
                        category: rule.category,
                        rule: rule.name.clone(),
                        text: m.as_str().to_string(),
                    });
                }
            }
        }
        signals
    }

    pub fn extract_from_title(&self, title: &str) -> Option<String> {
        let signals = self.collect_signals(title);
        if signals.is_empty() {
            return None;
        }

        self.priority
            .iter()
            .find_map(|category| signals.iter().find(|s| s.category == *category))
            .or_else(|| signals.first())
            .map(|s| s.text.clone())
    }

    /// Maps `idPath#displayValue` pairs to property names.
    ///
    /// A pair belongs to the first property whose id occurs in its id path;
    /// unmatched pairs get a synthesized `Variant_<n>` key.
    pub fn extract_from_sku_attributes(
        &self,
        attr_string: &str,
        property_defs: &[SkuPropertyDef],
    ) -> Vec<(String, String)> {
        let mut attributes: Vec<(String, String)> = Vec::new();

        for pair in attr_string.split(';') {
            let Some((id_path, display_value)) = pair.split_once('#') else {
                continue;
            };
            let display_value = display_value.trim();
            if display_value.is_empty() {
                continue;
            }

            let property_name = property_defs.iter().find_map(|prop| {
                let prop_id = prop.sku_property_id.as_deref()?;
                id_path.contains(prop_id).then(|| {
                    prop.sku_property_name
                        .clone()
                        .unwrap_or_else(|| format!("Attribute_{prop_id}"))
                })
            });
            let key = property_name.unwrap_or_else(|| format!("Variant_{}", attributes.len()));

            match attributes.iter_mut().find(|(existing, _)| *existing == key) {
                Some(slot) => slot.1 = display_value.to_string(),
                None => attributes.push((key, display_value.to_string())),
            }
        }

        attributes
    }

    /// Material + color gives `"<MATERIAL> <Color>"`; a lone material or
    /// color keeps the whole text; otherwise short text is taken as is.
    pub fn extract_from_alt_text(&self, alt: &str) -> Option<String> {
        let cleaned = alt.trim();
        if cleaned.is_empty() {
            return None;
        }
        let upper = cleaned.to_uppercase();

        if let Some(material) = ALT_MATERIALS.iter().find(|m| upper.contains(*m)) {
            return Some(
                ALT_COLORS
                    .iter()
                    .find(|c| upper.contains(&c.to_uppercase()))
                    .map_or_else(|| cleaned.to_string(), |color| format!("{material} {color}")),
            );
        }

        if ALT_COLORS.iter().any(|c| upper.contains(&c.to_uppercase())) {
            return Some(cleaned.to_string());
        }

        (cleaned.chars().count() <= ALT_TEXT_MAX_LEN).then(|| cleaned.to_string())
    }

    /// Compact SKU swatch codes such as `"PETG 2RD2BLBK"` or `"HS Matte PLA"`.
    /// Codes are matched case-sensitively.
    pub fn extract_from_sku_code(&self, alt: &str) -> Option<String> {
        for regex in &self.sku_alt_patterns {
            if let Some(m) = regex.captures(alt).and_then(|caps| caps.get(1)) {
                let variant = m.as_str();
                let stripped = variant
                    .get(..3)
                    .filter(|prefix| prefix.eq_ignore_ascii_case("HS "))
                    .map_or(variant, |_| variant[3..].trim());
                return Some(stripped.to_string());
            }
        }
        alt.split_whitespace().next().map(str::to_string)
    }
}
