//! Locale-ambiguous price string parsing
//!
//! Marketplace prices arrive as display text (`"€ 19,49"`, `"US $1,234.56"`,
//! `"1.234,56"`). The separator that occurs last is the decimal separator
//! when both appear; a lone comma is decimal only when exactly two digits
//! follow it.

use once_cell::sync::Lazy;

const DEFAULT_CURRENCY_SYMBOLS: &[&str] = &[
    "US $", "US$", "€", "$", "£", "¥", "₩", "₹", "₽", "₺", "zł", "R$", "C$", "A$", "CHF", "EUR", "USD", "GBP",
];

static DEFAULT_PARSER: Lazy<PriceParser> = Lazy::new(PriceParser::default);

/// Parses a price with the default currency symbol set.
///
/// Returns `None` for empty or non-numeric input; callers must treat `None`
/// as "no price available", never as zero.
pub fn parse_price(text: &str) -> Option<f64> {
    DEFAULT_PARSER.parse(text)
}

#[derive(Debug, Clone)]
pub struct PriceParser {
    /// Longest symbols first so `"US $"` is stripped before `"$"`
    currency_symbols: Vec<String>,
}

impl Default for PriceParser {
    fn default() -> Self {
        Self::with_symbols(DEFAULT_CURRENCY_SYMBOLS.iter().map(|s| (*s).to_string()))
    }
}

impl PriceParser {
    pub fn with_symbols(symbols: impl IntoIterator<Item = String>) -> Self {
        let mut currency_symbols: Vec<String> = symbols.into_iter().filter(|s| !s.is_empty()).collect();
        currency_symbols.sort_by_key(|s| std::cmp::Reverse(s.chars().count()));
        Self { currency_symbols }
    }

    pub fn parse(&self, text: &str) -> Option<f64> {
        let mut cleaned = text.trim().to_string();
        for symbol in &self.currency_symbols {
            if cleaned.contains(symbol.as_str()) {
                cleaned = cleaned.replace(symbol.as_str(), "");
            }
        }
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            return None;
        }

        let normalized = normalize_separators(cleaned);
        let compact: String = normalized.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() || !compact.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+')) {
            return None;
        }

        compact.parse::<f64>().ok().filter(|value| value.is_finite())
    }
}

fn normalize_separators(text: &str) -> String {
    let last_comma = text.rfind(',');
    let last_dot = text.rfind('.');

    match (last_comma, last_dot) {
        (Some(comma), Some(dot)) if comma > dot => text.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => text.replace(',', ""),
        (Some(comma), None) => {
            let digits_after = text[comma + 1..].trim_end();
            if digits_after.len() == 2 && digits_after.chars().all(|c| c.is_ascii_digit()) {
                let (head, tail) = text.split_at(comma);
                format!("{}.{}", head.replace(',', ""), &tail[1..])
            } else {
                text.replace(',', "")
            }
        }
        _ => text.to_string(),
    }
}
