// Price text parsing shared by every strategy.
//
// Handles French and English layouts: "1 234,56 €", "1.234,56", "1,234.56",
// "19.99", and the split-cents form "12€99".

use std::sync::LazyLock;

use regex::Regex;

pub const MIN_PRICE: f64 = 0.01;
pub const MAX_PRICE: f64 = 100_000.0;

static RE_SPLIT_CENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\d.,])(\d{1,5})€(\d{2})(?:\D|$)").expect("valid regex"));
static RE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d[\d\s\x{a0}\x{202f}.,]*").expect("valid regex")
});
static RE_GROUPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}([.,]\d{3})+$").expect("valid regex"));

pub fn is_plausible(price: f64) -> bool {
    price.is_finite() && (MIN_PRICE..=MAX_PRICE).contains(&price)
}

/// Parse the first price-looking number in `raw`. Returns `None` when the
/// value is missing or outside the plausible retail range.
pub fn parse_price(raw: &str) -> Option<f64> {
    if let Some(caps) = RE_SPLIT_CENTS.captures(raw) {
        let value: f64 = format!("{}.{}", &caps[1], &caps[2]).parse().ok()?;
        return Some(value).filter(|p| is_plausible(*p));
    }

    let token = RE_NUMBER.find(raw)?.as_str();
    let compact: String = token
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}' && *c != '\u{202f}')
        .collect();
    let compact = compact.trim_end_matches(['.', ',']);

    let normalized = normalize_separators(compact)?;
    let value: f64 = normalized.parse().ok()?;
    let value = (value * 100.0).round() / 100.0;
    Some(value).filter(|p| is_plausible(*p))
}

fn normalize_separators(s: &str) -> Option<String> {
    let last_comma = s.rfind(',');
    let last_dot = s.rfind('.');

    let normalized = match (last_comma, last_dot) {
        (Some(c), Some(d)) => {
            // The right-most separator is the decimal mark.
            if c > d {
                s.replace('.', "").replace(',', ".")
            } else {
                s.replace(',', "")
            }
        }
        (Some(_), None) | (None, Some(_)) if RE_GROUPED.is_match(s) => s.replace([',', '.'], ""),
        (Some(_), None) => {
            if s.matches(',').count() > 1 {
                return None;
            }
            s.replace(',', ".")
        }
        (None, Some(_)) => {
            if s.matches('.').count() > 1 {
                return None;
            }
            s.to_string()
        }
        (None, None) => s.to_string(),
    };
    Some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn french_layout() {
        assert_eq!(parse_price("1 234,56 €"), Some(1234.56));
        assert_eq!(parse_price("1\u{202f}234,56\u{a0}€"), Some(1234.56));
        assert_eq!(parse_price("19,99€"), Some(19.99));
        assert_eq!(parse_price("1.234,50"), Some(1234.5));
    }

    #[test]
    fn english_layout() {
        assert_eq!(parse_price("$1,234.56"), Some(1234.56));
        assert_eq!(parse_price("19.99"), Some(19.99));
        assert_eq!(parse_price("EUR 5"), Some(5.0));
    }

    #[test]
    fn split_cents() {
        assert_eq!(parse_price("12€99"), Some(12.99));
        assert_eq!(parse_price("Prix : 3€49"), Some(3.49));
        assert_eq!(parse_price("19,99 € 20 articles"), Some(19.99));
    }

    #[test]
    fn thousands_grouping_without_decimals() {
        assert_eq!(parse_price("1.299 €"), Some(1299.0));
        assert_eq!(parse_price("2,499"), Some(2499.0));
    }

    #[test]
    fn out_of_range_and_garbage() {
        assert_eq!(parse_price("0,00 €"), None);
        assert_eq!(parse_price("250 000,00 €"), None);
        assert_eq!(parse_price("gratuit"), None);
        assert_eq!(parse_price(""), None);
    }
}
