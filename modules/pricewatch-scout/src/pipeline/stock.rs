// Stock status from page vocabulary, independent of the price ladder.

use scraper::{Html, Selector};

use super::text::collapse_whitespace;

pub const VOCABULARY_CONFIDENCE: f64 = 0.7;
pub const CART_AFFORDANCE_CONFIDENCE: f64 = 0.5;

/// Checked first: "plus en stock" must not read as "en stock".
pub const OUT_OF_STOCK_PHRASES: &[&str] = &[
    "rupture de stock",
    "en rupture",
    "plus en stock",
    "épuisé",
    "epuise",
    "indisponible",
    "actuellement indisponible",
    "out of stock",
    "sold out",
    "currently unavailable",
    "temporarily unavailable",
    "no longer available",
    "plus disponible",
];

pub const IN_STOCK_PHRASES: &[&str] = &[
    "en stock",
    "in stock",
    "disponible immédiatement",
    "disponible en ligne",
    "expédié sous",
    "livré demain",
    "available now",
    "ships today",
];

pub const ADD_TO_CART_PHRASES: &[&str] = &[
    "ajouter au panier",
    "add to cart",
    "add to basket",
    "acheter maintenant",
    "buy now",
];

/// `(in_stock, confidence)` or `None` when the page says nothing usable.
pub fn detect_stock(visible_text: &str, document: &Html) -> Option<(bool, f64)> {
    let lower = visible_text.to_lowercase();

    if OUT_OF_STOCK_PHRASES.iter().any(|p| lower.contains(p)) {
        return Some((false, VOCABULARY_CONFIDENCE));
    }
    if IN_STOCK_PHRASES.iter().any(|p| lower.contains(p)) {
        return Some((true, VOCABULARY_CONFIDENCE));
    }
    if has_enabled_cart_button(document) {
        return Some((true, CART_AFFORDANCE_CONFIDENCE));
    }
    None
}

fn has_enabled_cart_button(document: &Html) -> bool {
    let Ok(selector) = Selector::parse("button, input[type='submit'], a[role='button']") else {
        return false;
    };

    document.select(&selector).any(|el| {
        let v = el.value();
        if v.attr("disabled").is_some() || v.attr("aria-disabled") == Some("true") {
            return false;
        }
        let label = collapse_whitespace(
            &v.attr("value")
                .map(str::to_string)
                .unwrap_or_else(|| el.text().collect::<String>()),
        )
        .to_lowercase();
        ADD_TO_CART_PHRASES.iter().any(|p| label.contains(p))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(body: &str) -> Html {
        Html::parse_document(&format!("<html><body>{body}</body></html>"))
    }

    #[test]
    fn out_of_stock_wins_over_in_stock_substring() {
        let d = doc("");
        assert_eq!(detect_stock("Article plus en stock", &d), Some((false, 0.7)));
        assert_eq!(detect_stock("Rupture de stock", &d), Some((false, 0.7)));
    }

    #[test]
    fn in_stock_vocabulary() {
        assert_eq!(detect_stock("En stock, expédié sous 24h", &doc("")), Some((true, 0.7)));
    }

    #[test]
    fn cart_button_is_weaker_evidence() {
        let d = doc("<button class='btn'>Ajouter au panier</button>");
        assert_eq!(detect_stock("19,99 €", &d), Some((true, 0.5)));
    }

    #[test]
    fn disabled_cart_button_is_ignored() {
        let d = doc("<button disabled>Ajouter au panier</button>");
        assert_eq!(detect_stock("19,99 €", &d), None);
    }
}
