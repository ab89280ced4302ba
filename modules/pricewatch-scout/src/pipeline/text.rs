// Visible-text extraction with noise filtering.
//
// The DOM is flattened into text segments. Navigation, footers, scripts,
// consent banners and recommendation carousels are dropped; each surviving
// segment carries flags inherited from its ancestors (struck-through, unit
// price, price-labelled container) so strategies can reject values by context.

use ai_client::truncate_to_char_boundary;
use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};

const NOISE_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "svg", "nav", "header", "footer", "aside",
    "template", "head",
];
const NOISE_ROLES: &[&str] = &["navigation", "banner", "contentinfo", "dialog"];
const NOISE_WORDS: &[&str] = &[
    "cookie", "cookies", "consent", "popup", "modal", "menu", "sidebar", "breadcrumb",
    "newsletter", "recommendations", "recommendation", "similar", "carousel", "related",
    "upsell", "crosssell", "suggestions", "footer", "megamenu",
];
const STRUCK_WORDS: &[&str] = &[
    "old", "was", "strike", "strikethrough", "striked", "barre", "crossed", "ancien",
    "before", "original", "rrp", "msrp",
];
const UNIT_WORDS: &[&str] = &["unit", "per", "kg", "litre", "liter", "ppu", "unitprice"];
const PRICE_WORDS: &[&str] = &["price", "prix", "tarif", "amount", "montant", "cost"];

/// Below this, the filtered text is considered over-stripped.
const MIN_FILTERED_LEN: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentFlags {
    pub struck: bool,
    pub unit_price: bool,
    pub price_hint: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextSegment {
    pub text: String,
    pub flags: SegmentFlags,
}

/// Split class/id values into lowercase words on whitespace, `-` and `_`.
fn words(el: &Element) -> Vec<String> {
    let mut out = Vec::new();
    for attr in ["class", "id", "itemprop", "data-testid"] {
        if let Some(value) = el.attr(attr) {
            out.extend(
                value
                    .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
                    .filter(|w| !w.is_empty())
                    .map(|w| w.to_lowercase()),
            );
        }
    }
    out
}

fn has_any(words: &[String], vocabulary: &[&str]) -> bool {
    words.iter().any(|w| vocabulary.contains(&w.as_str()))
}

/// Document roots carry page-state classes (`didomi-popup-open`, `modal-open`)
/// and are never noise themselves.
pub fn is_noise(el: &Element) -> bool {
    if matches!(el.name(), "html" | "body") {
        return false;
    }
    if NOISE_TAGS.contains(&el.name()) {
        return true;
    }
    if el
        .attr("role")
        .is_some_and(|r| NOISE_ROLES.contains(&r.to_lowercase().as_str()))
    {
        return true;
    }
    if el.attr("aria-hidden") == Some("true") {
        return true;
    }
    has_any(&words(el), NOISE_WORDS)
}

fn flags_for(el: &Element, inherited: SegmentFlags) -> SegmentFlags {
    let w = words(el);
    let style = el.attr("style").unwrap_or_default().to_lowercase();
    SegmentFlags {
        struck: inherited.struck
            || matches!(el.name(), "del" | "s" | "strike")
            || style.contains("line-through")
            || has_any(&w, STRUCK_WORDS),
        unit_price: inherited.unit_price || has_any(&w, UNIT_WORDS),
        price_hint: inherited.price_hint || has_any(&w, PRICE_WORDS),
    }
}

pub fn element_is_struck(el: &Element) -> bool {
    flags_for(el, SegmentFlags::default()).struck
}

fn walk(element: ElementRef<'_>, flags: SegmentFlags, out: &mut Vec<TextSegment>) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let trimmed = collapse_whitespace(text);
                if !trimmed.is_empty() {
                    out.push(TextSegment {
                        text: trimmed,
                        flags,
                    });
                }
            }
            Node::Element(el) => {
                if is_noise(el) {
                    continue;
                }
                if let Some(child_ref) = ElementRef::wrap(child) {
                    walk(child_ref, flags_for(el, flags), out);
                }
            }
            _ => {}
        }
    }
}

/// Noise-filtered text segments in document order.
pub fn segments(document: &Html) -> Vec<TextSegment> {
    let mut out = Vec::new();
    walk(document.root_element(), SegmentFlags::default(), &mut out);
    out
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible page text without navigation and boilerplate, capped at `max_len`
/// bytes. Falls back to the whole body when filtering leaves almost nothing.
pub fn visible_text(document: &Html, max_len: usize) -> String {
    let filtered = segments(document)
        .into_iter()
        .map(|s| s.text)
        .collect::<Vec<_>>()
        .join(" ");

    let text = if filtered.len() < MIN_FILTERED_LEN {
        body_text(document)
    } else {
        filtered
    };
    truncate_to_char_boundary(&text, max_len).to_string()
}

fn body_text(document: &Html) -> String {
    let Ok(body) = Selector::parse("body") else {
        return String::new();
    };
    document
        .select(&body)
        .next()
        .map(|b| collapse_whitespace(&b.text().collect::<Vec<_>>().join(" ")))
        .unwrap_or_default()
}

/// Page title: `<title>`, then `og:title`, then the first `<h1>`.
pub fn page_title(document: &Html) -> Option<String> {
    let pick = |css: &str, attr: Option<&str>| -> Option<String> {
        let selector = Selector::parse(css).ok()?;
        let el = document.select(&selector).next()?;
        let raw = match attr {
            Some(a) => el.value().attr(a)?.to_string(),
            None => el.text().collect::<String>(),
        };
        let clean = collapse_whitespace(&raw);
        (!clean.is_empty()).then_some(clean)
    };

    pick("title", None)
        .or_else(|| pick("meta[property='og:title']", Some("content")))
        .or_else(|| pick("h1", None))
}

// ---------------------------------------------------------------------------
// Relevant-text window for the vision prompt
// ---------------------------------------------------------------------------

const RELEVANT_KEYWORDS: &[&str] = &[
    "prix", "price", "€", "eur", "ttc", "stock", "disponible", "rupture", "panier", "cart",
    "livraison", "promo",
];
const WINDOW: usize = 150;
pub const RELEVANT_TEXT_MAX: usize = 1500;

/// Snippets of `text` around price and stock vocabulary, merged when they
/// overlap and joined with an ellipsis.
pub fn relevant_text(text: &str, max_len: usize) -> String {
    let lower = text.to_ascii_lowercase();
    let mut windows: Vec<(usize, usize)> = Vec::new();

    for keyword in RELEVANT_KEYWORDS {
        for (pos, _) in lower.match_indices(keyword) {
            let start = floor_boundary(text, pos.saturating_sub(WINDOW));
            let end = ceil_boundary(text, (pos + keyword.len() + WINDOW).min(text.len()));
            windows.push((start, end));
        }
    }

    if windows.is_empty() {
        return truncate_to_char_boundary(text, max_len).to_string();
    }

    windows.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in windows {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    let joined = merged
        .iter()
        .map(|&(s, e)| text[s..e].trim())
        .collect::<Vec<_>>()
        .join(" … ");
    truncate_to_char_boundary(&joined, max_len).to_string()
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title> Lot de 24 bougies  blanches </title></head><body>
        <nav>Accueil Promo -50% 9,99 €</nav>
        <div class="cookie-banner">Nous utilisons des cookies</div>
        <main>
          <h1>Lot de 24 bougies blanches</h1>
          <div class="product-price"><span class="price-old">24,99 €</span> <span>19,99 €</span></div>
          <div class="unit-price">0,83 € / pièce</div>
        </main>
        <footer>Livraison offerte dès 49 €</footer>
    </body></html>"#;

    #[test]
    fn noise_is_dropped_and_flags_inherited() {
        let doc = Html::parse_document(PAGE);
        let segs = segments(&doc);
        let texts: Vec<&str> = segs.iter().map(|s| s.text.as_str()).collect();

        assert!(!texts.iter().any(|t| t.contains("Accueil")));
        assert!(!texts.iter().any(|t| t.contains("cookies")));
        assert!(!texts.iter().any(|t| t.contains("Livraison")));
        assert!(texts.contains(&"Lot de 24 bougies blanches"));

        let old = segs.iter().find(|s| s.text == "24,99 €").unwrap();
        assert!(old.flags.struck && old.flags.price_hint);
        let current = segs.iter().find(|s| s.text == "19,99 €").unwrap();
        assert!(!current.flags.struck && current.flags.price_hint);
        let unit = segs.iter().find(|s| s.text.starts_with("0,83")).unwrap();
        assert!(unit.flags.unit_price);
    }

    #[test]
    fn open_consent_popup_does_not_hide_the_page() {
        let doc = Html::parse_document(
            r#"<html class="modal-open"><body class="product-page didomi-popup-open">
                 <div class="didomi-popup">Accepter les cookies</div>
                 <p>Prix : 19,99 €</p>
               </body></html>"#,
        );
        let texts: Vec<String> = segments(&doc).into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["Prix : 19,99 €".to_string()]);
    }

    #[test]
    fn title_is_collapsed() {
        let doc = Html::parse_document(PAGE);
        assert_eq!(page_title(&doc).as_deref(), Some("Lot de 24 bougies blanches"));
    }

    #[test]
    fn short_filtered_text_falls_back_to_body() {
        let doc = Html::parse_document("<body><nav>Menu principal</nav><p>19,99 €</p></body>");
        let text = visible_text(&doc, 5000);
        assert!(text.contains("Menu principal"));
    }

    #[test]
    fn relevant_text_merges_windows() {
        let filler = "x".repeat(400);
        let text = format!("{filler} Prix 12,50 € {filler} En stock {filler}");
        let rel = relevant_text(&text, RELEVANT_TEXT_MAX);
        assert!(rel.contains("Prix 12,50 €"));
        assert!(rel.contains("En stock"));
        assert!(rel.contains(" … "));
        assert!(rel.len() <= RELEVANT_TEXT_MAX);
    }

    #[test]
    fn relevant_text_without_keywords_truncates() {
        let text = "abc ".repeat(1000);
        assert_eq!(relevant_text(&text, 100).len(), 100);
    }
}
