// Heuristic price extraction: an ordered ladder of strategy objects over the
// rendered HTML. The first strategy to produce a price wins; confidence falls
// monotonically down the ladder.
//
//   1. selector override   (fixed selector configured on the product)
//   2. microdata           (itemprop=price, data-price attributes)
//   3. keyword regex       (currency-adjacent amounts in price-labelled text)
//   4. nearby fallback     (lowest amount near stock / add-to-cart wording)
//
// Stock status is derived separately, see `stock.rs`.

use std::sync::LazyLock;

use pricewatch_common::Strategy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::candidate::{Candidate, PageContext};
use super::price::{is_plausible, parse_price};
use super::stock::{detect_stock, ADD_TO_CART_PHRASES, IN_STOCK_PHRASES, OUT_OF_STOCK_PHRASES};
use super::text::{self, element_is_struck, is_noise, TextSegment};

pub const SELECTOR_OVERRIDE_CONFIDENCE: f64 = 0.9;
pub const MICRODATA_CONFIDENCE: f64 = 0.8;
pub const KEYWORD_REGEX_CONFIDENCE: f64 = 0.6;
pub const NEARBY_FALLBACK_CONFIDENCE: f64 = 0.3;

/// Segments on either side of a stock keyword searched by the fallback.
const NEARBY_SEGMENTS: usize = 6;

// =============================================================================
// Page view shared by strategies
// =============================================================================

pub struct PageView<'a> {
    pub context: PageContext<'a>,
    pub document: &'a Html,
    pub segments: &'a [TextSegment],
}

pub trait PriceStrategy: Send + Sync {
    fn strategy(&self) -> Strategy;
    fn confidence(&self) -> f64;
    fn find_price(&self, page: &PageView<'_>) -> Option<f64>;

    fn attempt(&self, page: &PageView<'_>) -> Option<Candidate> {
        self.find_price(page)
            .map(|price| Candidate::priced(price, self.confidence(), self.strategy()))
    }
}

/// True when the element or one of its close ancestors is struck-through or
/// sits in a boilerplate region.
fn rejected_by_context(el: ElementRef<'_>) -> bool {
    let mut current = Some(el);
    let mut depth = 0;
    while let Some(node) = current {
        if depth <= 4 && element_is_struck(node.value()) {
            return true;
        }
        if is_noise(node.value()) {
            return true;
        }
        current = node.parent().and_then(ElementRef::wrap);
        depth += 1;
    }
    false
}

fn element_price(el: ElementRef<'_>, attr: Option<&str>) -> Option<f64> {
    let raw = match attr.and_then(|a| el.value().attr(a)) {
        Some(value) => value.to_string(),
        None => el.text().collect::<Vec<_>>().join(" "),
    };
    parse_price(&raw)
}

// =============================================================================
// 1. Selector override
// =============================================================================

pub struct SelectorOverride;

impl PriceStrategy for SelectorOverride {
    fn strategy(&self) -> Strategy {
        Strategy::SelectorOverride
    }

    fn confidence(&self) -> f64 {
        SELECTOR_OVERRIDE_CONFIDENCE
    }

    fn find_price(&self, page: &PageView<'_>) -> Option<f64> {
        let css = page.context.selector?;
        let selector = match Selector::parse(css) {
            Ok(s) => s,
            Err(e) => {
                debug!(selector = css, error = ?e, "Invalid price selector override");
                return None;
            }
        };

        page.document
            .select(&selector)
            .filter(|el| !element_is_struck(el.value()))
            .find_map(|el| element_price(el, Some("content")))
    }
}

// =============================================================================
// 2. Microdata / data attributes
// =============================================================================

const MICRODATA_FIELDS: &[(&str, Option<&str>)] = &[
    ("[itemprop='price']", Some("content")),
    ("[data-price-amount]", Some("data-price-amount")),
    ("[data-price]", Some("data-price")),
    ("[data-product-price]", Some("data-product-price")),
];

pub struct Microdata;

impl PriceStrategy for Microdata {
    fn strategy(&self) -> Strategy {
        Strategy::Microdata
    }

    fn confidence(&self) -> f64 {
        MICRODATA_CONFIDENCE
    }

    fn find_price(&self, page: &PageView<'_>) -> Option<f64> {
        MICRODATA_FIELDS.iter().find_map(|(css, attr)| {
            let selector = Selector::parse(css).ok()?;
            page.document
                .select(&selector)
                .filter(|el| !rejected_by_context(*el))
                .find_map(|el| element_price(el, *attr))
        })
    }
}

// =============================================================================
// Currency-adjacent amounts
// =============================================================================

const AMOUNT: &str = r"(\d{1,3}(?:[ \x{a0}\x{202f}.]\d{3})+(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?)";

static RE_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,5})€(\d{2})").expect("valid regex"));
static RE_AMOUNT_EURO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i){AMOUNT}\s*(?:€|eur\b|euros?\b)")).expect("valid regex")
});
static RE_EURO_AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)(?:€|eur)\s*{AMOUNT}")).expect("valid regex"));
static RE_UNIT_AFTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:/|par\b|le\b|la\b|l'|per\b|the\b)\s*(?:\d+\s*)?(?:kg|g|mg|l|cl|ml|litre|liter|lb|m|m2|m²|unité|unite|u|pièce|piece|pce|dose|lavage)\b",
    )
    .expect("valid regex")
});
static RE_HT_AFTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:ht\b|hors\s+tax)").expect("valid regex"));
static RE_TTC_AFTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*ttc\b").expect("valid regex"));

const UNIT_PREFIXES: &[&str] = &["prix au", "price per", "soit ", "prix/"];
const PRICE_KEYWORDS: &[&str] = &["prix", "price", "tarif", "notre prix", "maintenant"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceMatch {
    pub value: f64,
    /// Explicitly marked tax-inclusive.
    pub ttc: bool,
}

/// Currency-adjacent amounts in `text`, minus unit prices and tax-exclusive
/// amounts.
pub fn price_matches(text: &str) -> Vec<PriceMatch> {
    let mut spans: Vec<(usize, usize, Option<f64>)> = Vec::new();

    for caps in RE_SPLIT.captures_iter(text) {
        let (Some(whole), Some(euros), Some(cents)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let value = format!("{}.{}", euros.as_str(), cents.as_str()).parse().ok();
        spans.push((whole.start(), whole.end(), value));
    }
    for re in [&*RE_AMOUNT_EURO, &*RE_EURO_AMOUNT] {
        for caps in re.captures_iter(text) {
            let (Some(whole), Some(amount)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let overlaps = spans.iter().any(|(s, e, _)| whole.start() < *e && *s < whole.end());
            if !overlaps {
                spans.push((whole.start(), whole.end(), parse_price(amount.as_str())));
            }
        }
    }
    spans.sort_by_key(|(start, _, _)| *start);

    spans
        .into_iter()
        .filter_map(|(start, end, value)| {
            let value = value.filter(|v| is_plausible(*v))?;
            let after = &text[end..];
            let before = text[..start].to_lowercase();
            let before_tail = before
                .char_indices()
                .rev()
                .nth(19)
                .map(|(i, _)| &before[i..])
                .unwrap_or(&before);

            if RE_UNIT_AFTER.is_match(after) || RE_HT_AFTER.is_match(after) {
                return None;
            }
            if UNIT_PREFIXES.iter().any(|p| before_tail.contains(p)) {
                return None;
            }
            Some(PriceMatch {
                value,
                ttc: RE_TTC_AFTER.is_match(after),
            })
        })
        .collect()
}

fn has_price_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    PRICE_KEYWORDS.iter().any(|k| lower.contains(k))
}

// =============================================================================
// 3. Keyword-anchored regex
// =============================================================================

pub struct KeywordRegex;

impl PriceStrategy for KeywordRegex {
    fn strategy(&self) -> Strategy {
        Strategy::KeywordRegex
    }

    fn confidence(&self) -> f64 {
        KEYWORD_REGEX_CONFIDENCE
    }

    fn find_price(&self, page: &PageView<'_>) -> Option<f64> {
        let segments = page.segments;
        let mut anchored = Vec::new();

        for (i, segment) in segments.iter().enumerate() {
            if segment.flags.struck || segment.flags.unit_price {
                continue;
            }
            let labelled_before = i
                .checked_sub(1)
                .map(|p| &segments[p])
                .is_some_and(|prev| prev.text.len() < 40 && has_price_keyword(&prev.text));
            if !(segment.flags.price_hint || has_price_keyword(&segment.text) || labelled_before) {
                continue;
            }
            anchored.extend(price_matches(&segment.text));
        }

        anchored
            .iter()
            .find(|m| m.ttc)
            .or_else(|| anchored.first())
            .map(|m| m.value)
    }
}

// =============================================================================
// 4. Nearby fallback
// =============================================================================

pub struct NearbyFallback;

fn mentions_stock(text: &str) -> bool {
    let lower = text.to_lowercase();
    IN_STOCK_PHRASES
        .iter()
        .chain(OUT_OF_STOCK_PHRASES)
        .chain(ADD_TO_CART_PHRASES)
        .any(|p| lower.contains(p))
}

impl PriceStrategy for NearbyFallback {
    fn strategy(&self) -> Strategy {
        Strategy::NearbyFallback
    }

    fn confidence(&self) -> f64 {
        NEARBY_FALLBACK_CONFIDENCE
    }

    fn find_price(&self, page: &PageView<'_>) -> Option<f64> {
        let segments = page.segments;
        let anchors: Vec<usize> = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| mentions_stock(&s.text))
            .map(|(i, _)| i)
            .collect();

        anchors
            .iter()
            .flat_map(|&a| {
                let lo = a.saturating_sub(NEARBY_SEGMENTS);
                let hi = (a + NEARBY_SEGMENTS + 1).min(segments.len());
                segments[lo..hi].iter()
            })
            .filter(|s| !s.flags.struck && !s.flags.unit_price)
            .flat_map(|s| price_matches(&s.text))
            .map(|m| m.value)
            .min_by(|a, b| a.total_cmp(b))
    }
}

// =============================================================================
// Extractor
// =============================================================================

pub struct HeuristicExtractor {
    ladder: Vec<Box<dyn PriceStrategy>>,
}

impl Default for HeuristicExtractor {
    fn default() -> Self {
        Self {
            ladder: vec![
                Box::new(SelectorOverride),
                Box::new(Microdata),
                Box::new(KeywordRegex),
                Box::new(NearbyFallback),
            ],
        }
    }
}

impl HeuristicExtractor {
    pub fn strategies(&self) -> &[Box<dyn PriceStrategy>] {
        &self.ladder
    }

    pub fn parse(&self, context: PageContext<'_>) -> Option<Candidate> {
        let document = Html::parse_document(context.html);
        self.parse_document(&document, context)
    }

    pub fn parse_document(&self, document: &Html, context: PageContext<'_>) -> Option<Candidate> {
        let segments = text::segments(document);
        let view = PageView {
            context,
            document,
            segments: &segments,
        };

        let price = self.ladder.iter().find_map(|s| s.attempt(&view));
        let visible = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let stock = detect_stock(&visible, document);

        if let Some(ref c) = price {
            debug!(
                domain = context.domain,
                strategy = %c.strategy,
                price = ?c.price,
                confidence = c.price_confidence,
                "Heuristic price"
            );
        }

        match (price, stock) {
            (Some(candidate), Some((in_stock, conf))) => {
                Some(candidate.with_stock(Some(in_stock), conf))
            }
            (Some(candidate), None) => Some(candidate),
            (None, Some((in_stock, conf))) => {
                Some(Candidate::stock_only(in_stock, conf, Strategy::StockVocabulary))
            }
            (None, None) => None,
        }
    }
}
