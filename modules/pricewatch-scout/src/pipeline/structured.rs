// Structured product data: schema.org JSON-LD and Open Graph product tags.
//
// Anything malformed is treated as absent. A candidate is only produced when
// a numeric, plausible price is present.

use pricewatch_common::Strategy;
use scraper::{Html, Selector};
use serde_json::Value;

use super::candidate::Candidate;
use super::price::{is_plausible, parse_price};

pub const STRUCTURED_CONFIDENCE: f64 = 1.0;

#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredExtractor;

impl StructuredExtractor {
    pub fn parse(&self, html: &str) -> Option<Candidate> {
        let document = Html::parse_document(html);
        self.parse_document(&document)
    }

    pub fn parse_document(&self, document: &Html) -> Option<Candidate> {
        from_jsonld(document).or_else(|| from_meta(document))
    }
}

// ---------------------------------------------------------------------------
// JSON-LD
// ---------------------------------------------------------------------------

fn from_jsonld(document: &Html) -> Option<Candidate> {
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;

    for element in document.select(&selector) {
        let raw = element.inner_html();
        let Ok(value) = serde_json::from_str::<Value>(raw.trim()) else {
            continue;
        };
        let mut products = Vec::new();
        collect_products(&value, &mut products);
        if let Some(candidate) = products.into_iter().find_map(product_candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_type(value: &Value, wanted: &[&str]) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => wanted.contains(&t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| wanted.contains(&t)),
        _ => false,
    }
}

fn collect_products<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_products(v, out)),
        Value::Object(_) => {
            if let Some(graph) = value.get("@graph") {
                collect_products(graph, out);
            }
            if is_type(value, &["Product", "ProductGroup", "IndividualProduct"]) {
                out.push(value);
            }
            if let Some(variants) = value.get("hasVariant") {
                collect_products(variants, out);
            }
        }
        _ => {}
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|p| is_plausible(*p)),
        Value::String(s) => parse_price(s),
        _ => None,
    }
}

fn offer_price(offer: &Value) -> Option<f64> {
    offer
        .get("price")
        .and_then(number)
        .or_else(|| offer.get("lowPrice").and_then(number))
        .or_else(|| {
            let spec = offer.get("priceSpecification")?;
            let spec = spec.as_array().and_then(|a| a.first()).unwrap_or(spec);
            spec.get("price").and_then(number)
        })
}

pub fn availability_from_schema(raw: &str) -> Option<bool> {
    let tail = raw.rsplit('/').next().unwrap_or(raw).trim().to_lowercase();
    match tail.as_str() {
        "instock" | "instoreonly" | "onlineonly" | "limitedavailability" | "preorder"
        | "presale" | "in stock" => Some(true),
        "outofstock" | "soldout" | "discontinued" | "out of stock" | "oos" => Some(false),
        _ => None,
    }
}

fn product_candidate(product: &Value) -> Option<Candidate> {
    let offers = product.get("offers")?;
    let offer_list: Vec<&Value> = match offers {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let (offer, price) = offer_list
        .iter()
        .find_map(|o| offer_price(o).map(|p| (*o, p)))?;

    let currency = offer
        .get("priceCurrency")
        .and_then(Value::as_str)
        .map(str::to_string);
    let in_stock = offer
        .get("availability")
        .and_then(Value::as_str)
        .and_then(availability_from_schema);

    let mut candidate = Candidate::priced(price, STRUCTURED_CONFIDENCE, Strategy::Structured)
        .with_stock(in_stock, STRUCTURED_CONFIDENCE);
    if currency.is_some() {
        candidate.currency = currency;
    }
    Some(candidate)
}

// ---------------------------------------------------------------------------
// Open Graph product meta
// ---------------------------------------------------------------------------

fn meta_content(document: &Html, properties: &[&str]) -> Option<String> {
    properties.iter().find_map(|property| {
        let selector = Selector::parse(&format!(r#"meta[property="{property}"]"#)).ok()?;
        document
            .select(&selector)
            .find_map(|el| el.value().attr("content"))
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
    })
}

fn from_meta(document: &Html) -> Option<Candidate> {
    let price = meta_content(document, &["product:price:amount", "og:price:amount"])
        .and_then(|raw| parse_price(&raw))?;
    let currency = meta_content(document, &["product:price:currency", "og:price:currency"]);
    let in_stock = meta_content(document, &["product:availability", "og:availability"])
        .and_then(|raw| availability_from_schema(&raw));

    let mut candidate = Candidate::priced(price, STRUCTURED_CONFIDENCE, Strategy::Structured)
        .with_stock(in_stock, STRUCTURED_CONFIDENCE);
    if currency.is_some() {
        candidate.currency = currency;
    }
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(head: &str) -> String {
        format!("<html><head>{head}</head><body><h1>Produit</h1></body></html>")
    }

    #[test]
    fn jsonld_product_with_offer() {
        let html = page(
            r#"<script type="application/ld+json">
            {"@context":"https://schema.org","@type":"Product","name":"Bougies",
             "offers":{"@type":"Offer","price":"19.99","priceCurrency":"EUR",
                       "availability":"https://schema.org/InStock"}}
            </script>"#,
        );
        let c = StructuredExtractor.parse(&html).unwrap();
        assert_eq!(c.price, Some(19.99));
        assert_eq!(c.price_confidence, 1.0);
        assert_eq!(c.in_stock, Some(true));
        assert_eq!(c.currency.as_deref(), Some("EUR"));
        assert_eq!(c.strategy, Strategy::Structured);
    }

    #[test]
    fn graph_and_aggregate_offer() {
        let html = page(
            r#"<script type="application/ld+json">
            {"@graph":[{"@type":"WebPage"},
              {"@type":["Product","Thing"],"offers":[{"@type":"AggregateOffer","lowPrice":12.5,
               "availability":"http://schema.org/OutOfStock"}]}]}
            </script>"#,
        );
        let c = StructuredExtractor.parse(&html).unwrap();
        assert_eq!(c.price, Some(12.5));
        assert_eq!(c.in_stock, Some(false));
    }

    #[test]
    fn french_price_string() {
        let html = page(
            r#"<script type="application/ld+json">
            [{"@type":"Product","offers":{"price":"1 299,00"}}]
            </script>"#,
        );
        assert_eq!(StructuredExtractor.parse(&html).unwrap().price, Some(1299.0));
    }

    #[test]
    fn malformed_jsonld_is_absence() {
        let html = page(
            r#"<script type="application/ld+json">{"@type":"Product", "offers": {"price": </script>
               <script type="application/ld+json">{"@type":"Organization","name":"Shop"}</script>"#,
        );
        assert!(StructuredExtractor.parse(&html).is_none());
    }

    #[test]
    fn product_without_price_is_absence() {
        let html = page(
            r#"<script type="application/ld+json">{"@type":"Product","offers":{"price":"0"}}</script>"#,
        );
        assert!(StructuredExtractor.parse(&html).is_none());
    }

    #[test]
    fn open_graph_price_tags() {
        let html = page(
            r#"<meta property="product:price:amount" content="34,90">
               <meta property="product:price:currency" content="EUR">
               <meta property="product:availability" content="instock">"#,
        );
        let c = StructuredExtractor.parse(&html).unwrap();
        assert_eq!(c.price, Some(34.9));
        assert_eq!(c.in_stock, Some(true));
    }
}
