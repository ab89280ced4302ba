use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

// =============================================================================
// Tracked product
// =============================================================================

/// A product page under watch, plus everything the last attempts learned about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedProduct {
    pub id: Uuid,
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub target_price: Option<f64>,
    /// Fixed CSS selector pointing at the price on this page.
    #[serde(default)]
    pub selector: Option<String>,
    /// Per-product cadence; falls back to the global refresh interval.
    #[serde(default)]
    pub check_interval_minutes: Option<u32>,

    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub in_stock: Option<bool>,
    #[serde(default)]
    pub price_confidence: Option<f64>,
    #[serde(default)]
    pub stock_confidence: Option<f64>,
    /// Title seen on the last successful read, used to tell a transient
    /// failure apart from a delisted product.
    #[serde(default)]
    pub reference_title: Option<String>,
    #[serde(default = "default_true")]
    pub is_available: bool,

    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_warning: Option<String>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,

    /// In-flight marker: set while one extraction attempt owns the product.
    #[serde(default)]
    pub is_refreshing: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Manual availability set while an attempt was in flight; applied last.
    #[serde(default)]
    pub availability_override: Option<bool>,

    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl TrackedProduct {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            name: name.into(),
            target_price: None,
            selector: None,
            check_interval_minutes: None,
            current_price: None,
            currency: None,
            in_stock: None,
            price_confidence: None,
            stock_confidence: None,
            reference_title: None,
            is_available: true,
            last_error: None,
            last_warning: None,
            last_checked: None,
            is_refreshing: false,
            is_active: true,
            availability_override: None,
            created_at: Utc::now(),
        }
    }

    /// Lowercased host without a leading `www.`.
    pub fn domain(&self) -> Option<String> {
        let url = Url::parse(&self.url).ok()?;
        let host = url.host_str()?.to_lowercase();
        Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
    }
}

// =============================================================================
// Strategies
// =============================================================================

/// Which extraction strategy produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Structured,
    SelectorOverride,
    Microdata,
    KeywordRegex,
    NearbyFallback,
    /// Stock vocabulary only; no price was read.
    StockVocabulary,
    Vision,
}

impl Strategy {
    pub fn is_heuristic(&self) -> bool {
        matches!(
            self,
            Strategy::SelectorOverride
                | Strategy::Microdata
                | Strategy::KeywordRegex
                | Strategy::NearbyFallback
                | Strategy::StockVocabulary
        )
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::Structured => "structured",
            Strategy::SelectorOverride => "selector_override",
            Strategy::Microdata => "microdata",
            Strategy::KeywordRegex => "keyword_regex",
            Strategy::NearbyFallback => "nearby_fallback",
            Strategy::StockVocabulary => "stock_vocabulary",
            Strategy::Vision => "vision",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Price history
// =============================================================================

/// Append-only record of one accepted price read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub id: Uuid,
    pub product_id: Uuid,
    pub price: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub in_stock: Option<bool>,
    pub price_confidence: f64,
    #[serde(default)]
    pub stock_confidence: Option<f64>,
    pub strategy: Strategy,
    #[serde(default)]
    pub ai_provider: Option<String>,
    #[serde(default)]
    pub ai_model: Option<String>,
    #[serde(default)]
    pub prompt_version: Option<String>,
    #[serde(default)]
    pub repair_used: bool,
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Notifications
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationReason {
    TargetReached { target: f64 },
    PriceDrop { percent: f64 },
    BackInStock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub product_id: Uuid,
    pub product_name: String,
    pub url: String,
    pub old_price: Option<f64>,
    pub new_price: Option<f64>,
    pub reason: NotificationReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_strips_www_and_port() {
        let p = TrackedProduct::new("https://www.Amazon.fr:443/dp/B0TEST?x=1", "x");
        assert_eq!(p.domain().as_deref(), Some("amazon.fr"));
    }

    #[test]
    fn domain_handles_case_and_ip_hosts() {
        let upper = TrackedProduct::new("HTTPS://WWW.Shop.Example/p", "x");
        assert_eq!(upper.domain().as_deref(), Some("shop.example"));
        let ipv6 = TrackedProduct::new("http://[::1]:8080/p/1", "x");
        assert_eq!(ipv6.domain().as_deref(), Some("[::1]"));
        let creds = TrackedProduct::new("https://user:pw@boutique.example:8443/p", "x");
        assert_eq!(creds.domain().as_deref(), Some("boutique.example"));
    }

    #[test]
    fn domain_none_without_scheme() {
        let p = TrackedProduct::new("not a url", "x");
        assert_eq!(p.domain(), None);
    }

    #[test]
    fn old_records_load_with_defaults() {
        let raw = format!(
            r#"{{"id":"{}","url":"https://shop.example/p/1","name":"Bougies","created_at":"2026-01-01T00:00:00Z"}}"#,
            Uuid::new_v4()
        );
        let p: TrackedProduct = serde_json::from_str(&raw).unwrap();
        assert!(p.is_available);
        assert!(p.is_active);
        assert!(!p.is_refreshing);
        assert_eq!(p.current_price, None);
    }

    #[test]
    fn heuristic_strategies() {
        assert!(Strategy::KeywordRegex.is_heuristic());
        assert!(!Strategy::Structured.is_heuristic());
        assert!(!Strategy::Vision.is_heuristic());
        assert_eq!(Strategy::NearbyFallback.to_string(), "nearby_fallback");
    }
}
