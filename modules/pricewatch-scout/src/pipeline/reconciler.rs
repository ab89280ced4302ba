// Availability reconciliation after an attempt.
//
// A numeric price read is proof the product is on sale. Without one, the page
// title decides between "temporarily unreachable" (same product, no change)
// and "replaced or delisted" (different product, mark unavailable). Bot
// challenge pages never count as a title.

use std::collections::HashSet;

use pricewatch_common::TrackedProduct;
use tracing::{debug, info};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.5;

/// Titles served by anti-bot walls, error pages and interstitials.
const PLACEHOLDER_TITLES: &[&str] = &[
    "toutes nos excuses",
    "sorry, something went wrong",
    "enter the characters you see below",
    "saisissez les caractères",
    "service unavailable",
    "robot check",
    "automated access",
    "access denied",
    "just a moment",
    "attention required",
    "captcha",
    "are you a robot",
    "vérification de sécurité",
    "security check",
    "403 forbidden",
    "page not found",
    "please wait",
];

#[derive(Debug, Clone, PartialEq)]
pub enum AvailabilityDecision {
    MarkAvailable,
    Unchanged(KeepReason),
    MarkUnavailable { similarity: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeepReason {
    PlaceholderTitle,
    NoObservedTitle,
    NoReferenceTitle,
    SameProduct { similarity: f64 },
}

impl AvailabilityDecision {
    pub fn apply(&self, product: &mut TrackedProduct) {
        match self {
            AvailabilityDecision::MarkAvailable => product.is_available = true,
            AvailabilityDecision::MarkUnavailable { .. } => product.is_available = false,
            AvailabilityDecision::Unchanged(_) => {}
        }
    }
}

pub fn is_placeholder_title(title: &str) -> bool {
    let lower = title.trim().to_lowercase();
    lower.is_empty() || PLACEHOLDER_TITLES.iter().any(|p| lower.contains(p))
}

fn tokens(s: &str) -> HashSet<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Jaccard overlap of normalized word tokens, in [0, 1].
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let (ta, tb) = (tokens(a), tokens(b));
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let shared = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    shared / union
}

#[derive(Debug, Clone, Copy)]
pub struct AvailabilityReconciler {
    pub similarity_threshold: f64,
}

impl Default for AvailabilityReconciler {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl AvailabilityReconciler {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
        }
    }

    pub fn reconcile(
        &self,
        product: &TrackedProduct,
        observed_title: Option<&str>,
        price_found: bool,
    ) -> AvailabilityDecision {
        if price_found {
            return AvailabilityDecision::MarkAvailable;
        }

        let Some(observed) = observed_title.map(str::trim).filter(|t| !t.is_empty()) else {
            return AvailabilityDecision::Unchanged(KeepReason::NoObservedTitle);
        };
        if is_placeholder_title(observed) {
            debug!(product_id = %product.id, title = observed, "Ignoring placeholder title");
            return AvailabilityDecision::Unchanged(KeepReason::PlaceholderTitle);
        }

        let reference = product
            .reference_title
            .as_deref()
            .filter(|t| !is_placeholder_title(t))
            .or(Some(product.name.as_str()).filter(|n| !n.trim().is_empty()));
        let Some(reference) = reference else {
            return AvailabilityDecision::Unchanged(KeepReason::NoReferenceTitle);
        };

        let similarity = title_similarity(observed, reference);
        if similarity >= self.similarity_threshold {
            AvailabilityDecision::Unchanged(KeepReason::SameProduct { similarity })
        } else {
            info!(
                product_id = %product.id,
                observed,
                reference,
                similarity,
                "Title no longer matches, marking unavailable"
            );
            AvailabilityDecision::MarkUnavailable { similarity }
        }
    }
}
