// Extraction coordinator: one attempt for one product.
//
//   Idle → Rendering → StructuredCheck → HeuristicCheck → VisionCheck
//        → Reconciling → Done | Failed
//
// The in-flight flag is claimed before rendering and always released, on
// both paths. A failed attempt only writes `last_error`; price, stock,
// confidence and availability keep their last known-good values.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pricewatch_common::{
    ExtractionSettings, NotificationEvent, PriceHistoryEntry, PriceWatchError, Strategy,
    TrackedProduct,
};
use scraper::Html;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use browserless_client::{BrowserlessError, RenderOptions, RenderedPage};

use super::arbitration::{arbitrate, needs_vision, VisionStage};
use super::candidate::{Candidate, PageContext};
use super::canonical::simplify_url;
use super::heuristic::HeuristicExtractor;
use super::reconciler::{is_placeholder_title, AvailabilityDecision, AvailabilityReconciler};
use super::structured::StructuredExtractor;
use super::text::{page_title, visible_text};
use super::vision::{VisionOutcome, PROMPT_VERSION};
use crate::deps::ScoutDeps;
use crate::notify::price_events;
use crate::traits::RefreshClaim;

/// Accepted changes larger than this, in percent, need high confidence.
pub const LARGE_CHANGE_PERCENT: f64 = 20.0;
pub const LOW_CONFIDENCE: f64 = 0.7;

/// Slack on top of the scraper timeout before the coordinator gives up on
/// the renderer itself.
const RENDER_GRACE: Duration = Duration::from_secs(5);

// =============================================================================
// States, errors, results
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
    Idle,
    Rendering,
    StructuredCheck,
    HeuristicCheck,
    VisionCheck,
    Reconciling,
    Done,
    Failed,
}

impl fmt::Display for ExtractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractionState::Idle => "idle",
            ExtractionState::Rendering => "rendering",
            ExtractionState::StructuredCheck => "structured_check",
            ExtractionState::HeuristicCheck => "heuristic_check",
            ExtractionState::VisionCheck => "vision_check",
            ExtractionState::Reconciling => "reconciling",
            ExtractionState::Done => "done",
            ExtractionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Product {0} is already refreshing")]
    AlreadyRefreshing(Uuid),

    #[error("Product {0} not found")]
    NotFound(Uuid),

    #[error("Render failed: {0}")]
    Render(#[from] BrowserlessError),

    #[error("No price or stock information found on the page")]
    Extraction,

    #[error("Store error: {0:#}")]
    Store(anyhow::Error),

    #[error(transparent)]
    Config(#[from] PriceWatchError),

    #[error("Attempt aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub product_id: Uuid,
    pub final_url: String,
    pub title: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub in_stock: Option<bool>,
    pub price_confidence: f64,
    pub stock_confidence: f64,
    pub strategy: Strategy,
    pub vision_used: bool,
    pub availability: AvailabilityDecision,
    pub warning: Option<String>,
    pub notifications: Vec<NotificationEvent>,
    /// States visited, in order.
    pub states: Vec<ExtractionState>,
}

struct StateLog {
    product_id: Uuid,
    states: Vec<ExtractionState>,
}

impl StateLog {
    fn new(product_id: Uuid) -> Self {
        Self {
            product_id,
            states: vec![ExtractionState::Idle],
        }
    }

    fn enter(&mut self, next: ExtractionState) {
        let from = self.states.last().copied().unwrap_or(ExtractionState::Idle);
        debug!(product_id = %self.product_id, from = %from, to = %next, "Extraction state");
        self.states.push(next);
    }
}

/// Everything learned from the page before anything is written.
struct Observation {
    page: RenderedPage,
    title: Option<String>,
    chosen: Candidate,
    warning: Option<String>,
    vision: Option<VisionOutcome>,
}

// =============================================================================
// Coordinator
// =============================================================================

pub struct ExtractionCoordinator {
    deps: ScoutDeps,
    structured: StructuredExtractor,
    heuristic: HeuristicExtractor,
}

impl ExtractionCoordinator {
    pub fn new(deps: ScoutDeps) -> Self {
        Self {
            deps,
            structured: StructuredExtractor,
            heuristic: HeuristicExtractor::default(),
        }
    }

    /// Claim the product and run one attempt.
    pub async fn extract(
        &self,
        product_id: Uuid,
        settings: &ExtractionSettings,
    ) -> Result<ExtractionResult, ExtractError> {
        let product = self.claim(product_id).await?;
        self.run_claimed(product, settings).await
    }

    /// Set the in-flight flag, rejecting rather than queueing a second request.
    pub async fn claim(&self, product_id: Uuid) -> Result<TrackedProduct, ExtractError> {
        match self
            .deps
            .store
            .try_claim_refresh(product_id)
            .await
            .map_err(ExtractError::Store)?
        {
            RefreshClaim::Claimed(product) => Ok(product),
            RefreshClaim::AlreadyRefreshing => {
                debug!(product_id = %product_id, "Already refreshing, rejected");
                Err(ExtractError::AlreadyRefreshing(product_id))
            }
            RefreshClaim::NotFound => Err(ExtractError::NotFound(product_id)),
        }
    }

    /// Run a claimed attempt on its own task. A panic inside the attempt is
    /// recorded as a failure and the flag is released.
    pub async fn run_isolated(
        self: Arc<Self>,
        product: TrackedProduct,
        settings: ExtractionSettings,
    ) -> Result<ExtractionResult, ExtractError> {
        let product_id = product.id;
        let worker = Arc::clone(&self);
        match tokio::spawn(async move { worker.run_claimed(product, &settings).await }).await {
            Ok(result) => result,
            Err(join_error) => {
                let e = ExtractError::Aborted(join_error.to_string());
                error!(product_id = %product_id, error = %e, "Extraction task aborted");
                self.record_failure(product_id, &e).await;
                Err(e)
            }
        }
    }

    /// Run an attempt for a product whose flag this caller already holds.
    pub async fn run_claimed(
        &self,
        product: TrackedProduct,
        settings: &ExtractionSettings,
    ) -> Result<ExtractionResult, ExtractError> {
        let mut log = StateLog::new(product.id);
        info!(product_id = %product.id, url = product.url.as_str(), "Checking product");

        let outcome = match self.observe(&product, settings, &mut log).await {
            Ok(observation) => {
                log.enter(ExtractionState::Reconciling);
                self.reconcile(&product, observation, settings, &mut log).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(e) => {
                log.enter(ExtractionState::Failed);
                warn!(product_id = %product.id, error = %e, "Extraction failed");
                self.record_failure(product.id, &e).await;
                Err(e)
            }
        }
    }

    async fn observe(
        &self,
        product: &TrackedProduct,
        settings: &ExtractionSettings,
        log: &mut StateLog,
    ) -> Result<Observation, ExtractError> {
        log.enter(ExtractionState::Rendering);
        let url = simplify_url(&product.url);
        let options = RenderOptions {
            timeout_ms: settings.scraper_timeout_ms,
            smart_scroll_enabled: settings.smart_scroll_enabled,
            smart_scroll_pixels: settings.smart_scroll_pixels,
            dismiss_popups: settings.dismiss_popups,
        };
        let limit = Duration::from_millis(settings.scraper_timeout_ms) + RENDER_GRACE;
        let page = tokio::time::timeout(limit, self.deps.renderer.render(&url, &options))
            .await
            .map_err(|_| BrowserlessError::Timeout(settings.scraper_timeout_ms))??;

        // The parsed document is not Send; it must be gone before the next await.
        let domain = product.domain().unwrap_or_default();
        let (title, structured, heuristic, text_context) = {
            let document = Html::parse_document(&page.html);
            let title = Some(page.title.trim().to_string())
                .filter(|t| !t.is_empty())
                .or_else(|| page_title(&document));

            log.enter(ExtractionState::StructuredCheck);
            let structured = self.structured.parse_document(&document);

            let heuristic = if structured.is_none() {
                log.enter(ExtractionState::HeuristicCheck);
                let context = PageContext {
                    html: &page.html,
                    domain: &domain,
                    selector: product.selector.as_deref(),
                };
                self.heuristic.parse_document(&document, context)
            } else {
                None
            };

            let text_context = settings
                .text_context_enabled
                .then(|| visible_text(&document, settings.text_context_length));
            (title, structured, heuristic, text_context)
        };

        let mut vision = None;
        let stage = match settings.vision.as_ref() {
            Some(config) if needs_vision(structured.as_ref(), heuristic.as_ref(), settings) => {
                log.enter(ExtractionState::VisionCheck);
                if page.screenshot.is_empty() {
                    VisionStage::Unavailable("no screenshot captured".to_string())
                } else {
                    match self
                        .deps
                        .vision
                        .analyze(&page.screenshot, text_context.as_deref(), config)
                        .await
                    {
                        Ok(outcome) => {
                            let candidate = outcome.candidate();
                            vision = Some(outcome);
                            VisionStage::Ran(candidate)
                        }
                        Err(e) => {
                            warn!(
                                product_id = %product.id,
                                error = %e,
                                "Vision unavailable, falling back"
                            );
                            VisionStage::Unavailable(e.to_string())
                        }
                    }
                }
            }
            _ => VisionStage::Skipped,
        };

        let arbitration = arbitrate(structured, heuristic, stage);
        let chosen = arbitration.chosen.ok_or(ExtractError::Extraction)?;
        debug!(
            product_id = %product.id,
            strategy = %chosen.strategy,
            price = ?chosen.price,
            confidence = chosen.price_confidence,
            "Candidate chosen"
        );

        Ok(Observation {
            page,
            title,
            chosen,
            warning: arbitration.warning,
            vision,
        })
    }

    async fn reconcile(
        &self,
        before: &TrackedProduct,
        observation: Observation,
        settings: &ExtractionSettings,
        log: &mut StateLog,
    ) -> Result<ExtractionResult, ExtractError> {
        let Observation {
            page,
            title,
            chosen,
            warning,
            vision,
        } = observation;
        let price_found = chosen.has_price();

        let decision = AvailabilityReconciler::new(settings.title_similarity_threshold).reconcile(
            before,
            title.as_deref(),
            price_found,
        );

        let warning = warning.or_else(|| large_change_warning(before.current_price, &chosen));
        let stock_accepted = chosen.in_stock.is_some()
            && chosen.stock_confidence >= settings.stock_confidence_threshold;

        let update = {
            let chosen = chosen.clone();
            let decision = decision.clone();
            let warning = warning.clone();
            let title = title.clone().filter(|t| !is_placeholder_title(t));
            Box::new(move |p: &mut TrackedProduct| {
                if let Some(price) = chosen.price {
                    p.current_price = Some(price);
                    p.currency = chosen.currency.clone().or(p.currency.take());
                    p.price_confidence = Some(chosen.price_confidence);
                    if title.is_some() {
                        p.reference_title = title;
                    }
                }
                if stock_accepted {
                    p.in_stock = chosen.in_stock;
                    p.stock_confidence = Some(chosen.stock_confidence);
                }
                decision.apply(p);
                if let Some(manual) = p.availability_override.take() {
                    p.is_available = manual;
                }
                p.last_error = None;
                p.last_warning = warning;
                p.last_checked = Some(Utc::now());
                p.is_refreshing = false;
            })
        };

        let saved = self
            .deps
            .store
            .update_product(before.id, update)
            .await
            .map_err(ExtractError::Store)?
            .ok_or(ExtractError::NotFound(before.id))?;

        if let Some(price) = chosen.price {
            let from_vision = chosen.strategy == Strategy::Vision;
            let entry = PriceHistoryEntry {
                id: Uuid::new_v4(),
                product_id: before.id,
                price,
                currency: chosen.currency.clone(),
                in_stock: saved.in_stock,
                price_confidence: chosen.price_confidence,
                stock_confidence: stock_accepted.then_some(chosen.stock_confidence),
                strategy: chosen.strategy,
                ai_provider: vision.as_ref().filter(|_| from_vision).map(|v| v.provider.clone()),
                ai_model: vision.as_ref().filter(|_| from_vision).map(|v| v.model.clone()),
                prompt_version: from_vision.then(|| PROMPT_VERSION.to_string()),
                repair_used: from_vision && vision.as_ref().is_some_and(|v| v.repair_used),
                recorded_at: Utc::now(),
            };
            if let Err(e) = self.deps.store.append_history(&entry).await {
                error!(product_id = %before.id, error = %e, "Failed to append price history");
            }
        }

        let new_stock = stock_accepted.then_some(chosen.in_stock).flatten();
        let notifications = price_events(before, chosen.price, new_stock);
        for event in &notifications {
            if let Err(e) = self.deps.notifier.notify(event).await {
                warn!(product_id = %before.id, error = %e, "Notification failed");
            }
        }

        log.enter(ExtractionState::Done);
        info!(
            product_id = %before.id,
            price = ?chosen.price,
            in_stock = ?saved.in_stock,
            strategy = %chosen.strategy,
            available = saved.is_available,
            "Product checked"
        );

        Ok(ExtractionResult {
            product_id: before.id,
            final_url: page.final_url,
            title,
            price: chosen.price,
            currency: chosen.currency,
            in_stock: chosen.in_stock,
            price_confidence: chosen.price_confidence,
            stock_confidence: chosen.stock_confidence,
            strategy: chosen.strategy,
            vision_used: vision.is_some(),
            availability: decision,
            warning,
            notifications,
            states: std::mem::take(&mut log.states),
        })
    }

    /// Failed path: record the error and release the flag, nothing else.
    async fn record_failure(&self, product_id: Uuid, e: &ExtractError) {
        let message = e.to_string();
        let update = Box::new(move |p: &mut TrackedProduct| {
            p.last_error = Some(message);
            p.is_refreshing = false;
            if let Some(manual) = p.availability_override.take() {
                p.is_available = manual;
            }
        });
        if let Err(store_err) = self.deps.store.update_product(product_id, update).await {
            error!(product_id = %product_id, error = %store_err, "Failed to release refresh flag");
        }
    }
}

/// "Uncertain: …" when a large move is accepted on weak evidence.
fn large_change_warning(old_price: Option<f64>, chosen: &Candidate) -> Option<String> {
    let (old, new) = (old_price?, chosen.price?);
    if old <= 0.0 {
        return None;
    }
    let change = (new - old).abs() / old * 100.0;
    (change > LARGE_CHANGE_PERCENT && chosen.price_confidence < LOW_CONFIDENCE).then(|| {
        format!(
            "Uncertain: price moved {change:.0}% ({old:.2} → {new:.2}) with low confidence ({:.2})",
            chosen.price_confidence
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_change_needs_low_confidence() {
        let weak = Candidate::priced(15.0, 0.6, Strategy::KeywordRegex);
        assert!(large_change_warning(Some(10.0), &weak)
            .unwrap()
            .starts_with("Uncertain:"));

        let strong = Candidate::priced(15.0, 0.9, Strategy::Vision);
        assert_eq!(large_change_warning(Some(10.0), &strong), None);

        let small = Candidate::priced(11.0, 0.3, Strategy::NearbyFallback);
        assert_eq!(large_change_warning(Some(10.0), &small), None);
        assert_eq!(large_change_warning(None, &weak), None);
    }

    #[test]
    fn states_render_snake_case() {
        assert_eq!(ExtractionState::VisionCheck.to_string(), "vision_check");
    }
}
