// Test mocks for the extraction pipeline.
//
// Three mocks matching the outward trait boundaries:
// - MockRenderer (PageRenderer): URL to page map, or a scripted failure
// - MockVision (VisionAnalyzer): fixed judgment or failure, counts calls
// - RecordingNotifier (Notifier): keeps every event
//
// Plus fixture helpers for products, settings and product pages. Stores use
// the real `MemoryStore`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use browserless_client::{BrowserlessError, RenderOptions, RenderedPage};
use pricewatch_common::{
    ExtractionSettings, NotificationEvent, TrackedProduct, VisionConfig, VisionProvider,
};

use crate::pipeline::vision::{SourceType, VisionError, VisionJudgment, VisionOutcome};
use crate::store::MemoryStore;
use crate::traits::{Notifier, PageRenderer, VisionAnalyzer};
use crate::ScoutDeps;

/// Smallest valid PNG header; the mocks never decode it.
pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\n";

// ---------------------------------------------------------------------------
// MockRenderer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFailure {
    Timeout,
    Navigation,
    ConnectionLost,
}

enum Scripted {
    Page(RenderedPage),
    Fail(RenderFailure),
}

/// URL-keyed renderer. Returns a navigation error for unregistered URLs.
/// Builder pattern: `.on_page()`, `.on_page_titled()`, `.on_failure()`.
#[derive(Default)]
pub struct MockRenderer {
    pages: HashMap<String, Scripted>,
    calls: AtomicUsize,
    last_options: Mutex<Option<RenderOptions>>,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_page(self, url: &str, html: &str) -> Self {
        let title = {
            let doc = scraper::Html::parse_document(html);
            crate::pipeline::text::page_title(&doc).unwrap_or_default()
        };
        self.on_page_titled(url, html, &title)
    }

    pub fn on_page_titled(mut self, url: &str, html: &str, title: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            Scripted::Page(RenderedPage {
                html: html.to_string(),
                screenshot: FAKE_PNG.to_vec(),
                final_url: url.to_string(),
                title: title.to_string(),
            }),
        );
        self
    }

    pub fn on_failure(mut self, url: &str, failure: RenderFailure) -> Self {
        self.pages.insert(url.to_string(), Scripted::Fail(failure));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<RenderOptions> {
        self.last_options
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl PageRenderer for MockRenderer {
    async fn render(
        &self,
        url: &str,
        options: &RenderOptions,
    ) -> std::result::Result<RenderedPage, BrowserlessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap_or_else(|p| p.into_inner()) = Some(options.clone());
        match self.pages.get(url) {
            Some(Scripted::Page(page)) => Ok(page.clone()),
            Some(Scripted::Fail(RenderFailure::Timeout)) => {
                Err(BrowserlessError::Timeout(options.timeout_ms))
            }
            Some(Scripted::Fail(RenderFailure::Navigation)) => {
                Err(BrowserlessError::Navigation(format!("net::ERR_NAME_NOT_RESOLVED at {url}")))
            }
            Some(Scripted::Fail(RenderFailure::ConnectionLost)) => Err(
                BrowserlessError::ConnectionLost("websocket closed".to_string()),
            ),
            None => Err(BrowserlessError::Navigation(format!("MockRenderer: no page for {url}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// MockVision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionFailure {
    Provider,
    Timeout,
    Unparsable,
}

/// Vision analyzer with one scripted answer. Records how often it was asked
/// and the text context it was given.
pub struct MockVision {
    answer: std::result::Result<VisionJudgment, VisionFailure>,
    calls: AtomicUsize,
    contexts: Mutex<Vec<Option<String>>>,
}

impl MockVision {
    pub fn seeing(price: Option<f64>, in_stock: Option<bool>) -> Self {
        Self::with_answer(Ok(VisionJudgment {
            price,
            currency: "EUR".to_string(),
            in_stock,
            price_confidence: if price.is_some() { 0.9 } else { 0.0 },
            in_stock_confidence: if in_stock.is_some() { 0.9 } else { 0.0 },
            source_type: SourceType::Image,
        }))
    }

    pub fn failing(failure: VisionFailure) -> Self {
        Self::with_answer(Err(failure))
    }

    fn with_answer(answer: std::result::Result<VisionJudgment, VisionFailure>) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<Option<String>> {
        self.contexts.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl VisionAnalyzer for MockVision {
    async fn analyze(
        &self,
        _screenshot: &[u8],
        text_context: Option<&str>,
        config: &VisionConfig,
    ) -> std::result::Result<VisionOutcome, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(text_context.map(str::to_string));

        match &self.answer {
            Ok(judgment) => Ok(VisionOutcome {
                judgment: judgment.clone(),
                provider: config.provider.to_string(),
                model: config.model.clone(),
                repair_used: false,
            }),
            Err(VisionFailure::Provider) => {
                Err(VisionError::Provider("API error (401): invalid key".to_string()))
            }
            Err(VisionFailure::Timeout) => Err(VisionError::Timeout(config.timeout_ms)),
            Err(VisionFailure::Unparsable) => {
                Err(VisionError::UnparsableResponse("I think it costs about 12".to_string()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A wired set of mocks around a memory store.
pub struct Harness {
    pub renderer: Arc<MockRenderer>,
    pub vision: Arc<MockVision>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(renderer: MockRenderer, vision: MockVision, store: MemoryStore) -> Self {
        Self {
            renderer: Arc::new(renderer),
            vision: Arc::new(vision),
            store: Arc::new(store),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn deps(&self) -> ScoutDeps {
        ScoutDeps::builder()
            .renderer(self.renderer.clone())
            .store(self.store.clone())
            .vision(self.vision.clone())
            .notifier(self.notifier.clone())
            .build()
    }
}

pub fn product(url: &str, name: &str) -> TrackedProduct {
    TrackedProduct::new(url, name)
}

/// A product with a previous good read on record.
pub fn checked_product(url: &str, name: &str, price: f64, in_stock: bool) -> TrackedProduct {
    let mut p = TrackedProduct::new(url, name);
    p.current_price = Some(price);
    p.currency = Some("EUR".to_string());
    p.in_stock = Some(in_stock);
    p.price_confidence = Some(1.0);
    p.stock_confidence = Some(1.0);
    p.reference_title = Some(name.to_string());
    p
}

pub fn settings_without_vision() -> ExtractionSettings {
    ExtractionSettings::default()
}

pub fn settings_with_vision() -> ExtractionSettings {
    let mut config = VisionConfig::new(VisionProvider::OpenAi);
    config.api_key = Some("sk-test".to_string());
    ExtractionSettings {
        vision: Some(config),
        ..ExtractionSettings::default()
    }
}

pub fn jsonld_page(title: &str, price: &str, availability: &str) -> String {
    format!(
        r#"<html><head><title>{title}</title>
        <script type="application/ld+json">
        {{"@context":"https://schema.org","@type":"Product","name":"{title}",
          "offers":{{"@type":"Offer","price":"{price}","priceCurrency":"EUR",
                    "availability":"https://schema.org/{availability}"}}}}
        </script></head>
        <body><h1>{title}</h1><div class="price">{price} €</div></body></html>"#
    )
}

pub fn plain_page(title: &str, body: &str) -> String {
    format!("<html><head><title>{title}</title></head><body><main>{body}</main></body></html>")
}
