// Trait boundaries of the extraction pipeline.
//
// PageRenderer hides the remote browser, VisionAnalyzer the AI providers,
// ProductStore persistence and Notifier the outbound alert channel. The
// coordinator only sees these traits, so scenario tests run with the mocks
// in `testing.rs`: no browser, no network, no disk.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use browserless_client::{BrowserlessClient, BrowserlessError, RenderOptions, RenderedPage};
use pricewatch_common::{NotificationEvent, PriceHistoryEntry, TrackedProduct, VisionConfig};

use crate::pipeline::vision::{VisionError, VisionOutcome};

// ---------------------------------------------------------------------------
// PageRenderer
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(
        &self,
        url: &str,
        options: &RenderOptions,
    ) -> std::result::Result<RenderedPage, BrowserlessError>;
}

#[async_trait]
impl PageRenderer for BrowserlessClient {
    async fn render(
        &self,
        url: &str,
        options: &RenderOptions,
    ) -> std::result::Result<RenderedPage, BrowserlessError> {
        BrowserlessClient::render(self, url, options).await
    }
}

// ---------------------------------------------------------------------------
// VisionAnalyzer
// ---------------------------------------------------------------------------

#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    /// Read price and stock from a screenshot. `text_context` is supporting
    /// evidence only; the image wins on conflict.
    async fn analyze(
        &self,
        screenshot: &[u8],
        text_context: Option<&str>,
        config: &VisionConfig,
    ) -> std::result::Result<VisionOutcome, VisionError>;
}

// ---------------------------------------------------------------------------
// ProductStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshClaim {
    /// The in-flight flag is now set; the product as it was when claimed.
    Claimed(TrackedProduct),
    AlreadyRefreshing,
    NotFound,
}

/// Mutation applied to one stored product under the store's lock.
pub type ProductUpdate = Box<dyn FnOnce(&mut TrackedProduct) + Send>;

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn load_product(&self, id: Uuid) -> Result<Option<TrackedProduct>>;

    async fn list_products(&self) -> Result<Vec<TrackedProduct>>;

    /// Insert or replace a product.
    async fn save_product(&self, product: &TrackedProduct) -> Result<()>;

    /// Read-modify-write of one product, atomic with respect to other calls
    /// on the same store. Returns the updated product, or `None` if missing.
    async fn update_product(&self, id: Uuid, update: ProductUpdate)
        -> Result<Option<TrackedProduct>>;

    /// Set the in-flight flag if it is clear.
    async fn try_claim_refresh(&self, id: Uuid) -> Result<RefreshClaim>;

    /// Clear in-flight flags left behind by a previous process.
    async fn clear_stale_refresh_flags(&self) -> Result<usize>;

    async fn append_history(&self, entry: &PriceHistoryEntry) -> Result<()>;

    async fn history(&self, product_id: Uuid) -> Result<Vec<PriceHistoryEntry>>;

    /// Raw key/value settings, resolved into `ExtractionSettings` once per tick.
    async fn load_settings(&self) -> Result<HashMap<String, String>>;
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Fire-and-forget from the pipeline's point of view.
    async fn notify(&self, event: &NotificationEvent) -> Result<()>;
}
