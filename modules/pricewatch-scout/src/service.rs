// Entry points used by the CLI and any outer API: manual refresh, manual
// availability override, adding products.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::info;
use url::Url;
use uuid::Uuid;

use pricewatch_common::{ExtractionSettings, PriceWatchError, TrackedProduct};

use crate::pipeline::{ExtractError, ExtractionCoordinator, ExtractionResult};
use crate::traits::ProductStore;
use crate::ScoutDeps;

pub enum RefreshRequest {
    /// The attempt is running in the background.
    Accepted(JoinHandle<Result<ExtractionResult, ExtractError>>),
    AlreadyRefreshing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityChange {
    Applied,
    /// An attempt is in flight; the value is applied when it finishes.
    Deferred,
}

#[derive(Debug, Default, Clone)]
pub struct NewProduct {
    pub url: String,
    pub name: String,
    pub target_price: Option<f64>,
    pub selector: Option<String>,
    pub check_interval_minutes: Option<u32>,
}

pub struct TrackerService {
    deps: ScoutDeps,
    coordinator: Arc<ExtractionCoordinator>,
}

impl TrackerService {
    pub fn new(deps: ScoutDeps) -> Self {
        let coordinator = Arc::new(ExtractionCoordinator::new(deps.clone()));
        Self { deps, coordinator }
    }

    async fn settings(&self) -> Result<ExtractionSettings, ExtractError> {
        let raw = self
            .deps
            .store
            .load_settings()
            .await
            .map_err(ExtractError::Store)?;
        Ok(ExtractionSettings::from_settings(&raw)?)
    }

    /// Start a refresh without waiting for it. A product that is already
    /// refreshing is rejected, never queued.
    pub async fn request_refresh(&self, product_id: Uuid) -> Result<RefreshRequest, ExtractError> {
        let settings = self.settings().await?;
        let product = match self.coordinator.claim(product_id).await {
            Ok(product) => product,
            Err(ExtractError::AlreadyRefreshing(_)) => return Ok(RefreshRequest::AlreadyRefreshing),
            Err(e) => return Err(e),
        };

        let handle = tokio::spawn(self.coordinator.clone().run_isolated(product, settings));
        Ok(RefreshRequest::Accepted(handle))
    }

    /// Run one attempt and wait for its result.
    pub async fn check_now(&self, product_id: Uuid) -> Result<ExtractionResult, ExtractError> {
        let settings = self.settings().await?;
        self.coordinator.extract(product_id, &settings).await
    }
}

/// Manual availability override. While an attempt holds the product the
/// value is parked and applied after the attempt's own decision.
pub async fn set_availability(
    store: &dyn ProductStore,
    product_id: Uuid,
    available: bool,
) -> Result<AvailabilityChange> {
    let updated = store
        .update_product(
            product_id,
            Box::new(move |p: &mut TrackedProduct| {
                if p.is_refreshing {
                    p.availability_override = Some(available);
                } else {
                    p.is_available = available;
                    p.availability_override = None;
                }
            }),
        )
        .await?
        .ok_or_else(|| PriceWatchError::Validation(format!("unknown product {product_id}")))?;

    let change = if updated.is_refreshing {
        AvailabilityChange::Deferred
    } else {
        AvailabilityChange::Applied
    };
    info!(product_id = %product_id, available, change = ?change, "Availability set manually");
    Ok(change)
}

pub async fn add_product(store: &dyn ProductStore, new: NewProduct) -> Result<TrackedProduct> {
    let url = Url::parse(new.url.trim())
        .map_err(|e| PriceWatchError::Validation(format!("invalid url {:?}: {e}", new.url)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PriceWatchError::Validation(format!(
            "unsupported url scheme {:?}",
            url.scheme()
        ))
        .into());
    }
    if new.name.trim().is_empty() {
        return Err(PriceWatchError::Validation("product name is empty".into()).into());
    }
    if new.target_price.is_some_and(|t| !t.is_finite() || t <= 0.0) {
        return Err(PriceWatchError::Validation("target price must be positive".into()).into());
    }

    let mut product = TrackedProduct::new(url.as_str(), new.name.trim());
    product.target_price = new.target_price;
    product.selector = new.selector.filter(|s| !s.trim().is_empty());
    product.check_interval_minutes = new.check_interval_minutes;
    store.save_product(&product).await?;

    info!(product_id = %product.id, url = product.url.as_str(), "Product added");
    Ok(product)
}
