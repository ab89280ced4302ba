use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use pricewatch_common::{PriceHistoryEntry, TrackedProduct};
use uuid::Uuid;

use crate::traits::{ProductStore, ProductUpdate, RefreshClaim};

#[derive(Default)]
struct State {
    products: HashMap<Uuid, TrackedProduct>,
    history: Vec<PriceHistoryEntry>,
    settings: HashMap<String, String>,
}

/// In-memory store. Every call holds one lock, which gives the per-call
/// atomicity the pipeline relies on.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(self, product: TrackedProduct) -> Self {
        self.lock().products.insert(product.id, product);
        self
    }

    pub fn with_setting(self, key: &str, value: &str) -> Self {
        self.lock().settings.insert(key.to_string(), value.to_string());
        self
    }

    pub fn set_setting(&self, key: &str, value: &str) {
        self.lock().settings.insert(key.to_string(), value.to_string());
    }

    /// Current copy of a product, for assertions.
    pub fn snapshot(&self, id: Uuid) -> Option<TrackedProduct> {
        self.lock().products.get(&id).cloned()
    }

    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn load_product(&self, id: Uuid) -> Result<Option<TrackedProduct>> {
        Ok(self.lock().products.get(&id).cloned())
    }

    async fn list_products(&self) -> Result<Vec<TrackedProduct>> {
        let mut products: Vec<_> = self.lock().products.values().cloned().collect();
        products.sort_by_key(|p| p.created_at);
        Ok(products)
    }

    async fn save_product(&self, product: &TrackedProduct) -> Result<()> {
        self.lock().products.insert(product.id, product.clone());
        Ok(())
    }

    async fn update_product(
        &self,
        id: Uuid,
        update: ProductUpdate,
    ) -> Result<Option<TrackedProduct>> {
        let mut state = self.lock();
        Ok(state.products.get_mut(&id).map(|p| {
            update(p);
            p.clone()
        }))
    }

    async fn try_claim_refresh(&self, id: Uuid) -> Result<RefreshClaim> {
        Ok(super::claim(self.lock().products.get_mut(&id)))
    }

    async fn clear_stale_refresh_flags(&self) -> Result<usize> {
        Ok(super::clear_flags(self.lock().products.values_mut()))
    }

    async fn append_history(&self, entry: &PriceHistoryEntry) -> Result<()> {
        self.lock().history.push(entry.clone());
        Ok(())
    }

    async fn history(&self, product_id: Uuid) -> Result<Vec<PriceHistoryEntry>> {
        Ok(self
            .lock()
            .history
            .iter()
            .filter(|e| e.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn load_settings(&self) -> Result<HashMap<String, String>> {
        Ok(self.lock().settings.clone())
    }
}
