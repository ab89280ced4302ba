// File-backed store for the CLI.
//
//   <dir>/products.json   all tracked products, rewritten on every change
//   <dir>/settings.json   flat key/value settings, read once per tick
//   <dir>/history.jsonl   append-only price history, one entry per line
//
// Products are written to a temp file and renamed into place so a crash
// never leaves a half-written file behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use pricewatch_common::{PriceHistoryEntry, TrackedProduct};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::traits::{ProductStore, ProductUpdate, RefreshClaim};

const PRODUCTS_FILE: &str = "products.json";
const SETTINGS_FILE: &str = "settings.json";
const HISTORY_FILE: &str = "history.jsonl";

pub struct JsonFileStore {
    dir: PathBuf,
    products: Mutex<Vec<TrackedProduct>>,
    history_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (or create) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating data dir {}", dir.display()))?;

        let products_path = dir.join(PRODUCTS_FILE);
        let products: Vec<TrackedProduct> = match fs::read(&products_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing {}", products_path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e).context("reading products"),
        };
        info!(dir = %dir.display(), products = products.len(), "Opened product store");

        Ok(Self {
            dir,
            products: Mutex::new(products),
            history_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn persist(&self, products: &[TrackedProduct]) -> Result<()> {
        let path = self.dir.join(PRODUCTS_FILE);
        let tmp = self.dir.join(format!("{PRODUCTS_FILE}.tmp"));
        let body = serde_json::to_vec_pretty(products)?;
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl ProductStore for JsonFileStore {
    async fn load_product(&self, id: Uuid) -> Result<Option<TrackedProduct>> {
        Ok(self.products.lock().await.iter().find(|p| p.id == id).cloned())
    }

    async fn list_products(&self) -> Result<Vec<TrackedProduct>> {
        Ok(self.products.lock().await.clone())
    }

    async fn save_product(&self, product: &TrackedProduct) -> Result<()> {
        let mut products = self.products.lock().await;
        match products.iter_mut().find(|p| p.id == product.id) {
            Some(existing) => *existing = product.clone(),
            None => products.push(product.clone()),
        }
        self.persist(&products).await
    }

    async fn update_product(
        &self,
        id: Uuid,
        update: ProductUpdate,
    ) -> Result<Option<TrackedProduct>> {
        let mut products = self.products.lock().await;
        let Some(product) = products.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        update(product);
        let updated = product.clone();
        self.persist(&products).await?;
        Ok(Some(updated))
    }

    async fn try_claim_refresh(&self, id: Uuid) -> Result<RefreshClaim> {
        let mut products = self.products.lock().await;
        let claim = super::claim(products.iter_mut().find(|p| p.id == id));
        if matches!(claim, RefreshClaim::Claimed(_)) {
            self.persist(&products).await?;
        }
        Ok(claim)
    }

    async fn clear_stale_refresh_flags(&self) -> Result<usize> {
        let mut products = self.products.lock().await;
        let cleared = super::clear_flags(products.iter_mut());
        if cleared > 0 {
            self.persist(&products).await?;
        }
        Ok(cleared)
    }

    async fn append_history(&self, entry: &PriceHistoryEntry) -> Result<()> {
        let _guard = self.history_lock.lock().await;
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(HISTORY_FILE))
            .await
            .context("opening price history")?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn history(&self, product_id: Uuid) -> Result<Vec<PriceHistoryEntry>> {
        let raw = match fs::read_to_string(self.dir.join(HISTORY_FILE)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("reading price history"),
        };

        let mut entries = Vec::new();
        for (n, line) in raw.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            match serde_json::from_str::<PriceHistoryEntry>(line) {
                Ok(entry) if entry.product_id == product_id => entries.push(entry),
                Ok(_) => {}
                Err(e) => warn!(line = n + 1, error = %e, "Skipping malformed history line"),
            }
        }
        Ok(entries)
    }

    async fn load_settings(&self) -> Result<HashMap<String, String>> {
        let path = self.dir.join(SETTINGS_FILE);
        match fs::read(&path).await {
            Ok(bytes) => {
                let value: serde_json::Value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing {}", path.display()))?;
                let object = value
                    .as_object()
                    .with_context(|| format!("{} must hold a JSON object", path.display()))?;
                Ok(object
                    .iter()
                    .map(|(k, v)| {
                        let v = match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), v)
                    })
                    .collect())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e).context("reading settings"),
        }
    }
}
