use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{info, warn};

use crate::error::{PriceWatchError, Result};

// =============================================================================
// Process configuration
// =============================================================================

/// Process-level configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ScoutConfig {
    // Remote browser
    pub browserless_url: String,
    pub browserless_token: Option<String>,
    pub max_browser_pages: usize,

    // Storage
    pub data_dir: PathBuf,

    // Scheduling
    pub tick_interval_secs: u64,
    pub max_concurrent_checks: usize,
}

impl ScoutConfig {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self::load(required_env("BROWSERLESS_URL"))
    }

    /// Load a config for commands that only touch the store.
    pub fn offline_from_env() -> Self {
        Self::load(env::var("BROWSERLESS_URL").unwrap_or_default())
    }

    fn load(browserless_url: String) -> Self {
        Self {
            browserless_url,
            browserless_token: env::var("BROWSERLESS_TOKEN").ok().filter(|t| !t.is_empty()),
            max_browser_pages: parsed_env("MAX_BROWSER_PAGES", 2),
            data_dir: env::var("PRICEWATCH_DATA_DIR")
                .unwrap_or_else(|_| "./data".to_string())
                .into(),
            tick_interval_secs: parsed_env("TICK_INTERVAL_SECS", 60),
            max_concurrent_checks: parsed_env("MAX_CONCURRENT_CHECKS", 2),
        }
    }

    pub fn log_redacted(&self) {
        info!(
            browserless_url = %self.browserless_url,
            browserless_token = redact(self.browserless_token.as_deref()),
            max_browser_pages = self.max_browser_pages,
            data_dir = %self.data_dir.display(),
            tick_interval_secs = self.tick_interval_secs,
            max_concurrent_checks = self.max_concurrent_checks,
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number, got {raw:?}")),
        Err(_) => default,
    }
}

fn redact(secret: Option<&str>) -> &'static str {
    match secret {
        Some(s) if !s.is_empty() => "[set]",
        _ => "[unset]",
    }
}

// =============================================================================
// Vision provider configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionProvider {
    OpenAi,
    OpenRouter,
    Anthropic,
    Ollama,
}

impl VisionProvider {
    pub fn default_model(&self) -> &'static str {
        match self {
            VisionProvider::OpenAi => "gpt-4o-mini",
            VisionProvider::OpenRouter => "google/gemini-2.0-flash-001",
            VisionProvider::Anthropic => "claude-3-5-haiku-latest",
            VisionProvider::Ollama => "llava",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, VisionProvider::Ollama)
    }
}

impl FromStr for VisionProvider {
    type Err = PriceWatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(VisionProvider::OpenAi),
            "openrouter" => Ok(VisionProvider::OpenRouter),
            "anthropic" | "claude" => Ok(VisionProvider::Anthropic),
            "ollama" => Ok(VisionProvider::Ollama),
            other => Err(PriceWatchError::Config(format!(
                "unknown ai_provider {other:?}"
            ))),
        }
    }
}

impl fmt::Display for VisionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VisionProvider::OpenAi => "openai",
            VisionProvider::OpenRouter => "openrouter",
            VisionProvider::Anthropic => "anthropic",
            VisionProvider::Ollama => "ollama",
        };
        f.write_str(s)
    }
}

#[derive(Clone, PartialEq)]
pub struct VisionConfig {
    pub provider: VisionProvider,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub json_repair_enabled: bool,
}

impl fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_ms", &self.timeout_ms)
            .field("api_key", &redact(self.api_key.as_deref()))
            .field("api_base", &self.api_base)
            .field("json_repair_enabled", &self.json_repair_enabled)
            .finish()
    }
}

impl VisionConfig {
    pub fn new(provider: VisionProvider) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            temperature: 0.1,
            max_tokens: 300,
            timeout_ms: 30_000,
            api_key: None,
            api_base: None,
            json_repair_enabled: true,
        }
    }
}

// =============================================================================
// Per-tick extraction settings
// =============================================================================

pub const MIN_SCRAPER_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_SCROLL_PIXELS: u32 = 350;

/// Settings resolved once per tick from the key/value settings store and
/// handed unchanged to every attempt of that tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSettings {
    pub scraper_timeout_ms: u64,
    pub smart_scroll_enabled: bool,
    pub smart_scroll_pixels: u32,
    pub dismiss_popups: bool,
    pub text_context_enabled: bool,
    pub text_context_length: usize,
    pub price_confidence_threshold: f64,
    pub stock_confidence_threshold: f64,
    /// Run vision even when structured data or a confident heuristic already
    /// produced a price.
    pub vision_corroboration: bool,
    pub title_similarity_threshold: f64,
    pub refresh_interval_minutes: u32,
    /// `None` when no usable provider is configured.
    pub vision: Option<VisionConfig>,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            scraper_timeout_ms: 90_000,
            smart_scroll_enabled: false,
            smart_scroll_pixels: DEFAULT_SCROLL_PIXELS,
            dismiss_popups: true,
            text_context_enabled: false,
            text_context_length: 5_000,
            price_confidence_threshold: 0.5,
            stock_confidence_threshold: 0.5,
            vision_corroboration: false,
            title_similarity_threshold: 0.5,
            refresh_interval_minutes: 60,
            vision: None,
        }
    }
}

impl ExtractionSettings {
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        let d = Self::default();
        let r = SettingsReader(settings);

        let timeout: u64 = r.number("scraper_timeout", d.scraper_timeout_ms)?;
        let pixels: i64 = r.number("smart_scroll_pixels", 0)?;
        let refresh: u32 = r.number("refresh_interval_minutes", d.refresh_interval_minutes)?;

        Ok(Self {
            scraper_timeout_ms: timeout.max(MIN_SCRAPER_TIMEOUT_MS),
            smart_scroll_enabled: r.flag("smart_scroll_enabled", d.smart_scroll_enabled)?,
            smart_scroll_pixels: u32::try_from(pixels)
                .ok()
                .filter(|p| *p > 0)
                .unwrap_or(DEFAULT_SCROLL_PIXELS),
            dismiss_popups: r.flag("dismiss_popups", d.dismiss_popups)?,
            text_context_enabled: r.flag("text_context_enabled", d.text_context_enabled)?,
            text_context_length: r.number("text_context_length", d.text_context_length)?,
            price_confidence_threshold: r
                .unit("confidence_threshold_price", d.price_confidence_threshold)?,
            stock_confidence_threshold: r
                .unit("confidence_threshold_stock", d.stock_confidence_threshold)?,
            vision_corroboration: r.flag("vision_corroboration", d.vision_corroboration)?,
            title_similarity_threshold: r
                .unit("title_similarity_threshold", d.title_similarity_threshold)?,
            refresh_interval_minutes: refresh.max(1),
            vision: vision_from_settings(&r)?,
        })
    }
}

fn vision_from_settings(r: &SettingsReader<'_>) -> Result<Option<VisionConfig>> {
    let provider = match r.text("ai_provider") {
        None | Some("none") | Some("disabled") => return Ok(None),
        Some(raw) => raw.parse::<VisionProvider>()?,
    };

    let api_key = r.text("ai_api_key").map(str::to_string);
    if provider.requires_api_key() && api_key.is_none() {
        warn!(
            provider = %provider,
            "Vision provider configured without ai_api_key, vision disabled"
        );
        return Ok(None);
    }

    let mut config = VisionConfig::new(provider);
    if let Some(model) = r.text("ai_model") {
        config.model = model.to_string();
    }
    config.api_key = api_key;
    config.api_base = r.text("ai_api_base").map(str::to_string);
    config.temperature = r.number("ai_temperature", config.temperature)?;
    config.max_tokens = r.number("ai_max_tokens", config.max_tokens)?;
    config.timeout_ms = r.number("ai_timeout", config.timeout_ms)?;
    config.json_repair_enabled = r.flag("ai_repair_enabled", config.json_repair_enabled)?;

    Ok(Some(config))
}

/// Typed reads over the raw key/value settings. Blank values count as unset.
struct SettingsReader<'a>(&'a HashMap<String, String>);

impl SettingsReader<'_> {
    fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    fn number<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.text(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| {
                PriceWatchError::Config(format!("{key} must be a number, got {v:?}"))
            }),
        }
    }

    fn unit(&self, key: &str, default: f64) -> Result<f64> {
        let value: f64 = self.number(key, default)?;
        if (0.0..=1.0).contains(&value) {
            Ok(value)
        } else {
            Err(PriceWatchError::Config(format!(
                "{key} must be between 0 and 1, got {value}"
            )))
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.text(key).map(str::to_lowercase).as_deref() {
            None => Ok(default),
            Some("true" | "1" | "yes" | "on") => Ok(true),
            Some("false" | "0" | "no" | "off") => Ok(false),
            Some(other) => Err(PriceWatchError::Config(format!(
                "{key} must be a boolean, got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_store_gives_defaults() {
        let s = ExtractionSettings::from_settings(&HashMap::new()).unwrap();
        assert_eq!(s, ExtractionSettings::default());
        assert!(s.vision.is_none());
    }

    #[test]
    fn timeout_has_a_floor_and_scroll_falls_back() {
        let s = ExtractionSettings::from_settings(&settings(&[
            ("scraper_timeout", "5000"),
            ("smart_scroll_pixels", "-20"),
            ("smart_scroll_enabled", "true"),
        ]))
        .unwrap();
        assert_eq!(s.scraper_timeout_ms, MIN_SCRAPER_TIMEOUT_MS);
        assert_eq!(s.smart_scroll_pixels, DEFAULT_SCROLL_PIXELS);
        assert!(s.smart_scroll_enabled);
    }

    #[test]
    fn malformed_threshold_is_rejected() {
        for (key, value) in [
            ("confidence_threshold_price", "high"),
            ("confidence_threshold_stock", "1.5"),
            ("dismiss_popups", "maybe"),
        ] {
            let err = ExtractionSettings::from_settings(&settings(&[(key, value)])).unwrap_err();
            assert!(matches!(err, PriceWatchError::Config(_)), "{key}");
            assert!(err.to_string().contains(key));
        }
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let s = ExtractionSettings::from_settings(&settings(&[
            ("scraper_timeout", "  "),
            ("confidence_threshold_price", ""),
            ("refresh_interval_minutes", "0"),
        ]))
        .unwrap();
        assert_eq!(s.scraper_timeout_ms, 90_000);
        assert_eq!(s.price_confidence_threshold, 0.5);
        assert_eq!(s.refresh_interval_minutes, 1);
    }

    #[test]
    fn vision_needs_a_key_unless_ollama() {
        let s = ExtractionSettings::from_settings(&settings(&[("ai_provider", "openai")])).unwrap();
        assert!(s.vision.is_none());

        let s = ExtractionSettings::from_settings(&settings(&[("ai_provider", "ollama")])).unwrap();
        let vision = s.vision.unwrap();
        assert_eq!(vision.provider, VisionProvider::Ollama);
        assert_eq!(vision.model, "llava");
    }

    #[test]
    fn vision_block_reads_overrides() {
        let s = ExtractionSettings::from_settings(&settings(&[
            ("ai_provider", "OpenRouter"),
            ("ai_api_key", "sk-or-1"),
            ("ai_model", "openai/gpt-4o"),
            ("ai_timeout", "12000"),
            ("ai_repair_enabled", "no"),
        ]))
        .unwrap();
        let vision = s.vision.unwrap();
        assert_eq!(vision.provider, VisionProvider::OpenRouter);
        assert_eq!(vision.model, "openai/gpt-4o");
        assert_eq!(vision.timeout_ms, 12_000);
        assert!(!vision.json_repair_enabled);
        assert!(!format!("{vision:?}").contains("sk-or-1"));
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let err = ExtractionSettings::from_settings(&settings(&[("ai_provider", "gemini-direct")]))
            .unwrap_err();
        assert!(err.to_string().contains("gemini-direct"));
    }
}
