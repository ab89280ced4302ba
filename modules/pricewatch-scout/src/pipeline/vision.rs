// Vision extraction: the page screenshot is the primary evidence, filtered
// page text is optional support. When the two disagree the image wins; the
// prompt states this as a hard rule and the coordinator enforces it.
//
// Raw model output is parsed leniently (code fences, prose around the
// object, French number strings). If that fails and repair is enabled, one
// text-only follow-up asks the model to restate its answer as JSON.

use std::time::Duration;

use ai_client::{
    extract_json_object, strip_code_blocks, truncate_to_char_boundary, AiError, Claude,
    ImageInput, OpenAi, OpenRouter, VisionModel, VisionRequest,
};
use async_trait::async_trait;
use pricewatch_common::{Strategy, VisionConfig, VisionProvider};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::candidate::Candidate;
use super::price::{is_plausible, parse_price};
use super::text::{relevant_text, RELEVANT_TEXT_MAX};
use crate::traits::VisionAnalyzer;

pub const PROMPT_VERSION: &str = "v2.0";

/// Raw output quoted back to the model in a repair turn.
const REPAIR_EXCERPT_LEN: usize = 1000;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Vision provider error: {0}")]
    Provider(String),

    #[error("Vision call timed out after {0}ms")]
    Timeout(u64),

    #[error("Unparsable vision response: {0}")]
    UnparsableResponse(String),

    #[error("Vision not configured: {0}")]
    NotConfigured(String),
}

impl From<AiError> for VisionError {
    fn from(e: AiError) -> Self {
        VisionError::Provider(e.to_string())
    }
}

// =============================================================================
// Judgment
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Image,
    Text,
    Both,
}

/// What the model reported, after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VisionJudgment {
    /// Main product price, tax included, or null if none is visible.
    pub price: Option<f64>,
    /// ISO 4217 code.
    pub currency: String,
    /// true in stock, false out of stock, null if unclear.
    pub in_stock: Option<bool>,
    pub price_confidence: f64,
    pub in_stock_confidence: f64,
    pub source_type: SourceType,
}

impl VisionJudgment {
    /// Normalize a model answer. Only a JSON object is accepted; every field
    /// is optional and leniently typed.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            price: obj.get("price").and_then(normalize_price),
            currency: obj
                .get("currency")
                .and_then(Value::as_str)
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "EUR".to_string()),
            in_stock: obj.get("in_stock").and_then(normalize_stock),
            price_confidence: obj.get("price_confidence").map(clamp_confidence).unwrap_or(0.0),
            in_stock_confidence: obj
                .get("in_stock_confidence")
                .map(clamp_confidence)
                .unwrap_or(0.0),
            source_type: obj
                .get("source_type")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
        })
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let body = strip_code_blocks(raw);
        let object = extract_json_object(body)?;
        let value: Value = serde_json::from_str(object).ok()?;
        Self::from_value(&value)
    }
}

/// Model answers may be numbers or formatted strings in either locale.
fn normalize_price(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|p| is_plausible(*p)),
        Value::String(s) => parse_price(s),
        _ => None,
    }
}

fn normalize_stock(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "in stock" | "available" | "1" => Some(true),
            "false" | "no" | "out of stock" | "unavailable" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn clamp_confidence(value: &Value) -> f64 {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    raw.filter(|v| v.is_finite()).unwrap_or(0.0).clamp(0.0, 1.0)
}

// =============================================================================
// Prompts
// =============================================================================

const EXTRACTION_PROMPT: &str = r#"You are a vision-first price extraction agent.
Goal: extract the main product price exactly as a human sees it on the screen.

SOURCE OF TRUTH = IMAGE
- The screenshot is the absolute truth.
- Any page text below is scraped HTML and may contain hidden or outdated prices.
- IF IMAGE AND TEXT CONFLICT, TRUST THE IMAGE.
- Use the text only if the image is unreadable or does not show a price.

PRICE RULES (French formats):
1. Look for the largest, boldest price near the product title and buy button.
2. Ignore unit prices such as "Prix au litre", "Prix au kg" or "(4,60 € / L)".
3. Ignore crossed-out prices (old prices).
4. Ignore "HT" prices; always report the TTC (tax included) price.
5. Ignore prices in "Other customers bought" or recommended product sections.

Number format: "3,99 €" -> 3.99, "1 234,56 €" -> 1234.56, "0.99 €" -> 0.99.

STOCK RULES:
- Check the buy button color and label.
- Green or blue "Ajouter au panier" -> true.
- Grey or red "Rupture", "Indisponible" -> false.
- If in doubt, look for "En stock".

CONFIDENCE:
- 1.0: price clearly visible in the image and matches the text.
- 0.9: price clearly visible in the image, text missing.
- 0.5: price found in the text only.
- 0.0: no price found.

Respond ONLY with valid JSON:
{
  "price": <number or null>,
  "currency": "EUR",
  "in_stock": <true, false, or null>,
  "price_confidence": <0.0 to 1.0>,
  "in_stock_confidence": <0.0 to 1.0>,
  "source_type": "image" | "text" | "both"
}"#;

const REPAIR_SYSTEM: &str = "You convert text into a single valid JSON object. Output JSON only.";

pub fn extraction_prompt(text_context: Option<&str>) -> String {
    match text_context.map(str::trim).filter(|t| !t.is_empty()) {
        Some(text) => format!(
            "{EXTRACTION_PROMPT}\n\nRelevant text from page:\n{}",
            relevant_text(text, RELEVANT_TEXT_MAX)
        ),
        None => EXTRACTION_PROMPT.to_string(),
    }
}

pub fn repair_prompt(raw_output: &str) -> String {
    let schema = serde_json::to_string_pretty(&schemars::schema_for!(VisionJudgment))
        .unwrap_or_default();
    format!(
        "Convert the following text into valid JSON matching this schema:\n\n{schema}\n\n\
         Rules:\n\
         - price is a number with no currency symbol, or null\n\
         - in_stock is true, false or null (not a string)\n\
         - confidences are numbers between 0.0 and 1.0\n\
         - respond with ONLY the JSON object\n\n\
         Text to convert:\n{}",
        truncate_to_char_boundary(raw_output, REPAIR_EXCERPT_LEN)
    )
}

// =============================================================================
// Client
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct VisionOutcome {
    pub judgment: VisionJudgment,
    pub provider: String,
    pub model: String,
    pub repair_used: bool,
}

impl VisionOutcome {
    pub fn candidate(&self) -> Candidate {
        let j = &self.judgment;
        Candidate {
            price: j.price,
            currency: Some(j.currency.clone()),
            in_stock: j.in_stock,
            price_confidence: if j.price.is_some() { j.price_confidence } else { 0.0 },
            stock_confidence: if j.in_stock.is_some() { j.in_stock_confidence } else { 0.0 },
            strategy: Strategy::Vision,
        }
    }
}

/// Build the provider client for one attempt.
pub fn build_model(config: &VisionConfig) -> Result<Box<dyn VisionModel>, VisionError> {
    let key = || {
        config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                VisionError::NotConfigured(format!("{} requires an API key", config.provider))
            })
    };
    let base = config.api_base.as_deref().filter(|b| !b.trim().is_empty());

    let model: Box<dyn VisionModel> = match config.provider {
        VisionProvider::OpenAi => {
            let client = OpenAi::new(key()?, &config.model);
            Box::new(match base {
                Some(url) => client.with_base_url(url),
                None => client,
            })
        }
        VisionProvider::OpenRouter => {
            let client = OpenRouter::new(key()?, &config.model).with_app_name("PriceWatch");
            Box::new(match base {
                Some(url) => client.with_base_url(url),
                None => client,
            })
        }
        VisionProvider::Anthropic => {
            let client = Claude::new(key()?, &config.model);
            Box::new(match base {
                Some(url) => client.with_base_url(url),
                None => client,
            })
        }
        VisionProvider::Ollama => {
            let client = OpenAi::ollama(&config.model);
            Box::new(match base {
                Some(url) => client.with_base_url(url),
                None => client,
            })
        }
    };
    Ok(model)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VisionClient;

impl VisionClient {
    pub fn new() -> Self {
        Self
    }

    async fn run(
        &self,
        model: &dyn VisionModel,
        screenshot: &[u8],
        text_context: Option<&str>,
        config: &VisionConfig,
    ) -> Result<VisionOutcome, VisionError> {
        let prompt = extraction_prompt(text_context);
        let request = VisionRequest {
            system: None,
            prompt: &prompt,
            image: ImageInput::png(screenshot),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };

        let raw = model.see(&request).await?;
        debug!(provider = model.provider(), len = raw.len(), "Vision response received");

        let outcome = |judgment, repair_used| VisionOutcome {
            judgment,
            provider: model.provider().to_string(),
            model: model.model().to_string(),
            repair_used,
        };

        if let Some(judgment) = VisionJudgment::parse(&raw) {
            return Ok(outcome(judgment, false));
        }
        if !config.json_repair_enabled {
            return Err(VisionError::UnparsableResponse(excerpt(&raw)));
        }

        warn!(provider = model.provider(), "Vision output is not JSON, attempting repair");
        let repaired = model
            .complete(REPAIR_SYSTEM, &repair_prompt(&raw), config.max_tokens)
            .await?;
        match VisionJudgment::parse(&repaired) {
            Some(judgment) => {
                info!(provider = model.provider(), "Vision output repaired");
                Ok(outcome(judgment, true))
            }
            None => Err(VisionError::UnparsableResponse(excerpt(&repaired))),
        }
    }
}

fn excerpt(raw: &str) -> String {
    truncate_to_char_boundary(raw.trim(), 200).to_string()
}

#[async_trait]
impl VisionAnalyzer for VisionClient {
    async fn analyze(
        &self,
        screenshot: &[u8],
        text_context: Option<&str>,
        config: &VisionConfig,
    ) -> Result<VisionOutcome, VisionError> {
        let model = build_model(config)?;
        let limit = Duration::from_millis(config.timeout_ms);
        tokio::time::timeout(limit, self.run(model.as_ref(), screenshot, text_context, config))
            .await
            .map_err(|_| VisionError::Timeout(config.timeout_ms))?
    }
}
