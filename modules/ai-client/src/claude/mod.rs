pub(crate) mod types;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tracing::debug;

use crate::error::{AiError, Result};
use crate::traits::{VisionModel, VisionRequest};

use types::*;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// =============================================================================
// Claude
// =============================================================================

/// Anthropic Messages API. Images go in as base64 content blocks.
#[derive(Clone)]
pub struct Claude {
    api_key: String,
    pub(crate) model: String,
    base_url: Option<String>,
    http: reqwest::Client,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn messages(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let base = self.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);
        let url = format!("{}/messages", base.trim_end_matches('/'));

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        debug!(model = %request.model, provider = "anthropic", "messages request");
        let response = self.http.post(&url).headers(headers).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AiError::Api {
                status: status.as_u16(),
                message: format!("Claude API error: {}", response.text().await.unwrap_or_default()),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl VisionModel for Claude {
    fn provider(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn see(&self, request: &VisionRequest<'_>) -> Result<String> {
        use base64::Engine;

        let source = ImageSource {
            source_type: "base64".to_string(),
            media_type: request.image.mime_type.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(request.image.bytes),
        };

        let mut chat = ChatRequest::new(&self.model)
            .message(WireMessage::user_with_image(source, request.prompt))
            .max_tokens(request.max_tokens)
            .temperature(request.temperature);
        if let Some(system) = request.system {
            chat = chat.system(system);
        }

        let response = self.messages(&chat).await?;

        response
            .text()
            .ok_or_else(|| AiError::Parse("No text response from Claude vision".to_string()))
    }

    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let request = ChatRequest::new(&self.model)
            .system(system)
            .message(WireMessage::user(user))
            .max_tokens(max_tokens)
            .temperature(0.0);

        let response = self.messages(&request).await?;

        response
            .text()
            .ok_or_else(|| AiError::Parse("No response from Claude".to_string()))
    }
}
