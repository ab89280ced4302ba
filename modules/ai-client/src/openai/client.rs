use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use super::types::*;
use crate::error::{AiError, Result};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Wire client for any endpoint speaking the OpenAI chat-completions format.
pub(crate) struct OpenAiClient {
    api_key: Option<String>,
    http: reqwest::Client,
    base_url: String,
    extra_headers: Vec<(&'static str, String)>,
    label: &'static str,
}

impl OpenAiClient {
    pub fn new(api_key: Option<&str>) -> Self {
        Self {
            api_key: api_key.map(str::to_string),
            http: reqwest::Client::new(),
            base_url: OPENAI_API_URL.to_string(),
            extra_headers: Vec::new(),
            label: "OpenAI",
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.extra_headers.push((name, value.to_string()));
        self
    }

    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(ref key) = self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key))?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (name, value) in &self.extra_headers {
            if let Ok(val) = HeaderValue::from_str(value) {
                headers.insert(*name, val);
            }
        }

        Ok(headers)
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %request.model, provider = self.label, "chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                message: format!("{} API error: {}", self.label, message),
            });
        }

        Ok(response.json().await?)
    }

    pub async fn chat_text(&self, request: &ChatRequest) -> Result<String> {
        self.chat(request)
            .await?
            .first_text()
            .ok_or_else(|| AiError::Parse(format!("No response content from {}", self.label)))
    }
}
