use crate::error::Result;
use crate::openai::types::{ChatRequest, WireMessage};
use crate::openai::{vision_chat_request, OpenAiClient};
use crate::traits::{VisionModel, VisionRequest};
use async_trait::async_trait;

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";

// =============================================================================
// OpenRouter
// =============================================================================

/// OpenRouter speaks the OpenAI wire format with two attribution headers.
#[derive(Clone)]
pub struct OpenRouter {
    api_key: String,
    pub(crate) model: String,
    base_url: Option<String>,
    app_name: Option<String>,
    site_url: Option<String>,
}

impl OpenRouter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            app_name: None,
            site_url: None,
        }
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn with_site_url(mut self, url: impl Into<String>) -> Self {
        self.site_url = Some(url.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub(crate) fn client(&self) -> OpenAiClient {
        let mut client = OpenAiClient::new(Some(&self.api_key))
            .with_label("OpenRouter")
            .with_base_url(self.base_url.as_deref().unwrap_or(OPENROUTER_API_URL));

        if let Some(ref url) = self.site_url {
            client = client.with_header("HTTP-Referer", url);
        }
        if let Some(ref name) = self.app_name {
            client = client.with_header("X-Title", name);
        }
        client
    }
}

#[async_trait]
impl VisionModel for OpenRouter {
    fn provider(&self) -> &'static str {
        "openrouter"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn see(&self, request: &VisionRequest<'_>) -> Result<String> {
        let chat = vision_chat_request(&self.model, request);
        self.client().chat_text(&chat).await
    }

    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let request = ChatRequest::new(&self.model)
            .message(WireMessage::system(system))
            .message(WireMessage::user(user))
            .limits(0.0, max_tokens);

        self.client().chat_text(&request).await
    }
}
