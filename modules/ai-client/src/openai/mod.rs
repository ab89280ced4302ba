mod client;
pub(crate) mod types;

pub(crate) use client::OpenAiClient;

use crate::error::Result;
use crate::traits::{VisionModel, VisionRequest};
use async_trait::async_trait;

use types::{ChatRequest, WireMessage};

/// Default endpoint of a local Ollama server's OpenAI-compatible API.
pub const OLLAMA_API_URL: &str = "http://localhost:11434/v1";

// =============================================================================
// OpenAi
// =============================================================================

#[derive(Clone)]
pub struct OpenAi {
    api_key: Option<String>,
    pub(crate) model: String,
    base_url: Option<String>,
    provider: &'static str,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            model: model.into(),
            base_url: None,
            provider: "openai",
        }
    }

    /// Keyless OpenAI-compatible server (Ollama).
    pub fn ollama(model: impl Into<String>) -> Self {
        Self {
            api_key: None,
            model: model.into(),
            base_url: Some(OLLAMA_API_URL.to_string()),
            provider: "ollama",
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub(crate) fn client(&self) -> OpenAiClient {
        let client = OpenAiClient::new(self.api_key.as_deref());
        let client = if self.provider == "ollama" {
            client.with_label("Ollama")
        } else {
            client
        };
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }
}

#[async_trait]
impl VisionModel for OpenAi {
    fn provider(&self) -> &'static str {
        self.provider
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

/// Build a chat request carrying one image, shared by every OpenAI-format provider.
pub(crate) fn vision_chat_request(model: &str, request: &VisionRequest<'_>) -> ChatRequest {
    let mut chat = ChatRequest::new(model);
    if let Some(system) = request.system {
        chat = chat.message(WireMessage::system(system));
    }
    chat.message(WireMessage::user_with_image(
        request.prompt,
        request.image.data_url(),
    ))
    .limits(request.temperature, request.max_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ImageInput;

    #[test]
    fn test_openai_new() {
        let ai = OpenAi::new("sk-test", "gpt-4o");
        assert_eq!(ai.model, "gpt-4o");
        assert_eq!(ai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(VisionModel::provider(&ai), "openai");
    }

    #[test]
    fn test_openai_with_base_url() {
        let ai = OpenAi::new("sk-test", "gpt-4o").with_base_url("https://custom.api.com");
        assert_eq!(ai.base_url, Some("https://custom.api.com".to_string()));
    }

    #[test]
    fn test_ollama_is_keyless() {
        let ai = OpenAi::ollama("llava");
        assert!(ai.api_key.is_none());
        assert_eq!(ai.base_url.as_deref(), Some(OLLAMA_API_URL));
        assert_eq!(VisionModel::provider(&ai), "ollama");
    }

    #[test]
    fn vision_request_puts_system_first() {
        let req = VisionRequest {
            system: Some("sys"),
            prompt: "prix ?",
            image: ImageInput::png(b"x"),
            temperature: 0.1,
            max_tokens: 300,
        };
        let chat = vision_chat_request("gpt-4o", &req);
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].role, types::Role::System);
        assert_eq!(chat.max_tokens, Some(300));
    }

    #[test]
    fn invalid_key_is_config_error() {
        let ai = OpenAi::new("bad\nkey", "gpt-4o");
        let result = tokio_test::block_on(ai.complete("s", "u", 10));
        assert!(matches!(result, Err(crate::AiError::Config(_))));
    }
}
