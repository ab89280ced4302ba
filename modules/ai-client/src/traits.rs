use crate::error::Result;
use async_trait::async_trait;

// =============================================================================
// Vision Request
// =============================================================================

/// An image to send to a vision model.
#[derive(Debug, Clone, Copy)]
pub struct ImageInput<'a> {
    pub bytes: &'a [u8],
    pub mime_type: &'a str,
}

impl<'a> ImageInput<'a> {
    pub fn png(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            mime_type: "image/png",
        }
    }

    /// `data:` URL form used by OpenAI-compatible APIs.
    pub fn data_url(&self) -> String {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(self.bytes);
        format!("data:{};base64,{}", self.mime_type, encoded)
    }
}

#[derive(Debug, Clone)]
pub struct VisionRequest<'a> {
    pub system: Option<&'a str>,
    pub prompt: &'a str,
    pub image: ImageInput<'a>,
    pub temperature: f32,
    pub max_tokens: u32,
}

// =============================================================================
// VisionModel Trait
// =============================================================================

/// A chat model that can look at an image.
///
/// `see` sends the image plus prompt and returns the raw text answer;
/// `complete` is a text-only turn, used for follow-ups such as reformatting
/// a malformed answer.
#[async_trait]
pub trait VisionModel: Send + Sync {
    fn provider(&self) -> &'static str;
    fn model(&self) -> &str;

    async fn see(&self, request: &VisionRequest<'_>) -> Result<String>;

    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_is_base64_with_mime() {
        let image = ImageInput::png(b"abc");
        assert_eq!(image.data_url(), "data:image/png;base64,YWJj");
    }
}
