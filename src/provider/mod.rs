// src/provider/mod.rs — Classification collaborator layer
//
// A provider takes one frame plus prompt text and returns the model's raw
// text. Parsing that text into detections happens in `analysis::parser`.

pub mod anthropic;
pub mod openai;
pub mod resolver;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::infra::errors::FieldwatchError;

/// Core trait that all vision providers implement.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    fn id(&self) -> &str;
    fn default_model(&self) -> &str;

    async fn classify(&self, request: VisionRequest) -> Result<VisionResponse, FieldwatchError>;
}

/// One encoded still frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameImage {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl FrameImage {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            media_type: "image/jpeg".into(),
        }
    }

    /// Decode a base64 payload as sent over the wire. Data-URL prefixes are accepted.
    pub fn from_base64(data: &str) -> Result<Self, FieldwatchError> {
        let (media_type, encoded) = match data.strip_prefix("data:") {
            Some(rest) => {
                let (meta, payload) = rest.split_once(',').ok_or_else(|| {
                    FieldwatchError::Protocol("data URL without payload".into())
                })?;
                let media_type = meta.trim_end_matches(";base64").to_string();
                (media_type, payload)
            }
            None => ("image/jpeg".to_string(), data),
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| FieldwatchError::Protocol(format!("invalid base64 frame: {e}")))?;
        Ok(Self { bytes, media_type })
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    /// Guess the media type from a file extension.
    pub fn media_type_for(path: &std::path::Path) -> &'static str {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            Some("webp") => "image/webp",
            Some("gif") => "image/gif",
            _ => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub model: Option<String>,
    pub system: String,
    pub prompt: String,
    pub image: FrameImage,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct VisionResponse {
    pub content: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Map a reqwest transport failure onto the provider error.
pub(crate) fn transport_error(provider: &str, e: reqwest::Error) -> FieldwatchError {
    FieldwatchError::Provider {
        provider: provider.into(),
        message: e.to_string(),
        retriable: e.is_timeout() || e.is_connect(),
    }
}

/// Shared HTTP status handling for provider responses.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, FieldwatchError> {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5);
        return Err(FieldwatchError::RateLimited {
            provider: provider.into(),
            retry_after_ms: retry_after * 1000,
        });
    }

    if !status.is_success() {
        let error_body = response.text().await.unwrap_or_default();
        return Err(FieldwatchError::Provider {
            provider: provider.into(),
            message: format!("HTTP {}: {}", status, crate::util::clip(&error_body, 300)),
            retriable: status.is_server_error(),
        });
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_from_plain_base64() {
        let frame = FrameImage::from_base64("SGVsbG8=").unwrap();
        assert_eq!(frame.bytes, b"Hello");
        assert_eq!(frame.media_type, "image/jpeg");
    }

    #[test]
    fn test_frame_from_data_url() {
        let frame = FrameImage::from_base64("data:image/png;base64,SGVsbG8=").unwrap();
        assert_eq!(frame.bytes, b"Hello");
        assert_eq!(frame.media_type, "image/png");
        assert_eq!(frame.to_base64(), "SGVsbG8=");
    }

    #[test]
    fn test_frame_invalid_base64() {
        assert!(FrameImage::from_base64("not base64!!").is_err());
    }

    #[test]
    fn test_media_type_for() {
        assert_eq!(
            FrameImage::media_type_for(std::path::Path::new("a/b.PNG")),
            "image/png"
        );
        assert_eq!(
            FrameImage::media_type_for(std::path::Path::new("frame.jpg")),
            "image/jpeg"
        );
    }

    #[test]
    fn test_token_usage_total() {
        let u = TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
        };
        assert_eq!(u.total(), 150);
    }
}
