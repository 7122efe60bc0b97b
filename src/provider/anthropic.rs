// src/provider/anthropic.rs — Anthropic Messages API vision provider

use async_trait::async_trait;

use super::{check_status, transport_error, TokenUsage, VisionProvider, VisionRequest, VisionResponse};
use crate::infra::errors::FieldwatchError;

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

pub struct AnthropicVision {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicVision {
    pub fn new(api_key: String, client: reqwest::Client) -> Self {
        Self {
            api_key,
            client,
            base_url: "https://api.anthropic.com/v1".into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_request_body(&self, request: &VisionRequest) -> serde_json::Value {
        serde_json::json!({
            "model": request.model.as_deref().unwrap_or(DEFAULT_MODEL),
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": request.image.media_type,
                            "data": request.image.to_base64(),
                        }
                    },
                    { "type": "text", "text": request.prompt }
                ]
            }]
        })
    }
}

#[async_trait]
impl VisionProvider for AnthropicVision {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    async fn classify(&self, request: VisionRequest) -> Result<VisionResponse, FieldwatchError> {
        let body = self.build_request_body(&request);

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("anthropic", e))?;

        let response = check_status("anthropic", response).await?;

        let resp: serde_json::Value = response.json().await.map_err(|e| FieldwatchError::Provider {
            provider: "anthropic".into(),
            message: format!("Failed to parse response: {}", e),
            retriable: false,
        })?;

        let content = resp["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|c| c["type"] == "text")
                    .filter_map(|c| c["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage = TokenUsage {
            input_tokens: resp["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: resp["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(VisionResponse { content, usage })
    }
}
