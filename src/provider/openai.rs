// src/provider/openai.rs — OpenAI Chat Completions vision provider

use async_trait::async_trait;

use super::{check_status, transport_error, TokenUsage, VisionProvider, VisionRequest, VisionResponse};
use crate::infra::errors::FieldwatchError;

const DEFAULT_MODEL: &str = "gpt-4.1-mini";

pub struct OpenAiVision {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiVision {
    pub fn new(api_key: String, client: reqwest::Client) -> Self {
        Self {
            api_key,
            client,
            base_url: "https://api.openai.com/v1".into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_request_body(&self, request: &VisionRequest) -> serde_json::Value {
        let data_url = format!(
            "data:{};base64,{}",
            request.image.media_type,
            request.image.to_base64()
        );
        serde_json::json!({
            "model": request.model.as_deref().unwrap_or(DEFAULT_MODEL),
            "max_tokens": request.max_tokens,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": request.system },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": request.prompt },
                        { "type": "image_url", "image_url": { "url": data_url, "detail": "low" } }
                    ]
                }
            ]
        })
    }
}

#[async_trait]
impl VisionProvider for OpenAiVision {
    fn id(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    async fn classify(&self, request: VisionRequest) -> Result<VisionResponse, FieldwatchError> {
        let body = self.build_request_body(&request);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("openai", e))?;

        let response = check_status("openai", response).await?;

        let resp: serde_json::Value = response.json().await.map_err(|e| FieldwatchError::Provider {
            provider: "openai".into(),
            message: format!("Failed to parse response: {}", e),
            retriable: false,
        })?;

        let content = resp["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let usage = TokenUsage {
            input_tokens: resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: resp["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(VisionResponse { content, usage })
    }
}
