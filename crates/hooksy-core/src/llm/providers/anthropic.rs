//! Anthropic Messages API backend.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::errors::LlmError;
use crate::llm::provider::{AnalysisRequest, AnalysisResponse, LlmProvider};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn kind(&self) -> &str {
        "anthropic"
    }

    fn available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AnalysisResponse, LlmError>> + Send + '_>> {
        Box::pin(async move {
            let body = json!({
                "model": self.model,
                "max_tokens": request.max_tokens,
                "system": request.system_prompt,
                "messages": [{"role": "user", "content": request.user_prompt}],
            });

            let response = self
                .client
                .post(format!("{}/v1/messages", self.base_url))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        LlmError::Timeout {
                            provider: "anthropic".to_string(),
                        }
                    } else {
                        LlmError::Provider {
                            provider: "anthropic".to_string(),
                            message: e.to_string(),
                        }
                    }
                })?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(LlmError::RateLimited);
            }
            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(LlmError::Provider {
                    provider: "anthropic".to_string(),
                    message: format!("HTTP {status}: {text}"),
                });
            }

            let parsed: MessagesResponse = response.json().await.map_err(|e| LlmError::Provider {
                provider: "anthropic".to_string(),
                message: e.to_string(),
            })?;

            let text = parsed
                .content
                .into_iter()
                .map(|b| b.text)
                .collect::<Vec<_>>()
                .join("\n");

            Ok(AnalysisResponse {
                text,
                provider: "anthropic".to_string(),
                model: self.model.clone(),
                confidence: 0.8,
                cached: false,
            })
        })
    }
}
