//! OpenAI-compatible chat completions backend.
//!
//! Targets the `/v1/chat/completions` shape shared by OpenAI itself and by
//! the many self-hosted gateways (vLLM, LiteLLM, Ollama's OpenAI shim) that
//! mimic it, so one client covers "OpenAI" and "OpenAI-compatible" both.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::errors::LlmError;
use crate::llm::provider::{AnalysisRequest, AnalysisResponse, LlmProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
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
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn kind(&self) -> &str {
        "openai"
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
                "messages": [
                    {"role": "system", "content": request.system_prompt},
                    {"role": "user", "content": request.user_prompt},
                ],
            });

            let response = self
                .client
                .post(format!("{}/v1/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        LlmError::Timeout {
                            provider: "openai".to_string(),
                        }
                    } else {
                        LlmError::Provider {
                            provider: "openai".to_string(),
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
                    provider: "openai".to_string(),
                    message: format!("HTTP {status}: {text}"),
                });
            }

            let parsed: ChatCompletionResponse = response.json().await.map_err(|e| LlmError::Provider {
                provider: "openai".to_string(),
                message: e.to_string(),
            })?;

            let text = parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .unwrap_or_default();

            Ok(AnalysisResponse {
                text,
                provider: "openai".to_string(),
                model: self.model.clone(),
                confidence: 0.8,
                cached: false,
            })
        })
    }
}
