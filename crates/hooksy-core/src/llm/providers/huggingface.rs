//! Hugging Face Inference API backend.
//!
//! Uses the text-generation-inference chat endpoint; treated as the
//! "local/self-hosted model" option since it's the path most users point at
//! a locally served model rather than a hosted frontier one.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::errors::LlmError;
use crate::llm::provider::{AnalysisRequest, AnalysisResponse, LlmProvider};

const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";

pub struct HuggingFaceProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl HuggingFaceProvider {
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
struct GeneratedText {
    generated_text: String,
}

impl LlmProvider for HuggingFaceProvider {
    fn name(&self) -> &str {
        "huggingface"
    }

    fn kind(&self) -> &str {
        "huggingface"
    }

    fn available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AnalysisResponse, LlmError>> + Send + '_>> {
        Box::pin(async move {
            let prompt = format!("{}\n\n{}", request.system_prompt, request.user_prompt);
            let body = json!({
                "inputs": prompt,
                "parameters": {"max_new_tokens": request.max_tokens},
            });

            let response = self
                .client
                .post(format!("{}/models/{}", self.base_url, self.model))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        LlmError::Timeout {
                            provider: "huggingface".to_string(),
                        }
                    } else {
                        LlmError::Provider {
                            provider: "huggingface".to_string(),
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
                    provider: "huggingface".to_string(),
                    message: format!("HTTP {status}: {text}"),
                });
            }

            let parsed: Vec<GeneratedText> = response.json().await.map_err(|e| LlmError::Provider {
                provider: "huggingface".to_string(),
                message: e.to_string(),
            })?;

            let text = parsed.into_iter().next().map(|g| g.generated_text).unwrap_or_default();

            Ok(AnalysisResponse {
                text,
                provider: "huggingface".to_string(),
                model: self.model.clone(),
                confidence: 0.7,
                cached: false,
            })
        })
    }
}
