//! Test fakes for this crate's module contracts.
//!
//! Concrete, predictable implementations rather than a mock framework — the
//! same choice the kernel's own `testing` module makes, for the same
//! reason: a fake is something a test author (or an AI agent reading the
//! test) can open and read, a generated mock is not.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use crate::errors::LlmError;
use crate::llm::provider::{AnalysisRequest, AnalysisResponse, LlmProvider};

/// A fake LLM provider that returns pre-configured responses in order, or
/// a fixed error, and records every request it receives.
pub struct FakeLlmProvider {
    provider_name: String,
    responses: Mutex<Vec<Result<AnalysisResponse, LlmError>>>,
    calls: Mutex<Vec<AnalysisRequest>>,
}

impl FakeLlmProvider {
    /// A provider that always answers `ALLOW: <reason>`.
    pub fn allowing(name: &str, reason: &str) -> Self {
        Self::with_text(name, &format!("ALLOW: {reason}"))
    }

    /// A provider that always answers `DENY: <reason>`.
    pub fn denying(name: &str, reason: &str) -> Self {
        Self::with_text(name, &format!("DENY: {reason}"))
    }

    /// A provider that always returns the given raw response text.
    pub fn with_text(name: &str, text: &str) -> Self {
        Self {
            provider_name: name.to_string(),
            responses: Mutex::new(vec![Ok(AnalysisResponse {
                text: text.to_string(),
                provider: name.to_string(),
                model: "fake".to_string(),
                confidence: 0.9,
                cached: false,
            })]),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A provider that always fails with the given error.
    pub fn failing(name: &str, error: LlmError) -> Self {
        Self {
            provider_name: name.to_string(),
            responses: Mutex::new(vec![Err(error)]),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A provider that consumes pre-configured results in order, one per call.
    pub fn with_sequence(name: &str, responses: Vec<Result<AnalysisResponse, LlmError>>) -> Self {
        Self {
            provider_name: name.to_string(),
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded_calls(&self) -> Vec<AnalysisRequest> {
        self.calls.lock().unwrap().clone()
    }
}

impl LlmProvider for FakeLlmProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AnalysisResponse, LlmError>> + Send + '_>> {
        self.calls.lock().unwrap().push(request);
        let result = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(AnalysisResponse {
                    text: "ALLOW: default fake response".to_string(),
                    provider: self.provider_name.clone(),
                    model: "fake".to_string(),
                    confidence: 0.9,
                    cached: false,
                })
            } else {
                responses.remove(0)
            }
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            system_prompt: "sys".to_string(),
            user_prompt: "user".to_string(),
            max_tokens: 64,
        }
    }

    #[tokio::test]
    async fn fake_llm_provider_allowing_returns_allow_keyword() {
        let provider = FakeLlmProvider::allowing("fake", "looks fine");
        let response = provider.analyze(request()).await.unwrap();
        assert!(response.text.starts_with("ALLOW"));
    }

    #[tokio::test]
    async fn fake_llm_provider_records_calls() {
        let provider = FakeLlmProvider::allowing("fake", "ok");
        provider.analyze(request()).await.unwrap();
        provider.analyze(request()).await.unwrap();
        assert_eq!(provider.recorded_calls().len(), 2);
    }

    #[tokio::test]
    async fn fake_llm_provider_failing_returns_configured_error() {
        let provider = FakeLlmProvider::failing("fake", LlmError::RateLimited);
        let err = provider.analyze(request()).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited));
    }

    #[tokio::test]
    async fn fake_llm_provider_with_sequence_consumes_in_order() {
        let provider = FakeLlmProvider::with_sequence(
            "fake",
            vec![
                Err(LlmError::Timeout {
                    provider: "fake".to_string(),
                }),
                Ok(AnalysisResponse {
                    text: "ALLOW: second try".to_string(),
                    provider: "fake".to_string(),
                    model: "fake".to_string(),
                    confidence: 0.9,
                    cached: false,
                }),
            ],
        );
        assert!(provider.analyze(request()).await.is_err());
        let response = provider.analyze(request()).await.unwrap();
        assert_eq!(response.text, "ALLOW: second try");
    }
}
