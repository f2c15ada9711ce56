//! The `LlmProvider` trait: one async `analyze` call per backend.
//!
//! Explicit `Pin<Box<dyn Future>>` rather than `#[async_trait]`, matching the
//! kernel's module-contract traits — no macro magic, the signature is the
//! signature. `Send + Sync` on the trait definition so errors surface at
//! the impl site, not at every call site.

use std::future::Future;
use std::pin::Pin;

use crate::errors::LlmError;

/// A semantic analysis request sent to an LLM provider.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
}

/// The provider's verdict on a request.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResponse {
    /// Raw text returned by the model — the analyzer parses this for a
    /// decision keyword and rationale; providers don't interpret it.
    pub text: String,
    pub provider: String,
    pub model: String,
    /// Provider's self-reported confidence in `[0.0, 1.0]`. Chat-completion
    /// style APIs don't return this, so HTTP backends report a fixed
    /// default; it exists so cross-validation can weigh a low-confidence
    /// verdict against the rule engine's own decision instead of trusting
    /// every answer equally.
    pub confidence: f64,
    /// Set by the manager when this response was served from the cache
    /// rather than a fresh provider call. Always `false` coming out of a
    /// provider's own `analyze`.
    pub cached: bool,
}

/// Interface for an LLM backend capable of semantic risk analysis.
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (`"anthropic"`, `"openai"`, `"huggingface"`, ...).
    fn name(&self) -> &str;

    /// Backend family this provider belongs to (`"anthropic"`, `"openai"`,
    /// `"huggingface"`, ...). Distinct from `name()`, which is a free-form
    /// label a deployment can rename; `kind()` is what a caller switches on.
    fn kind(&self) -> &str {
        "unknown"
    }

    /// Whether this provider is currently usable (credentials present,
    /// last known reachable). Providers that can't cheaply check
    /// reachability just report credential presence.
    fn available(&self) -> bool {
        true
    }

    /// Rough USD cost estimate for running `request` against this backend,
    /// used for the manager's pre-call budget check. Providers that don't
    /// track per-token pricing return a fixed nominal estimate.
    fn estimate_cost(&self, _request: &AnalysisRequest) -> f64 {
        0.01
    }

    /// Run one analysis request against the backend.
    fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AnalysisResponse, LlmError>> + Send + '_>>;

    /// Release any held resources (connection pools, sessions). Most HTTP
    /// backends have nothing to do here; it exists for providers that do.
    fn close(&self) {}
}
