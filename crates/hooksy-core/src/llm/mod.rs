//! Multi-provider LLM semantic-analysis layer.
//!
//! This is the optional last-resort inspection stage: rule and sequence
//! matching are cheap and deterministic, this is neither, so it only runs
//! when explicitly enabled and only for events that trip a configured
//! trigger. [`manager::LlmManager`] owns the fallback chain, response
//! cache, rate limiter, and daily spend budget; [`analyzer::SemanticAnalyzer`]
//! decides *whether* to call it and how to fold the verdict into a decision.

pub mod analyzer;
pub mod manager;
pub mod prompt;
pub mod provider;
pub mod providers;

use serde::{Deserialize, Serialize};

use crate::config::RuleDecision;
use crate::event::HookEventKind;

/// One configured provider entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    10
}

/// The closed set of semantic-analysis flavors the analyzer can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisKind {
    Contextual,
    IntentAction,
    Transcript,
    Stop,
    Custom,
}

impl AnalysisKind {
    /// The analysis kind an event maps to absent any trigger override.
    pub fn for_event(kind: HookEventKind) -> Self {
        match kind {
            HookEventKind::PreToolUse => Self::Contextual,
            HookEventKind::PostToolUse => Self::IntentAction,
            HookEventKind::Stop => Self::Stop,
            _ => Self::Contextual,
        }
    }
}

/// Dispatch mode for a triggered analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    Sync,
    Async,
    /// Sync for pre-events (`Contextual`), async everywhere else.
    Hybrid,
}

impl AnalysisMode {
    /// Resolve a possibly-hybrid mode to the concrete sync/async choice for
    /// the analysis kind actually being run.
    pub fn resolve(self, kind: AnalysisKind) -> ConcreteMode {
        match self {
            Self::Sync => ConcreteMode::Sync,
            Self::Async => ConcreteMode::Async,
            Self::Hybrid => {
                if matches!(kind, AnalysisKind::Contextual) {
                    ConcreteMode::Sync
                } else {
                    ConcreteMode::Async
                }
            }
        }
    }
}

/// The concrete dispatch choice after resolving a (possibly hybrid) mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcreteMode {
    Sync,
    Async,
}

/// A trigger condition: a tool call is routed to the semantic analyzer when
/// any one of its conditions is met. `always` short-circuits the rest;
/// `tool_names` is a list of regexes matched against the tool name;
/// `no_rule_match` fires when no configured rule matched the call;
/// `rule_decision` is a whitelist of rule decisions that arm the trigger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub always: bool,
    #[serde(default)]
    pub tool_names: Vec<String>,
    #[serde(default)]
    pub no_rule_match: bool,
    #[serde(default)]
    pub rule_decision: Vec<RuleDecision>,
    /// Analysis kind this trigger requests; defaults to the event's mapped
    /// kind (via `AnalysisKind::for_event`) when unset.
    #[serde(default)]
    pub kind: Option<AnalysisKind>,
    /// Dispatch mode override for this trigger; falls back to the global
    /// `LlmConfig::mode` when unset.
    #[serde(default)]
    pub mode: Option<AnalysisMode>,
}

/// Result of resolving every configured trigger against one event: the
/// union of analysis kinds requested and the effective dispatch mode.
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub kinds: Vec<AnalysisKind>,
    pub mode: AnalysisMode,
}

/// LLM layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    #[serde(default)]
    pub rate_limit_per_minute: u32,
    /// Token bucket capacity; falls back to `rate_limit_per_minute` when zero.
    #[serde(default)]
    pub burst: u32,
    #[serde(default)]
    pub daily_budget_usd: f64,
    #[serde(default)]
    pub cross_validate: bool,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Global dispatch mode, overridden per-trigger by `TriggerConfig::mode`.
    #[serde(default)]
    pub mode: AnalysisMode,
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_min_confidence() -> f64 {
    0.7
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            providers: Vec::new(),
            triggers: Vec::new(),
            cache_ttl_seconds: default_cache_ttl(),
            rate_limit_per_minute: 0,
            burst: 0,
            daily_budget_usd: 0.0,
            cross_validate: false,
            min_confidence: default_min_confidence(),
            mode: AnalysisMode::default(),
        }
    }
}

impl LlmConfig {
    fn is_zero(&self) -> bool {
        !self.enabled
            && self.providers.is_empty()
            && self.triggers.is_empty()
            && self.rate_limit_per_minute == 0
            && self.burst == 0
            && self.daily_budget_usd == 0.0
            && !self.cross_validate
    }

    /// Merge semantics mirror the rest of config.rs: this config overlays
    /// `base` only if it isn't entirely at its zero value, in which case
    /// `base` passes through untouched.
    pub fn merged_over(&self, base: &LlmConfig) -> LlmConfig {
        if self.is_zero() {
            base.clone()
        } else {
            self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_override_leaves_base_untouched() {
        let base = LlmConfig {
            enabled: true,
            providers: vec![ProviderConfig {
                name: "p1".into(),
                kind: "anthropic".into(),
                api_key_env: "ANTHROPIC_API_KEY".into(),
                model: "claude".into(),
                base_url: String::new(),
                timeout_seconds: 10,
            }],
            ..LlmConfig::default()
        };
        let overlay = LlmConfig::default();
        let merged = overlay.merged_over(&base);
        assert_eq!(merged.providers.len(), 1);
    }

    #[test]
    fn non_zero_override_replaces_base_wholesale() {
        let base = LlmConfig {
            enabled: true,
            ..LlmConfig::default()
        };
        let overlay = LlmConfig {
            enabled: true,
            cross_validate: true,
            ..LlmConfig::default()
        };
        let merged = overlay.merged_over(&base);
        assert!(merged.cross_validate);
    }
}
