//! Error types for the hooksy inspection kernel.
//!
//! This module defines the full error taxonomy:
//!
//! - [`GatewayError`] — top-level enum wrapping every component error
//! - [`ConfigError`] — config load/merge/validate errors
//! - [`PatternError`] — regex compile failures from the pattern matcher
//! - [`TraceStoreError`] — session/event persistence errors
//! - [`LlmError`] — provider dispatch errors (disabled, rate-limited, budget, no providers)
//! - [`TranscriptError`] — transcript parse errors
//! - [`EngineError`] — event parse / dispatch errors
//!
//! Rule evaluation and LLM dispatch failures are largely *data*, not
//! exceptions: callers receive a `Result` and decide whether to skip,
//! log, or fall back, per the propagation policy in the spec. Only event
//! parse failures abort an inspection outright.

use serde::Serialize;

/// Regex compilation failures from the pattern matcher.
///
/// The evaluator catches this and skips the offending rule; it is never
/// allowed to abort an inspection.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum PatternError {
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Config load, merge, and validation errors.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse config YAML at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("rule '{name}' has invalid decision '{decision}'")]
    InvalidDecision { name: String, decision: String },

    #[error("rule '{name}' has an invalid pattern: {message}")]
    InvalidRulePattern { name: String, message: String },
}

/// Session trace store errors.
///
/// Per the spec's error taxonomy, store I/O failures never block
/// inspection; the engine logs at debug and continues without tracing.
#[derive(Debug, thiserror::Error)]
pub enum TraceStoreError {
    #[error("failed to open trace store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("trace store query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("failed to serialize event payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// LLM provider and manager errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm analysis is disabled")]
    Disabled,

    #[error("no llm providers are configured or available")]
    NoProviders,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("daily budget exceeded")]
    BudgetExceeded,

    #[error("provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    #[error("provider '{provider}' timed out")]
    Timeout { provider: String },
}

/// Transcript read/parse errors.
#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("failed to read transcript at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed transcript line {line_no} in {path}: {message}")]
    MalformedLine {
        path: String,
        line_no: usize,
        message: String,
    },
}

/// Inspection engine errors — the only errors that abort an `inspect` call.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to parse event JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown event kind '{0}'")]
    UnknownEventKind(String),
}

/// Top-level error enum wrapping all component errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    TraceStore(#[from] TraceStoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Transcript(#[from] TranscriptError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
