//! Hook event model and decision output shape.
//!
//! Events arrive as JSON on standard input with a `hook_event_name`
//! discriminator. Because the field set differs per kind (and the
//! discriminator key itself isn't a clean `#[serde(tag = ...)]` target —
//! some kinds share fields, others don't carry the common envelope at
//! all in the same shape) the event is deserialized in two steps: first
//! the raw envelope is read to recover `hook_event_name`, then the
//! concrete kind's extra fields are pulled from the same JSON object.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EngineError;

/// The closed set of hook event kinds this gateway understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum HookEventKind {
    PreToolUse,
    PostToolUse,
    UserPromptSubmit,
    Stop,
    SubagentStop,
    Notification,
    PreCompact,
    SessionStart,
    SessionEnd,
    PermissionRequest,
}

impl HookEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::Stop => "Stop",
            Self::SubagentStop => "SubagentStop",
            Self::Notification => "Notification",
            Self::PreCompact => "PreCompact",
            Self::SessionStart => "SessionStart",
            Self::SessionEnd => "SessionEnd",
            Self::PermissionRequest => "PermissionRequest",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        Ok(match s {
            "PreToolUse" => Self::PreToolUse,
            "PostToolUse" => Self::PostToolUse,
            "UserPromptSubmit" => Self::UserPromptSubmit,
            "Stop" => Self::Stop,
            "SubagentStop" => Self::SubagentStop,
            "Notification" => Self::Notification,
            "PreCompact" => Self::PreCompact,
            "SessionStart" => Self::SessionStart,
            "SessionEnd" => Self::SessionEnd,
            "PermissionRequest" => Self::PermissionRequest,
            other => return Err(EngineError::UnknownEventKind(other.to_string())),
        })
    }
}

/// Fields common to every hook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonFields {
    pub session_id: String,
    #[serde(default)]
    pub transcript_path: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub permission_mode: String,
}

/// A fully parsed hook event: the common envelope plus kind-specific payload.
#[derive(Debug, Clone)]
pub struct HookEvent {
    pub kind: HookEventKind,
    pub common: CommonFields,
    /// Tool name for Pre/PostToolUse.
    pub tool_name: Option<String>,
    /// Raw tool input mapping for PreToolUse/PostToolUse.
    pub tool_input: Option<HashMap<String, Value>>,
    /// Tool-use correlation identifier for Pre/PostToolUse.
    pub tool_use_id: Option<String>,
    /// Tool response mapping for PostToolUse.
    pub tool_response: Option<HashMap<String, Value>>,
    /// Prompt text for UserPromptSubmit.
    pub prompt: Option<String>,
    /// Whether a stop hook is already active, for Stop events.
    pub stop_hook_active: Option<bool>,
}

impl HookEvent {
    /// Parse a hook event from raw JSON bytes.
    ///
    /// Fails with [`EngineError::Parse`] on malformed JSON and
    /// [`EngineError::UnknownEventKind`] if the `--event` switch (passed
    /// in separately by the caller) names a kind we don't recognise.
    pub fn parse(bytes: &[u8], kind: HookEventKind) -> Result<Self, EngineError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let common: CommonFields = serde_json::from_value(value.clone())?;

        let obj = value.as_object();
        let get_str = |key: &str| -> Option<String> {
            obj.and_then(|o| o.get(key))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };
        let get_map = |key: &str| -> Option<HashMap<String, Value>> {
            obj.and_then(|o| o.get(key))
                .and_then(|v| v.as_object())
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        };
        let get_bool = |key: &str| -> Option<bool> {
            obj.and_then(|o| o.get(key)).and_then(|v| v.as_bool())
        };

        Ok(Self {
            kind,
            common,
            tool_name: get_str("tool_name"),
            tool_input: get_map("tool_input"),
            tool_use_id: get_str("tool_use_id"),
            tool_response: get_map("tool_response"),
            prompt: get_str("prompt"),
            stop_hook_active: get_bool("stop_hook_active"),
        })
    }
}

/// Permission decision for a matched or default rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Allow,
    Deny,
    Ask,
}

impl Permission {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            "ask" => Some(Self::Ask),
            _ => None,
        }
    }
}

/// The event-specific sub-structure of a decision output.
#[derive(Debug, Clone, Serialize)]
pub struct HookSpecificOutput {
    #[serde(rename = "hookEventName")]
    pub hook_event_name: String,
    #[serde(rename = "permissionDecision")]
    pub permission_decision: Permission,
    #[serde(rename = "permissionDecisionReason")]
    pub permission_decision_reason: String,
    #[serde(rename = "updatedInput", skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<HashMap<String, Value>>,
    #[serde(rename = "additionalContext", skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

/// The full decision output written to standard output as one JSON document.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayOutput {
    #[serde(rename = "continue")]
    pub cont: bool,
    #[serde(rename = "stopReason", skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(rename = "systemMessage", skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(rename = "hookSpecificOutput", skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

impl GatewayOutput {
    /// A stop/subagent-stop/unsupported-event output carries no sub-structure.
    pub fn continue_only() -> Self {
        Self {
            cont: true,
            stop_reason: None,
            system_message: None,
            hook_specific_output: None,
        }
    }

    pub fn permission(
        event_name: &str,
        decision: Permission,
        reason: impl Into<String>,
        updated_input: Option<HashMap<String, Value>>,
    ) -> Self {
        Self {
            cont: true,
            stop_reason: None,
            system_message: None,
            hook_specific_output: Some(HookSpecificOutput {
                hook_event_name: event_name.to_string(),
                permission_decision: decision,
                permission_decision_reason: reason.into(),
                updated_input,
                additional_context: None,
            }),
        }
    }

    pub fn block(stop_reason: impl Into<String>, system_message: impl Into<String>) -> Self {
        Self {
            cont: false,
            stop_reason: Some(stop_reason.into()),
            system_message: Some(system_message.into()),
            hook_specific_output: None,
        }
    }
}
