//! Intent/action correlation: compares a PostToolUse event against the
//! PreToolUse event it's paired with (by tool-use identifier) looking for
//! signs the tool actually did something other than what was proposed.
//!
//! Only meaningful for PostToolUse events carrying a tool-use id; the
//! caller locates the paired PreToolUse row via the trace store's
//! dedicated lookup and passes both sides in here.

use std::collections::HashMap;

use serde_json::Value;

use crate::matcher::{flatten_response, stringify};

/// Severity of a mismatch finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One mismatch finding between a pre/post tool-use pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MismatchFinding {
    pub kind: &'static str,
    pub severity: Severity,
    pub description: String,
}

const FILE_ORIENTED_TOOLS: &[&str] = &["Read", "Write", "Edit", "Glob"];

const SANDBOX_SUBSTRINGS: &[&str] = &[
    "sandbox detected",
    "virtual machine",
    "debugger",
    "analysis environment",
];

const LARGE_READ_CONTENT_CHARS: usize = 100_000;

fn field_str(input: &HashMap<String, Value>, field: &str) -> Option<String> {
    input.get(field).map(stringify)
}

/// Run the four mismatch checks, in order, returning the first that fires.
pub fn check_mismatch(
    pre_tool_name: &str,
    pre_input: &HashMap<String, Value>,
    post_tool_name: &str,
    post_input: &HashMap<String, Value>,
    post_response: &HashMap<String, Value>,
) -> Option<MismatchFinding> {
    // 1. Tool-name mismatch.
    if pre_tool_name != post_tool_name {
        return Some(MismatchFinding {
            kind: "tool_mismatch",
            severity: Severity::Critical,
            description: format!(
                "pre-tool-use recorded '{pre_tool_name}' but post-tool-use reports '{post_tool_name}'"
            ),
        });
    }

    // 2. File-path mismatch, for file-oriented tools.
    if FILE_ORIENTED_TOOLS.contains(&pre_tool_name) {
        let pre_path = field_str(pre_input, "file_path");
        let post_path = field_str(post_input, "file_path");
        if pre_path != post_path {
            return Some(MismatchFinding {
                kind: "file_mismatch",
                severity: Severity::Critical,
                description: format!(
                    "file_path changed between pre ({:?}) and post ({:?}) tool-use",
                    pre_path, post_path
                ),
            });
        }
    }

    // 3. Command mismatch, for Bash.
    if pre_tool_name == "Bash" {
        let pre_command = field_str(pre_input, "command");
        let post_command = field_str(post_input, "command");
        if pre_command != post_command {
            return Some(MismatchFinding {
                kind: "command_mismatch",
                severity: Severity::Critical,
                description: format!(
                    "command changed between pre ({:?}) and post ({:?}) tool-use",
                    pre_command, post_command
                ),
            });
        }
    }

    // 4. Suspicious output / large data access.
    let flattened = flatten_response(post_response).to_ascii_lowercase();
    for needle in SANDBOX_SUBSTRINGS {
        if flattened.contains(needle) {
            return Some(MismatchFinding {
                kind: "suspicious_output",
                severity: Severity::Warning,
                description: format!("tool response contains suspicious phrase '{needle}'"),
            });
        }
    }

    if pre_tool_name == "Read" {
        if let Some(content) = post_response.get("content").and_then(|v| v.as_str()) {
            if content.len() > LARGE_READ_CONTENT_CHARS {
                return Some(MismatchFinding {
                    kind: "large_data_access",
                    severity: Severity::Info,
                    description: format!(
                        "Read response content is {} characters, exceeding the {} character threshold",
                        content.len(),
                        LARGE_READ_CONTENT_CHARS
                    ),
                });
            }
        }
    }

    None
}
