//! Pattern matcher: compiled-regex cache plus field/tool-name/response matching.
//!
//! The regex cache is process-wide but content-addressed by source text —
//! a memoization, not a state machine: no lifecycle, just lookup-or-compute.

use std::collections::HashMap;
use std::sync::Mutex;

use regex::Regex;
use std::sync::Arc;

use crate::config::FieldPattern;
use crate::errors::PatternError;

/// Compiled-regex cache, keyed by pattern source text.
pub struct PatternMatcher {
    cache: Mutex<HashMap<String, Arc<Regex>>>,
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Compile (or fetch from cache) the regex for `pattern`.
    pub fn compile(&self, pattern: &str) -> Result<Arc<Regex>, PatternError> {
        let mut cache = self.cache.lock().unwrap();
        if let Some(re) = cache.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern).map_err(|e| PatternError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        let re = Arc::new(re);
        cache.insert(pattern.to_string(), re.clone());
        Ok(re)
    }

    /// Match a tool name against a pattern. An empty pattern matches any tool.
    pub fn match_tool_name(&self, pattern: &str, tool_name: &str) -> Result<bool, PatternError> {
        if pattern.is_empty() {
            return Ok(true);
        }
        let re = self.compile(pattern)?;
        Ok(re.is_match(tool_name))
    }

    /// Match a pattern list against a string; returns the first matching
    /// entry (pattern, message, matched value) in list order.
    pub fn match_pattern_list<'a>(
        &self,
        patterns: &'a [FieldPattern],
        value: &str,
    ) -> Result<Option<(&'a FieldPattern, String)>, PatternError> {
        for fp in patterns {
            let re = self.compile(&fp.pattern)?;
            if let Some(m) = re.find(value) {
                return Ok(Some((fp, m.as_str().to_string())));
            }
        }
        Ok(None)
    }

    /// Match a `field -> patterns` spec against a tool input mapping.
    /// Iteration order over fields isn't meaningful; within a field the
    /// pattern list order is preserved. Returns the first match found.
    pub fn match_tool_input(
        &self,
        spec: &HashMap<String, Vec<FieldPattern>>,
        input: &HashMap<String, serde_json::Value>,
    ) -> Result<Option<MatchedInput>, PatternError> {
        for (field, patterns) in spec {
            let Some(value) = input.get(field) else {
                continue;
            };
            let value_str = stringify(value);
            if let Some((fp, matched)) = self.match_pattern_list(patterns, &value_str)? {
                return Ok(Some(MatchedInput {
                    field: field.clone(),
                    message: fp.message.clone(),
                    matched_value: matched,
                }));
            }
        }
        Ok(None)
    }

    /// Flatten a tool response mapping to a `key: value\n`-joined string and
    /// run a pattern list against it.
    pub fn match_tool_response(
        &self,
        patterns: &[FieldPattern],
        response: &HashMap<String, serde_json::Value>,
    ) -> Result<Option<(FieldPattern, String)>, PatternError> {
        let flattened = flatten_response(response);
        Ok(self
            .match_pattern_list(patterns, &flattened)?
            .map(|(fp, m)| (fp.clone(), m)))
    }
}

/// Result of a successful `match_tool_input` call.
#[derive(Debug, Clone)]
pub struct MatchedInput {
    pub field: String,
    pub message: String,
    pub matched_value: String,
}

/// Stringify a JSON value with a default conversion: strings pass through
/// unquoted, everything else uses its JSON text form.
pub fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Flatten a response mapping to `key: value\n` lines, matching §4.1.
pub fn flatten_response(response: &HashMap<String, serde_json::Value>) -> String {
    let mut keys: Vec<&String> = response.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|k| format!("{}: {}", k, stringify(&response[k])))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_tool_name_pattern_matches_any_tool() {
        let matcher = PatternMatcher::new();
        assert!(matcher.match_tool_name("", "Bash").unwrap());
        assert!(matcher.match_tool_name("", "Read").unwrap());
    }

    #[test]
    fn tool_name_pattern_compiles_and_matches() {
        let matcher = PatternMatcher::new();
        assert!(matcher.match_tool_name("^Bash$", "Bash").unwrap());
        assert!(!matcher.match_tool_name("^Bash$", "Read").unwrap());
    }

    #[test]
    fn invalid_pattern_is_an_error_not_a_panic() {
        let matcher = PatternMatcher::new();
        let err = matcher.match_tool_name("(unclosed", "Bash").unwrap_err();
        assert!(matches!(err, PatternError::InvalidPattern { .. }));
    }

    #[test]
    fn regex_cache_reuses_compiled_pattern() {
        let matcher = PatternMatcher::new();
        let a = matcher.compile("^Bash$").unwrap();
        let b = matcher.compile("^Bash$").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn match_tool_input_finds_first_match_in_field_list_order() {
        let matcher = PatternMatcher::new();
        let mut spec = HashMap::new();
        spec.insert(
            "command".to_string(),
            vec![
                FieldPattern {
                    pattern: "rm\\s+-rf".to_string(),
                    message: "dangerous delete".to_string(),
                },
                FieldPattern {
                    pattern: "curl".to_string(),
                    message: "network call".to_string(),
                },
            ],
        );
        let mut input = HashMap::new();
        input.insert("command".to_string(), json!("rm -rf /tmp"));
        let matched = matcher.match_tool_input(&spec, &input).unwrap().unwrap();
        assert_eq!(matched.message, "dangerous delete");
    }

    #[test]
    fn flatten_response_joins_key_value_lines() {
        let mut response = HashMap::new();
        response.insert("output".to_string(), json!("hello"));
        let flattened = flatten_response(&response);
        assert_eq!(flattened, "output: hello");
    }
}
