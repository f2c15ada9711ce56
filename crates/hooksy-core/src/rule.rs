//! Rule evaluator: per-event-kind traversal, allowlist precedence, first match.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::config::{Rule, RuleDecision};
use crate::matcher::PatternMatcher;

/// Outcome of evaluating a rule list (or the allowlist) against one event.
#[derive(Debug, Clone)]
pub struct Matched<'a> {
    pub rule: &'a Rule,
    pub decision: RuleDecision,
    pub message: String,
}

/// Evaluates rules for the three core event kinds the spec names:
/// pre-tool-use, post-tool-use, user-prompt-submit.
pub struct RuleEvaluator<'a> {
    matcher: &'a PatternMatcher,
}

impl<'a> RuleEvaluator<'a> {
    pub fn new(matcher: &'a PatternMatcher) -> Self {
        Self { matcher }
    }

    /// Evaluate the allowlist: the first enabled, matching rule short-circuits
    /// to `allow` with message `"Allowlisted: <name>"`.
    pub fn evaluate_allowlist<'r>(
        &self,
        allowlist: &'r [Rule],
        tool_name: &str,
        input: &HashMap<String, Value>,
        response: Option<&HashMap<String, Value>>,
        prompt: Option<&str>,
    ) -> Option<Matched<'r>> {
        for rule in allowlist {
            if !rule.enabled {
                continue;
            }
            if self.rule_matches(rule, tool_name, input, response, prompt).unwrap_or(false) {
                return Some(Matched {
                    rule,
                    decision: RuleDecision::Allow,
                    message: format!("Allowlisted: {}", rule.name),
                });
            }
        }
        None
    }

    /// Evaluate the pre-tool-use path: allowlist first, then the main rule list.
    pub fn evaluate_pre_tool_use<'r>(
        &self,
        rules: &'r [Rule],
        allowlist: &'r [Rule],
        tool_name: &str,
        input: &HashMap<String, Value>,
    ) -> Option<Matched<'r>> {
        if let Some(m) = self.evaluate_allowlist(allowlist, tool_name, input, None, None) {
            return Some(m);
        }
        self.evaluate_rules(rules, tool_name, input, None, None)
    }

    /// Evaluate the post-tool-use path: allowlist first, then the main rule list.
    pub fn evaluate_post_tool_use<'r>(
        &self,
        rules: &'r [Rule],
        allowlist: &'r [Rule],
        tool_name: &str,
        input: &HashMap<String, Value>,
        response: &HashMap<String, Value>,
    ) -> Option<Matched<'r>> {
        if let Some(m) = self.evaluate_allowlist(allowlist, tool_name, input, Some(response), None) {
            return Some(m);
        }
        self.evaluate_rules(rules, tool_name, input, Some(response), None)
    }

    /// Evaluate the user-prompt-submit path: allowlist first, then the main rule list.
    pub fn evaluate_user_prompt_submit<'r>(
        &self,
        rules: &'r [Rule],
        allowlist: &'r [Rule],
        prompt: &str,
    ) -> Option<Matched<'r>> {
        let empty_input = HashMap::new();
        if let Some(m) = self.evaluate_allowlist(allowlist, "", &empty_input, None, Some(prompt)) {
            return Some(m);
        }
        self.evaluate_rules(rules, "", &empty_input, None, Some(prompt))
    }

    fn evaluate_rules<'r>(
        &self,
        rules: &'r [Rule],
        tool_name: &str,
        input: &HashMap<String, Value>,
        response: Option<&HashMap<String, Value>>,
        prompt: Option<&str>,
    ) -> Option<Matched<'r>> {
        for rule in rules {
            if !rule.enabled {
                continue;
            }
            match self.rule_matches(rule, tool_name, input, response, prompt) {
                Ok(Some(message)) => {
                    return Some(Matched {
                        rule,
                        decision: rule.decision,
                        message,
                    });
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(rule = %rule.name, error = %e, "skipping rule with invalid pattern");
                    continue;
                }
            }
        }
        None
    }

    /// Returns `Ok(Some(message))` when the rule matches, `Ok(None)` when it
    /// doesn't, `Err` when a pattern failed to compile (caller skips the rule).
    fn rule_matches(
        &self,
        rule: &Rule,
        tool_name: &str,
        input: &HashMap<String, Value>,
        response: Option<&HashMap<String, Value>>,
        prompt: Option<&str>,
    ) -> Result<bool, crate::errors::PatternError> {
        Ok(self.rule_match_message(rule, tool_name, input, response, prompt)?.is_some())
    }

    fn rule_match_message(
        &self,
        rule: &Rule,
        tool_name: &str,
        input: &HashMap<String, Value>,
        response: Option<&HashMap<String, Value>>,
        prompt: Option<&str>,
    ) -> Result<Option<String>, crate::errors::PatternError> {
        let conditions = &rule.conditions;

        // Tool-name pattern evaluates first; if present and it fails, no match.
        if !conditions.tool_name.is_empty()
            && !self.matcher.match_tool_name(&conditions.tool_name, tool_name)?
        {
            return Ok(None);
        }

        let has_other_conditions = !conditions.input.is_empty()
            || !conditions.response.is_empty()
            || !conditions.prompt.is_empty();

        if !conditions.tool_name.is_empty() && !has_other_conditions {
            return Ok(Some("Tool name matched".to_string()));
        }

        if !conditions.input.is_empty() {
            if let Some(matched) = self.matcher.match_tool_input(&conditions.input, input)? {
                let message = if matched.message.is_empty() {
                    format!("Input field '{}' matched", matched.field)
                } else {
                    matched.message
                };
                return Ok(Some(message));
            }
        }

        if !conditions.response.is_empty() {
            if let Some(response) = response {
                if let Some((fp, _)) = self.matcher.match_tool_response(&conditions.response, response)? {
                    let message = if fp.message.is_empty() {
                        "Response matched".to_string()
                    } else {
                        fp.message
                    };
                    return Ok(Some(message));
                }
            }
        }

        if !conditions.prompt.is_empty() {
            if let Some(prompt) = prompt {
                if let Some((fp, _)) = self.matcher.match_pattern_list(&conditions.prompt, prompt)? {
                    let message = if fp.message.is_empty() {
                        "Prompt matched".to_string()
                    } else {
                        fp.message.clone()
                    };
                    return Ok(Some(message));
                }
            }
        }

        // A tool-name-only rule with no other conditions already returned above.
        // If the rule has a tool-name pattern plus other conditions, none of
        // which matched, it does not match at all.
        if !conditions.tool_name.is_empty() {
            return Ok(None);
        }

        // A rule with no tool-name pattern and no conditions that matched
        // above does not match (conditions are empty entirely, or all failed).
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldPattern, RuleAction, RuleConditions};
    use serde_json::json;

    fn make_rule(name: &str, tool_name: &str, priority: i32, decision: RuleDecision) -> Rule {
        Rule {
            name: name.to_string(),
            description: String::new(),
            enabled: true,
            priority,
            conditions: RuleConditions {
                tool_name: tool_name.to_string(),
                ..Default::default()
            },
            decision,
            action: RuleAction::None,
            modifications: HashMap::new(),
            system_message: None,
        }
    }

    #[test]
    fn tool_name_only_rule_matches_with_default_message() {
        let matcher = PatternMatcher::new();
        let evaluator = RuleEvaluator::new(&matcher);
        let rules = vec![make_rule("block-bash", "^Bash$", 10, RuleDecision::Deny)];
        let input = HashMap::new();
        let matched = evaluator
            .evaluate_pre_tool_use(&rules, &[], "Bash", &input)
            .unwrap();
        assert_eq!(matched.rule.name, "block-bash");
        assert_eq!(matched.message, "Tool name matched");
    }

    #[test]
    fn allowlist_short_circuits_before_main_rules() {
        let matcher = PatternMatcher::new();
        let evaluator = RuleEvaluator::new(&matcher);
        let rules = vec![make_rule("block-bash", "^Bash$", 10, RuleDecision::Deny)];
        let allowlist = vec![make_rule("trust-bash", "^Bash$", 0, RuleDecision::Deny)];
        let input = HashMap::new();
        let matched = evaluator
            .evaluate_pre_tool_use(&rules, &allowlist, "Bash", &input)
            .unwrap();
        assert_eq!(matched.decision, RuleDecision::Allow);
        assert_eq!(matched.message, "Allowlisted: trust-bash");
    }

    #[test]
    fn input_field_pattern_match() {
        let matcher = PatternMatcher::new();
        let evaluator = RuleEvaluator::new(&matcher);
        let mut rule = make_rule("block-rm-rf", "^Bash$", 10, RuleDecision::Deny);
        rule.conditions.input.insert(
            "command".to_string(),
            vec![FieldPattern {
                pattern: r"rm\s+-rf\s+/".to_string(),
                message: String::new(),
            }],
        );
        let rules = vec![rule];
        let mut input = HashMap::new();
        input.insert("command".to_string(), json!("rm -rf /"));
        let matched = evaluator
            .evaluate_pre_tool_use(&rules, &[], "Bash", &input)
            .unwrap();
        assert_eq!(matched.rule.name, "block-rm-rf");
    }

    #[test]
    fn disabled_rule_never_matches() {
        let matcher = PatternMatcher::new();
        let evaluator = RuleEvaluator::new(&matcher);
        let mut rule = make_rule("block-bash", "^Bash$", 10, RuleDecision::Deny);
        rule.enabled = false;
        let rules = vec![rule];
        let input = HashMap::new();
        assert!(evaluator
            .evaluate_pre_tool_use(&rules, &[], "Bash", &input)
            .is_none());
    }

    #[test]
    fn invalid_regex_rule_is_skipped_not_matched() {
        let matcher = PatternMatcher::new();
        let evaluator = RuleEvaluator::new(&matcher);
        let bad = make_rule("bad", "(unclosed", 10, RuleDecision::Deny);
        let good = make_rule("good", "^Bash$", 5, RuleDecision::Ask);
        let rules = vec![bad, good];
        let input = HashMap::new();
        let matched = evaluator
            .evaluate_pre_tool_use(&rules, &[], "Bash", &input)
            .unwrap();
        assert_eq!(matched.rule.name, "good");
    }
}
