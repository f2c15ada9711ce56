//! Trigger resolution and verdict parsing for the semantic analysis layer.
//!
//! Deciding *whether* to call an LLM is cheap and deterministic (pattern
//! matching against configured triggers); deciding *what the answer means*
//! is a matter of parsing the leading keyword off the provider's response
//! text. Both live here so the manager stays a pure dispatch mechanism.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::config::RuleDecision;
use crate::errors::{LlmError, PatternError};
use crate::llm::manager::LlmManager;
use crate::llm::prompt::tool_call_prompt;
use crate::llm::provider::AnalysisResponse;
use crate::llm::{AnalysisKind, LlmConfig, TriggerConfig, TriggerOutcome};
use crate::matcher::{stringify, PatternMatcher};

/// The semantic layer's verdict, parsed from a provider's leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticDecision {
    Allow,
    Deny,
    Ask,
    /// The response didn't start with a recognised keyword; treat as
    /// inconclusive rather than guessing.
    Unknown,
}

impl SemanticDecision {
    fn parse(text: &str) -> Self {
        let keyword = text
            .trim()
            .split(':')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_uppercase();
        match keyword.as_str() {
            "ALLOW" => Self::Allow,
            "DENY" => Self::Deny,
            "ASK" => Self::Ask,
            _ => Self::Unknown,
        }
    }
}

/// A fully resolved semantic verdict.
#[derive(Debug, Clone)]
pub struct SemanticVerdict {
    pub decision: SemanticDecision,
    pub rationale: String,
    pub provider: String,
    pub confidence: f64,
}

impl From<AnalysisResponse> for SemanticVerdict {
    fn from(response: AnalysisResponse) -> Self {
        Self {
            decision: SemanticDecision::parse(&response.text),
            rationale: response.text,
            provider: response.provider,
            confidence: response.confidence,
        }
    }
}

/// Combine a rule decision with an LLM verdict per the cross-validation
/// policy: below `min_confidence` the rule decision stands untouched;
/// otherwise the more restrictive of the two wins (`block > deny > ask >
/// allow`). An `Unknown` LLM decision never overrides the rule.
pub fn cross_validate(
    rule_decision: crate::config::RuleDecision,
    verdict: &SemanticVerdict,
    min_confidence: f64,
) -> crate::config::RuleDecision {
    use crate::config::RuleDecision;

    if verdict.confidence < min_confidence {
        return rule_decision;
    }
    let rank = |d: RuleDecision| match d {
        RuleDecision::Block => 3,
        RuleDecision::Deny => 2,
        RuleDecision::Ask => 1,
        RuleDecision::Allow => 0,
    };
    let llm_decision = match verdict.decision {
        SemanticDecision::Deny => RuleDecision::Deny,
        SemanticDecision::Ask => RuleDecision::Ask,
        SemanticDecision::Allow => RuleDecision::Allow,
        SemanticDecision::Unknown => return rule_decision,
    };
    if rank(llm_decision) > rank(rule_decision) {
        llm_decision
    } else {
        rule_decision
    }
}

/// Ties trigger evaluation to dispatch mode (single vs. cross-validated).
pub struct SemanticAnalyzer<'a> {
    manager: &'a LlmManager,
    config: &'a LlmConfig,
    matcher: &'a PatternMatcher,
}

impl<'a> SemanticAnalyzer<'a> {
    pub fn new(manager: &'a LlmManager, config: &'a LlmConfig, matcher: &'a PatternMatcher) -> Self {
        Self {
            manager,
            config,
            matcher,
        }
    }

    /// Resolve every configured trigger against one event. Returns `None`
    /// when the layer is disabled, no triggers are configured, or none of
    /// them fire; otherwise the union of requested analysis kinds and the
    /// effective dispatch mode (the first firing trigger with an explicit
    /// `mode` wins; absent that, the global `LlmConfig::mode`).
    pub fn should_analyze(
        &self,
        event_kind: AnalysisKind,
        tool_name: &str,
        rule_matched: bool,
        rule_decision: RuleDecision,
    ) -> Result<Option<TriggerOutcome>, PatternError> {
        if !self.config.enabled || self.config.triggers.is_empty() {
            return Ok(None);
        }
        let mut kinds = Vec::new();
        let mut mode = None;
        for trigger in &self.config.triggers {
            if !trigger_fires(self.matcher, trigger, tool_name, rule_matched, rule_decision)? {
                continue;
            }
            let kind = trigger.kind.unwrap_or(event_kind);
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
            if mode.is_none() {
                mode = trigger.mode;
            }
        }
        if kinds.is_empty() {
            return Ok(None);
        }
        Ok(Some(TriggerOutcome {
            kinds,
            mode: mode.unwrap_or(self.config.mode),
        }))
    }

    /// Run (and parse) a semantic analysis of a tool call, honouring the
    /// configured cross-validation mode. Returns `None` only when the
    /// manager reports no configured providers — every other failure
    /// propagates so the engine can log and fail open per its policy.
    pub async fn analyze_tool_call(
        &self,
        tool_name: &str,
        input: &HashMap<String, Value>,
        recent_events: &[String],
    ) -> Result<SemanticVerdict, LlmError> {
        let request = tool_call_prompt(tool_name, input, recent_events, 256);
        let cache_key = format!("{tool_name}:{}", stringify(&Value::Object(
            input.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        )));

        let response = if self.config.cross_validate {
            self.manager.analyze_cross_validated(request, &cache_key).await?
        } else {
            self.manager.analyze(request, &cache_key).await?
        };

        Ok(SemanticVerdict::from(response))
    }
}

fn trigger_fires(
    matcher: &PatternMatcher,
    trigger: &TriggerConfig,
    tool_name: &str,
    rule_matched: bool,
    rule_decision: RuleDecision,
) -> Result<bool, PatternError> {
    if trigger.always {
        return Ok(true);
    }
    if trigger.no_rule_match && !rule_matched {
        return Ok(true);
    }
    if trigger.rule_decision.contains(&rule_decision) {
        return Ok(true);
    }
    for pattern in &trigger.tool_names {
        if matcher.match_tool_name(pattern, tool_name)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Logs a warning and returns `None` for engine call sites that treat LLM
/// failure as fail-open (continue without a semantic verdict) rather than
/// propagating the error.
pub fn fail_open(error: LlmError) -> Option<SemanticVerdict> {
    warn!(error = %error, "semantic analysis unavailable, continuing without it");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{AnalysisRequest, LlmProvider};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedProvider(&'static str);

    impl LlmProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn analyze(
            &self,
            _request: AnalysisRequest,
        ) -> Pin<Box<dyn Future<Output = Result<AnalysisResponse, LlmError>> + Send + '_>> {
            let text = self.0.to_string();
            Box::pin(async move {
                Ok(AnalysisResponse {
                    text,
                    provider: "fixed".to_string(),
                    model: "fixed".to_string(),
                    confidence: 0.9,
                    cached: false,
                })
            })
        }
    }

    #[test]
    fn semantic_decision_parses_known_keywords() {
        assert_eq!(SemanticDecision::parse("ALLOW: fine"), SemanticDecision::Allow);
        assert_eq!(SemanticDecision::parse("deny: risky"), SemanticDecision::Deny);
        assert_eq!(SemanticDecision::parse("Ask: unsure"), SemanticDecision::Ask);
        assert_eq!(SemanticDecision::parse("garbage text"), SemanticDecision::Unknown);
    }

    #[test]
    fn trigger_matches_tool_name_pattern() {
        let matcher = PatternMatcher::new();
        let trigger = TriggerConfig {
            tool_names: vec!["^Bash$".to_string()],
            ..TriggerConfig::default()
        };
        assert!(trigger_fires(&matcher, &trigger, "Bash", true, RuleDecision::Allow).unwrap());
        assert!(!trigger_fires(&matcher, &trigger, "Read", true, RuleDecision::Allow).unwrap());
    }

    #[test]
    fn trigger_fires_on_no_rule_match() {
        let matcher = PatternMatcher::new();
        let trigger = TriggerConfig {
            no_rule_match: true,
            ..TriggerConfig::default()
        };
        assert!(trigger_fires(&matcher, &trigger, "Bash", false, RuleDecision::Allow).unwrap());
        assert!(!trigger_fires(&matcher, &trigger, "Bash", true, RuleDecision::Allow).unwrap());
    }

    #[test]
    fn trigger_fires_on_rule_decision_whitelist() {
        let matcher = PatternMatcher::new();
        let trigger = TriggerConfig {
            rule_decision: vec![RuleDecision::Deny, RuleDecision::Block],
            ..TriggerConfig::default()
        };
        assert!(trigger_fires(&matcher, &trigger, "Bash", true, RuleDecision::Deny).unwrap());
        assert!(!trigger_fires(&matcher, &trigger, "Bash", true, RuleDecision::Allow).unwrap());
    }

    #[test]
    fn always_trigger_short_circuits() {
        let matcher = PatternMatcher::new();
        let trigger = TriggerConfig {
            always: true,
            ..TriggerConfig::default()
        };
        assert!(trigger_fires(&matcher, &trigger, "AnyTool", true, RuleDecision::Allow).unwrap());
    }

    #[test]
    fn should_analyze_unions_kinds_across_firing_triggers() {
        let config = LlmConfig {
            enabled: true,
            triggers: vec![
                TriggerConfig {
                    always: true,
                    kind: Some(AnalysisKind::Transcript),
                    ..TriggerConfig::default()
                },
                TriggerConfig {
                    tool_names: vec!["^Bash$".to_string()],
                    mode: Some(crate::llm::AnalysisMode::Async),
                    ..TriggerConfig::default()
                },
            ],
            ..LlmConfig::default()
        };
        let matcher = PatternMatcher::new();
        let manager = LlmManager::new(vec![], Duration::from_secs(60), 0, 0, 0.0);
        let analyzer = SemanticAnalyzer::new(&manager, &config, &matcher);
        let outcome = analyzer
            .should_analyze(AnalysisKind::Contextual, "Bash", true, RuleDecision::Allow)
            .unwrap()
            .unwrap();
        assert_eq!(outcome.kinds.len(), 2);
        assert!(outcome.kinds.contains(&AnalysisKind::Transcript));
        assert!(outcome.kinds.contains(&AnalysisKind::Contextual));
        assert_eq!(outcome.mode, crate::llm::AnalysisMode::Async);
    }

    #[test]
    fn should_analyze_is_none_without_triggers() {
        let config = LlmConfig {
            enabled: true,
            ..LlmConfig::default()
        };
        let matcher = PatternMatcher::new();
        let manager = LlmManager::new(vec![], Duration::from_secs(60), 0, 0, 0.0);
        let analyzer = SemanticAnalyzer::new(&manager, &config, &matcher);
        assert!(analyzer
            .should_analyze(AnalysisKind::Contextual, "Bash", true, RuleDecision::Allow)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn analyze_tool_call_parses_provider_response() {
        let manager = LlmManager::new(
            vec![Arc::new(FixedProvider("DENY: dangerous delete"))],
            Duration::from_secs(60),
            0,
            0,
            0.0,
        );
        let config = LlmConfig {
            enabled: true,
            ..LlmConfig::default()
        };
        let matcher = PatternMatcher::new();
        let analyzer = SemanticAnalyzer::new(&manager, &config, &matcher);
        let input = HashMap::new();
        let verdict = analyzer.analyze_tool_call("Bash", &input, &[]).await.unwrap();
        assert_eq!(verdict.decision, SemanticDecision::Deny);
    }

    #[test]
    fn low_confidence_verdict_leaves_rule_decision_standing() {
        use crate::config::RuleDecision;
        let verdict = SemanticVerdict {
            decision: SemanticDecision::Deny,
            rationale: "DENY: risky".to_string(),
            provider: "fixed".to_string(),
            confidence: 0.4,
        };
        assert_eq!(cross_validate(RuleDecision::Allow, &verdict, 0.7), RuleDecision::Allow);
    }

    #[test]
    fn high_confidence_deny_escalates_over_allow() {
        use crate::config::RuleDecision;
        let verdict = SemanticVerdict {
            decision: SemanticDecision::Deny,
            rationale: "DENY: risky".to_string(),
            provider: "fixed".to_string(),
            confidence: 0.9,
        };
        assert_eq!(cross_validate(RuleDecision::Allow, &verdict, 0.7), RuleDecision::Deny);
    }

    #[test]
    fn high_confidence_allow_never_downgrades_a_deny() {
        use crate::config::RuleDecision;
        let verdict = SemanticVerdict {
            decision: SemanticDecision::Allow,
            rationale: "ALLOW: fine".to_string(),
            provider: "fixed".to_string(),
            confidence: 0.95,
        };
        assert_eq!(cross_validate(RuleDecision::Deny, &verdict, 0.7), RuleDecision::Deny);
    }
}
