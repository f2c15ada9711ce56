//! Cross-event sequence detection.
//!
//! A sequence rule names an ordered list of event specs; each spec can carry
//! a `label` (to be referenced later), an `after` (must follow the labelled
//! event within the rule's window), and — for single-spec rules only — a
//! `count` expression (defaults to `>=1`). Two evaluation modes:
//!
//! - A rule with exactly one event spec that carries a count expression is a
//!   **count rule**: count how many events in the window match that single
//!   spec and compare against the expression.
//! - Any other rule is a **sequence rule**: walk the specs in order, binding
//!   each to a distinct event (a historical one is preferred; the event
//!   currently being inspected is used only if no historical event fits),
//!   honouring `after` ordering. Each event can satisfy at most one spec.
//!
//! Evaluated against the trace store's recent history for a session plus
//! the event currently under inspection (which may not be persisted yet).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{CountExpr, CountOp, EventSpec, SequenceRule};
use crate::errors::PatternError;
use crate::matcher::PatternMatcher;
use crate::trace_store::TracedEvent;

/// Default lookback window when a sequence rule doesn't set one.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Parse a window string like `5m`, `30s`, `1h`; falls back to the default
/// on anything unparseable or empty.
pub fn parse_window(window: &str) -> Duration {
    let window = window.trim();
    if window.is_empty() {
        return DEFAULT_WINDOW;
    }
    let (digits, suffix) = window.split_at(
        window
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(window.len()),
    );
    let n: u64 = match digits.parse() {
        Ok(n) => n,
        Err(_) => return DEFAULT_WINDOW,
    };
    match suffix {
        "s" | "" => Duration::from_secs(n),
        "m" => Duration::from_secs(n * 60),
        "h" => Duration::from_secs(n * 3600),
        _ => DEFAULT_WINDOW,
    }
}

/// Outcome of a sequence rule matching against the trace.
#[derive(Debug, Clone)]
pub struct SequenceMatch<'a> {
    pub rule: &'a SequenceRule,
    pub message: String,
}

/// One candidate event under consideration for a sequence binding.
struct Candidate<'e> {
    event: &'e TracedEvent,
    is_current: bool,
}

/// Evaluates sequence rules against a session's recent trace events plus the
/// event currently being inspected.
pub struct SequenceEvaluator<'a> {
    matcher: &'a PatternMatcher,
}

impl<'a> SequenceEvaluator<'a> {
    pub fn new(matcher: &'a PatternMatcher) -> Self {
        Self { matcher }
    }

    /// Evaluate every enabled sequence rule against `history` (the session's
    /// prior events, any order) plus `current` (the event under inspection,
    /// not yet necessarily persisted); returns the first rule that matches.
    pub fn evaluate<'r>(
        &self,
        rules: &'r [SequenceRule],
        history: &[TracedEvent],
        current: &TracedEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<SequenceMatch<'r>>, PatternError> {
        for rule in rules {
            if !rule.enabled {
                continue;
            }
            if self.rule_matches(rule, history, current, now)? {
                let message = if rule.message.is_empty() {
                    format!("Sequence matched: {}", rule.name)
                } else {
                    rule.message.clone()
                };
                return Ok(Some(SequenceMatch { rule, message }));
            }
        }
        Ok(None)
    }

    fn rule_matches(
        &self,
        rule: &SequenceRule,
        history: &[TracedEvent],
        current: &TracedEvent,
        now: DateTime<Utc>,
    ) -> Result<bool, PatternError> {
        let window = parse_window(&rule.window);
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());

        let mut candidates: Vec<Candidate> = history
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .map(|e| Candidate {
                event: e,
                is_current: false,
            })
            .collect();
        candidates.sort_by_key(|c| c.event.timestamp);
        candidates.push(Candidate {
            event: current,
            is_current: true,
        });

        if rule.events.len() == 1 && rule.events[0].count.is_some() {
            self.count_evaluator(&rule.events[0], &candidates)
        } else {
            self.sequence_evaluator(&rule.events, &candidates)
        }
    }

    fn count_evaluator(&self, spec: &EventSpec, candidates: &[Candidate]) -> Result<bool, PatternError> {
        let mut count = 0u64;
        for candidate in candidates {
            if self.event_matches(spec, candidate.event)? {
                count += 1;
            }
        }
        let expr = spec
            .count
            .as_deref()
            .and_then(CountExpr::parse)
            .unwrap_or(CountExpr { op: CountOp::Ge, n: 1 });
        Ok(expr.satisfied_by(count))
    }

    fn sequence_evaluator(&self, specs: &[EventSpec], candidates: &[Candidate]) -> Result<bool, PatternError> {
        let mut bound = vec![false; candidates.len()];
        let mut label_times: HashMap<String, DateTime<Utc>> = HashMap::new();

        for spec in specs {
            let after_time = spec
                .after
                .as_ref()
                .and_then(|label| label_times.get(label))
                .copied();
            if spec.after.is_some() && after_time.is_none() {
                // Referenced label never bound — this spec can't be satisfied.
                return Ok(false);
            }

            let mut chosen: Option<usize> = None;
            // Prefer historical candidates (in chronological order) over
            // the event currently under inspection.
            for (idx, candidate) in candidates.iter().enumerate() {
                if bound[idx] || candidate.is_current {
                    continue;
                }
                if let Some(after) = after_time {
                    if candidate.event.timestamp < after {
                        continue;
                    }
                }
                if self.event_matches(spec, candidate.event)? {
                    chosen = Some(idx);
                    break;
                }
            }
            if chosen.is_none() {
                for (idx, candidate) in candidates.iter().enumerate() {
                    if bound[idx] || !candidate.is_current {
                        continue;
                    }
                    if let Some(after) = after_time {
                        if candidate.event.timestamp < after {
                            continue;
                        }
                    }
                    if self.event_matches(spec, candidate.event)? {
                        chosen = Some(idx);
                        break;
                    }
                }
            }

            match chosen {
                Some(idx) => {
                    bound[idx] = true;
                    if let Some(label) = &spec.label {
                        label_times.insert(label.clone(), candidates[idx].event.timestamp);
                    }
                }
                None => return Ok(false),
            }
        }

        Ok(true)
    }

    fn event_matches(&self, spec: &EventSpec, event: &TracedEvent) -> Result<bool, PatternError> {
        if event.event_type != spec.event {
            return Ok(false);
        }
        if !spec.tool_name.is_empty() {
            let tool_name = event.tool_name.as_deref().unwrap_or("");
            if !self.matcher.match_tool_name(&spec.tool_name, tool_name)? {
                return Ok(false);
            }
        }
        if !spec.input.is_empty() {
            let input: HashMap<String, serde_json::Value> = event
                .tool_input
                .as_object()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            if self.matcher.match_tool_input(&spec.input, &input)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleDecision;
    use serde_json::json;

    fn event(event_type: &str, tool_name: &str, offset_secs: i64) -> TracedEvent {
        TracedEvent {
            id: None,
            session_id: "s1".to_string(),
            tool_use_id: None,
            event_type: event_type.to_string(),
            tool_name: Some(tool_name.to_string()),
            tool_input: json!({}),
            tool_response: json!({}),
            timestamp: Utc::now() + chrono::Duration::seconds(offset_secs),
            decision: None,
            rule_matched: None,
        }
    }

    #[test]
    fn parse_window_handles_suffixes() {
        assert_eq!(parse_window("30s"), Duration::from_secs(30));
        assert_eq!(parse_window("5m"), Duration::from_secs(300));
        assert_eq!(parse_window("1h"), Duration::from_secs(3600));
        assert_eq!(parse_window(""), DEFAULT_WINDOW);
        assert_eq!(parse_window("garbage"), DEFAULT_WINDOW);
    }

    #[test]
    fn simple_two_step_sequence_matches_within_window() {
        let matcher = PatternMatcher::new();
        let evaluator = SequenceEvaluator::new(&matcher);
        let rule = SequenceRule {
            name: "creds-then-network".to_string(),
            enabled: true,
            severity: "high".to_string(),
            window: "5m".to_string(),
            events: vec![
                EventSpec {
                    event: "PreToolUse".to_string(),
                    tool_name: "Read".to_string(),
                    input: HashMap::new(),
                    label: Some("read_creds".to_string()),
                    after: None,
                    count: None,
                },
                EventSpec {
                    event: "PreToolUse".to_string(),
                    tool_name: "Bash".to_string(),
                    input: HashMap::new(),
                    label: None,
                    after: Some("read_creds".to_string()),
                    count: None,
                },
            ],
            decision: RuleDecision::Ask,
            message: "credentials read then network access".to_string(),
        };
        let history = vec![event("PreToolUse", "Read", -60)];
        let current = event("PreToolUse", "Bash", -10);
        let result = evaluator.evaluate(&[rule], &history, &current, Utc::now()).unwrap();
        assert!(result.is_some());
        assert_eq!(result.unwrap().message, "credentials read then network access");
    }

    #[test]
    fn after_ordering_is_enforced() {
        let matcher = PatternMatcher::new();
        let evaluator = SequenceEvaluator::new(&matcher);
        let rule = SequenceRule {
            name: "creds-then-network".to_string(),
            enabled: true,
            severity: "high".to_string(),
            window: "5m".to_string(),
            events: vec![
                EventSpec {
                    event: "PreToolUse".to_string(),
                    tool_name: "Read".to_string(),
                    input: HashMap::new(),
                    label: Some("read_creds".to_string()),
                    after: None,
                    count: None,
                },
                EventSpec {
                    event: "PreToolUse".to_string(),
                    tool_name: "Bash".to_string(),
                    input: HashMap::new(),
                    label: None,
                    after: Some("read_creds".to_string()),
                    count: None,
                },
            ],
            decision: RuleDecision::Ask,
            message: String::new(),
        };
        // Bash happens before Read: sequence should not match.
        let history = vec![event("PreToolUse", "Bash", -60)];
        let current = event("PreToolUse", "Read", -10);
        let result = evaluator.evaluate(&[rule], &history, &current, Utc::now()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn count_expression_requires_minimum_occurrences() {
        let matcher = PatternMatcher::new();
        let evaluator = SequenceEvaluator::new(&matcher);
        let rule = SequenceRule {
            name: "many-reads".to_string(),
            enabled: true,
            severity: "medium".to_string(),
            window: "5m".to_string(),
            events: vec![EventSpec {
                event: "PreToolUse".to_string(),
                tool_name: "Read".to_string(),
                input: HashMap::new(),
                label: None,
                after: None,
                count: Some(">=3".to_string()),
            }],
            decision: RuleDecision::Ask,
            message: String::new(),
        };
        let history = vec![event("PreToolUse", "Read", -60)];
        let current = event("PreToolUse", "Read", -30);
        assert!(evaluator
            .evaluate(&[rule.clone()], &history, &current, Utc::now())
            .unwrap()
            .is_none());

        let history3 = vec![event("PreToolUse", "Read", -60), event("PreToolUse", "Read", -30)];
        let current3 = event("PreToolUse", "Read", -10);
        assert!(evaluator
            .evaluate(&[rule], &history3, &current3, Utc::now())
            .unwrap()
            .is_some());
    }

    #[test]
    fn each_historical_event_is_bound_to_at_most_one_spec() {
        let matcher = PatternMatcher::new();
        let evaluator = SequenceEvaluator::new(&matcher);
        let rule = SequenceRule {
            name: "two-reads".to_string(),
            enabled: true,
            severity: "medium".to_string(),
            window: "5m".to_string(),
            events: vec![
                EventSpec {
                    event: "PreToolUse".to_string(),
                    tool_name: "Read".to_string(),
                    input: HashMap::new(),
                    label: None,
                    after: None,
                    count: None,
                },
                EventSpec {
                    event: "PreToolUse".to_string(),
                    tool_name: "Read".to_string(),
                    input: HashMap::new(),
                    label: None,
                    after: None,
                    count: None,
                },
            ],
            decision: RuleDecision::Ask,
            message: String::new(),
        };
        // Only one historical Read plus the current Read: both specs can
        // still be satisfied because each binds to a distinct candidate.
        let history = vec![event("PreToolUse", "Read", -60)];
        let current = event("PreToolUse", "Read", -10);
        assert!(evaluator.evaluate(&[rule], &history, &current, Utc::now()).unwrap().is_some());
    }
}
