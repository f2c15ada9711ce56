//! The inspection engine: ties event parsing, rule evaluation, sequence
//! detection, intent correlation, and the optional LLM layer together into
//! one decision per hook event.
//!
//! This is the only module that knows the full composition order. Every
//! other module (rule, sequence, intent, llm) answers one question in
//! isolation; `InspectionEngine::inspect` is where the answers get folded
//! into a single [`GatewayOutput`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::{Config, RuleAction, RuleDecision};
use crate::errors::EngineError;
use crate::event::{GatewayOutput, HookEvent, HookEventKind, Permission};
use crate::intent;
use crate::llm::analyzer::{cross_validate, SemanticAnalyzer};
use crate::llm::manager::LlmManager;
use crate::llm::{AnalysisKind, ConcreteMode};
use crate::matcher::{stringify, PatternMatcher};
use crate::rule::{Matched, RuleEvaluator};
use crate::sequence::SequenceEvaluator;
use crate::trace_store::{TraceStore, TracedEvent};

const SECURITY_VIOLATION_STOP_REASON: &str = "Security violation detected";
const DRY_RUN_PREFIX: &str = "[DRY RUN] Would deny: ";

/// Owns everything an inspection needs: the merged config, the shared
/// pattern matcher, and the optional trace store / LLM manager. Built once
/// per process invocation by the CLI layer.
pub struct InspectionEngine {
    config: Config,
    matcher: PatternMatcher,
    trace_store: Option<TraceStore>,
    llm_manager: Option<Arc<LlmManager>>,
    dry_run: bool,
}

impl InspectionEngine {
    pub fn new(
        config: Config,
        trace_store: Option<TraceStore>,
        llm_manager: Option<Arc<LlmManager>>,
        dry_run: bool,
    ) -> Self {
        Self {
            config,
            matcher: PatternMatcher::new(),
            trace_store,
            llm_manager,
            dry_run,
        }
    }

    /// Parse, evaluate, and decide on one hook event. The only error this
    /// returns is an [`EngineError`] from a malformed event or an
    /// unrecognised event kind — every downstream failure (trace store,
    /// LLM) is logged and absorbed rather than propagated.
    #[instrument(
        skip(self, bytes),
        fields(
            event_kind = kind.as_str(),
            session_id = tracing::field::Empty,
            tool_name = tracing::field::Empty,
        )
    )]
    pub async fn inspect(&self, bytes: &[u8], kind: HookEventKind) -> Result<GatewayOutput, EngineError> {
        let event = HookEvent::parse(bytes, kind)?;
        tracing::Span::current().record("session_id", event.common.session_id.as_str());
        if let Some(tool_name) = event.tool_name.as_deref() {
            tracing::Span::current().record("tool_name", tool_name);
        }

        let output = match event.kind {
            HookEventKind::PreToolUse => self.inspect_pre_tool_use(&event).await,
            HookEventKind::PostToolUse => self.inspect_post_tool_use(&event).await,
            HookEventKind::UserPromptSubmit => self.inspect_user_prompt_submit(&event).await,
            HookEventKind::Stop
            | HookEventKind::SubagentStop
            | HookEventKind::Notification
            | HookEventKind::PreCompact
            | HookEventKind::SessionStart
            | HookEventKind::SessionEnd
            | HookEventKind::PermissionRequest => GatewayOutput::continue_only(),
        };

        Ok(output)
    }

    async fn inspect_pre_tool_use(&self, event: &HookEvent) -> GatewayOutput {
        let evaluator = RuleEvaluator::new(&self.matcher);
        let tool_name = event.tool_name.as_deref().unwrap_or("");
        let empty_input = HashMap::new();
        let input = event.tool_input.as_ref().unwrap_or(&empty_input);

        let rules = self.config.rules_for(event.kind.as_str());
        let matched = evaluator.evaluate_pre_tool_use(rules, &self.config.allowlist, tool_name, input);
        let rule_matched = matched.is_some();

        let (mut rule_decision, output) = self.compose_rule_output(event, input, matched);
        let output = self
            .apply_llm_layer(event, tool_name, input, &mut rule_decision, output, false, rule_matched)
            .await;

        self.persist(event, tool_name, input, None, &output);
        output
    }

    async fn inspect_post_tool_use(&self, event: &HookEvent) -> GatewayOutput {
        let evaluator = RuleEvaluator::new(&self.matcher);
        let tool_name = event.tool_name.as_deref().unwrap_or("");
        let empty_input = HashMap::new();
        let empty_response = HashMap::new();
        let input = event.tool_input.as_ref().unwrap_or(&empty_input);
        let response = event.tool_response.as_ref().unwrap_or(&empty_response);

        // Intent/action correlation runs unconditionally before sequence
        // rules; a critical finding short-circuits straight to a deny.
        if let Some(critical_reason) = self.check_intent_mismatch(event, tool_name, input, response) {
            let output = GatewayOutput::permission(
                event.kind.as_str(),
                Permission::Deny,
                format!("Rule 'intent-action-mismatch' triggered: {critical_reason}"),
                None,
            );
            self.persist(event, tool_name, input, Some(RuleDecision::Deny), &output);
            return output;
        }

        let rules = self.config.rules_for(event.kind.as_str());
        let matched =
            evaluator.evaluate_post_tool_use(rules, &self.config.allowlist, tool_name, input, response);

        let sequence_matched = if matched.is_none() { self.check_sequence(event) } else { None };
        let rule_matched = matched.is_some() || sequence_matched.is_some();

        let (mut rule_decision, output) = if let Some(seq) = &sequence_matched {
            let permission = match seq.rule.decision {
                RuleDecision::Block => {
                    let out = GatewayOutput::block(
                        SECURITY_VIOLATION_STOP_REASON,
                        if seq.message.is_empty() {
                            format!("Sequence '{}' matched", seq.rule.name)
                        } else {
                            seq.message.clone()
                        },
                    );
                    (RuleDecision::Block, out)
                }
                decision => {
                    let permission = decision_to_permission(decision);
                    let out = GatewayOutput::permission(
                        event.kind.as_str(),
                        permission,
                        format!("Rule '{}' triggered: {}", seq.rule.name, seq.message),
                        None,
                    );
                    (decision, out)
                }
            };
            permission
        } else {
            self.compose_rule_output(event, input, matched)
        };

        let output = self
            .apply_llm_layer(event, tool_name, input, &mut rule_decision, output, false, rule_matched)
            .await;

        self.persist(event, tool_name, input, None, &output);
        output
    }

    async fn inspect_user_prompt_submit(&self, event: &HookEvent) -> GatewayOutput {
        let evaluator = RuleEvaluator::new(&self.matcher);
        let prompt = event.prompt.as_deref().unwrap_or("");
        let rules = self.config.rules_for(event.kind.as_str());
        let matched = evaluator.evaluate_user_prompt_submit(rules, &self.config.allowlist, prompt);
        let rule_matched = matched.is_some();

        let empty_input = HashMap::new();
        let (mut rule_decision, output) = self.compose_rule_output(event, &empty_input, matched);
        let output = self
            .apply_llm_layer(event, "", &empty_input, &mut rule_decision, output, true, rule_matched)
            .await;

        self.persist(event, "", &empty_input, None, &output);
        output
    }

    /// Compose a [`GatewayOutput`] from a rule match (or its absence) per
    /// the composition rules: unmatched falls back to `default_decision`,
    /// `block` emits a non-continuing output, everything else emits a
    /// permission decision. Dry-run rewrites `deny` to `allow`.
    fn compose_rule_output(
        &self,
        event: &HookEvent,
        input: &HashMap<String, Value>,
        matched: Option<Matched>,
    ) -> (RuleDecision, GatewayOutput) {
        let (decision, updated_input, reason, system_message) = match matched {
            Some(m) => {
                let reason = if m.message.is_empty() {
                    format!("Rule '{}' triggered", m.rule.name)
                } else {
                    format!("Rule '{}' triggered: {}", m.rule.name, m.message)
                };
                let updated_input = if m.rule.action == RuleAction::Modify {
                    Some(apply_modifications(input, &m.rule.modifications))
                } else {
                    None
                };
                let system_message = m.rule.system_message.clone().unwrap_or(m.message.clone());
                (m.decision, updated_input, reason, system_message)
            }
            None => {
                let decision = RuleDecision::parse(&self.config.settings.default_decision)
                    .unwrap_or(RuleDecision::Allow);
                (decision, None, "No rule matched; using default decision".to_string(), String::new())
            }
        };

        let output = match decision {
            RuleDecision::Block => GatewayOutput::block(SECURITY_VIOLATION_STOP_REASON, system_message),
            RuleDecision::Deny if self.dry_run => GatewayOutput::permission(
                event.kind.as_str(),
                Permission::Allow,
                format!("{DRY_RUN_PREFIX}{reason}"),
                updated_input,
            ),
            other => {
                let permission = decision_to_permission(other);
                let updated_input = if matches!(other, RuleDecision::Allow) {
                    updated_input
                } else {
                    None
                };
                GatewayOutput::permission(event.kind.as_str(), permission, reason, updated_input)
            }
        };
        (decision, output)
    }

    /// Returns `Some(description)` when the paired PreToolUse event is found
    /// and the comparison produces a critical finding.
    fn check_intent_mismatch(
        &self,
        event: &HookEvent,
        tool_name: &str,
        input: &HashMap<String, Value>,
        response: &HashMap<String, Value>,
    ) -> Option<String> {
        let store = self.trace_store.as_ref()?;
        let tool_use_id = event.tool_use_id.as_deref()?;
        if tool_use_id.is_empty() {
            return None;
        }
        let pre_event = match store.get_event_by_tool_use_id(&event.common.session_id, tool_use_id) {
            Ok(Some(e)) => e,
            Ok(None) => return None,
            Err(e) => {
                debug!(error = %e, "trace store lookup failed, skipping intent check");
                return None;
            }
        };
        let pre_input: HashMap<String, Value> = pre_event
            .tool_input
            .as_object()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let pre_tool_name = pre_event.tool_name.as_deref().unwrap_or("");

        let finding = intent::check_mismatch(pre_tool_name, &pre_input, tool_name, input, response)?;
        if finding.severity == intent::Severity::Critical {
            Some(finding.description)
        } else {
            None
        }
    }

    fn check_sequence(&self, event: &HookEvent) -> Option<crate::sequence::SequenceMatch<'_>> {
        let store = self.trace_store.as_ref()?;
        let now = Utc::now();
        let window = self
            .config
            .sequence_rules
            .iter()
            .filter(|r| r.enabled)
            .map(|r| crate::sequence::parse_window(&r.window))
            .max()
            .unwrap_or(crate::sequence::DEFAULT_WINDOW);
        let lookback = now
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(300));
        let history = match store.get_session_events_since(&event.common.session_id, lookback) {
            Ok(events) => events,
            Err(e) => {
                debug!(error = %e, "trace store history lookup failed, skipping sequence rules");
                return None;
            }
        };
        let current = to_traced_event(event);
        let sequence_evaluator = SequenceEvaluator::new(&self.matcher);
        match sequence_evaluator.evaluate(&self.config.sequence_rules, &history, &current, now) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "sequence rule evaluation failed");
                None
            }
        }
    }

    /// Run the semantic analyzer, if configured and triggered, and fold its
    /// verdict into the decision via cross-validation. `rule_decision` is
    /// updated in place so callers can inspect the final composed decision.
    /// `rule_matched` reflects whether a configured (non-default) rule or
    /// sequence rule fired for this event, feeding the `no_rule_match` and
    /// `rule_decision` trigger conditions.
    async fn apply_llm_layer(
        &self,
        event: &HookEvent,
        tool_name: &str,
        input: &HashMap<String, Value>,
        rule_decision: &mut RuleDecision,
        output: GatewayOutput,
        is_prompt: bool,
        rule_matched: bool,
    ) -> GatewayOutput {
        let Some(manager) = self.llm_manager.as_ref() else {
            return output;
        };
        if is_prompt || tool_name.is_empty() {
            return output;
        }

        let analyzer = SemanticAnalyzer::new(manager, &self.config.llm, &self.matcher);
        let event_kind = AnalysisKind::for_event(event.kind);
        let outcome = match analyzer.should_analyze(event_kind, tool_name, rule_matched, *rule_decision) {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return output,
            Err(e) => {
                warn!(error = %e, "trigger evaluation failed, skipping semantic analysis");
                return output;
            }
        };

        let recent_events = self
            .trace_store
            .as_ref()
            .and_then(|store| store.get_recent_events(&event.common.session_id, 10).ok())
            .map(|events| {
                events
                    .iter()
                    .map(|e| format!("{} {}", e.event_type, e.tool_name.clone().unwrap_or_default()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        match outcome.mode.resolve(event_kind) {
            ConcreteMode::Async => {
                let manager = Arc::clone(manager);
                let config = self.config.llm.clone();
                let tool_name = tool_name.to_string();
                let input = input.clone();
                tokio::spawn(async move {
                    let matcher = PatternMatcher::new();
                    let analyzer = SemanticAnalyzer::new(&manager, &config, &matcher);
                    let call = analyzer.analyze_tool_call(&tool_name, &input, &recent_events);
                    match tokio::time::timeout(std::time::Duration::from_secs(60), call).await {
                        Ok(Ok(verdict)) => {
                            debug!(
                                decision = ?verdict.decision,
                                provider = %verdict.provider,
                                "async semantic analysis completed"
                            );
                        }
                        Ok(Err(e)) => {
                            crate::llm::analyzer::fail_open(e);
                        }
                        Err(_) => {
                            warn!("async semantic analysis timed out");
                        }
                    }
                });
                output
            }
            ConcreteMode::Sync => {
                let verdict = match analyzer.analyze_tool_call(tool_name, input, &recent_events).await {
                    Ok(v) => v,
                    Err(e) => {
                        crate::llm::analyzer::fail_open(e);
                        return output;
                    }
                };

                let new_decision = cross_validate(*rule_decision, &verdict, self.config.llm.min_confidence);
                if new_decision == *rule_decision {
                    return output;
                }
                *rule_decision = new_decision;

                match new_decision {
                    RuleDecision::Block => {
                        GatewayOutput::block(SECURITY_VIOLATION_STOP_REASON, verdict.rationale.clone())
                    }
                    decision if decision == RuleDecision::Deny && self.dry_run => GatewayOutput::permission(
                        event.kind.as_str(),
                        Permission::Allow,
                        format!("{DRY_RUN_PREFIX}semantic analysis escalated: {}", verdict.rationale),
                        None,
                    ),
                    decision => GatewayOutput::permission(
                        event.kind.as_str(),
                        decision_to_permission(decision),
                        format!(
                            "Semantic analysis ({}) escalated decision: {}",
                            verdict.provider, verdict.rationale
                        ),
                        None,
                    ),
                }
            }
        }
    }

    fn persist(
        &self,
        event: &HookEvent,
        tool_name: &str,
        input: &HashMap<String, Value>,
        override_decision: Option<RuleDecision>,
        output: &GatewayOutput,
    ) {
        let Some(store) = self.trace_store.as_ref() else {
            return;
        };
        if let Err(e) =
            store.get_or_create_session(&event.common.session_id, &event.common.cwd, &event.common.transcript_path)
        {
            debug!(error = %e, "failed to upsert session, skipping trace write");
            return;
        }

        let decision_str = override_decision
            .map(|d| d.as_str().to_string())
            .or_else(|| decision_string_from_output(output));
        let rule_matched = output
            .hook_specific_output
            .as_ref()
            .map(|h| h.permission_decision_reason.clone());

        let mut traced = TracedEvent {
            id: None,
            session_id: event.common.session_id.clone(),
            tool_use_id: event.tool_use_id.clone(),
            event_type: event.kind.as_str().to_string(),
            tool_name: if tool_name.is_empty() { None } else { Some(tool_name.to_string()) },
            tool_input: input_to_value(input),
            tool_response: event
                .tool_response
                .as_ref()
                .map(input_to_value)
                .unwrap_or(Value::Object(Default::default())),
            timestamp: Utc::now(),
            decision: decision_str,
            rule_matched,
        };
        if let Err(e) = store.store_event(&mut traced) {
            debug!(error = %e, "failed to write trace event");
        }
    }
}

fn decision_to_permission(decision: RuleDecision) -> Permission {
    match decision {
        RuleDecision::Allow => Permission::Allow,
        RuleDecision::Deny => Permission::Deny,
        RuleDecision::Ask => Permission::Ask,
        RuleDecision::Block => Permission::Deny,
    }
}

fn decision_string_from_output(output: &GatewayOutput) -> Option<String> {
    if !output.cont {
        return Some("block".to_string());
    }
    output
        .hook_specific_output
        .as_ref()
        .map(|h| match h.permission_decision {
            Permission::Allow => "allow".to_string(),
            Permission::Deny => "deny".to_string(),
            Permission::Ask => "ask".to_string(),
        })
}

fn input_to_value(input: &HashMap<String, Value>) -> Value {
    Value::Object(input.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn to_traced_event(event: &HookEvent) -> TracedEvent {
    TracedEvent {
        id: None,
        session_id: event.common.session_id.clone(),
        tool_use_id: event.tool_use_id.clone(),
        event_type: event.kind.as_str().to_string(),
        tool_name: event.tool_name.clone(),
        tool_input: event.tool_input.as_ref().map(input_to_value).unwrap_or(Value::Null),
        tool_response: event.tool_response.as_ref().map(input_to_value).unwrap_or(Value::Null),
        timestamp: Utc::now(),
        decision: None,
        rule_matched: None,
    }
}

/// Apply a rule's field modifications to a copy of the original input.
fn apply_modifications(
    input: &HashMap<String, Value>,
    modifications: &HashMap<String, crate::config::FieldModification>,
) -> HashMap<String, Value> {
    let mut updated = input.clone();
    for (field, modification) in modifications {
        let current = updated.get(field).map(stringify).unwrap_or_default();
        let new_value = if let Some(replacement) = &modification.replace {
            replacement.clone()
        } else {
            let mut value = current.clone();
            if let Some(prefix) = &modification.prepend {
                value = format!("{prefix}{value}");
            }
            if let Some(suffix) = &modification.append {
                value = format!("{value}{suffix}");
            }
            value
        };
        updated.insert(field.clone(), Value::String(new_value));
    }
    updated
}
