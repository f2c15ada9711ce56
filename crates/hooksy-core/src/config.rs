//! Configuration model and two-layer (global + project) loader.
//!
//! Typed structs, `#[serde(default)]` everywhere, and a `Default` impl that
//! matches the zero-config YAML. Merge semantics are specific to this
//! gateway: string fields prefer a non-empty override, sub-struct fields
//! merge only when the override sub-struct isn't entirely at its zero value,
//! and rule lists union by name with override-wins-wholesale, then sort by
//! priority descending.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::llm::LlmConfig;
use crate::matcher::PatternMatcher;

/// Decision a matched (or defaulted) rule produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDecision {
    Allow,
    Deny,
    Ask,
    Block,
}

impl RuleDecision {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            "ask" => Some(Self::Ask),
            "block" => Some(Self::Block),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Ask => "ask",
            Self::Block => "block",
        }
    }
}

/// A single field+message pattern entry used in `input` conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldPattern {
    pub pattern: String,
    #[serde(default)]
    pub message: String,
}

/// Append/prepend/replace modification for one input field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldModification {
    #[serde(default)]
    pub prepend: Option<String>,
    #[serde(default)]
    pub append: Option<String>,
    #[serde(default)]
    pub replace: Option<String>,
}

/// Matchable conditions on a rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConditions {
    /// Regex matched against the tool name. Empty matches any tool.
    #[serde(default)]
    pub tool_name: String,
    /// field name -> ordered list of pattern+message.
    #[serde(default)]
    pub input: HashMap<String, Vec<FieldPattern>>,
    /// Ordered list of patterns matched against the flattened tool response.
    #[serde(default)]
    pub response: Vec<FieldPattern>,
    /// Ordered list of patterns matched against the user prompt text.
    #[serde(default)]
    pub prompt: Vec<FieldPattern>,
}

/// Action a rule takes when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    #[default]
    None,
    Modify,
}

/// A declarative policy rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conditions: RuleConditions,
    pub decision: RuleDecision,
    #[serde(default)]
    pub action: RuleAction,
    #[serde(default)]
    pub modifications: HashMap<String, FieldModification>,
    #[serde(default)]
    pub system_message: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A count expression for a single-specification sequence rule:
/// `>=n` / `>n` / `==n` / `<=n` / `<n` / bare `n` (defaults to `>=n`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountExpr {
    pub op: CountOp,
    pub n: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountOp {
    Ge,
    Gt,
    Eq,
    Le,
    Lt,
}

impl CountExpr {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (op, rest) = if let Some(r) = s.strip_prefix(">=") {
            (CountOp::Ge, r)
        } else if let Some(r) = s.strip_prefix(">") {
            (CountOp::Gt, r)
        } else if let Some(r) = s.strip_prefix("==") {
            (CountOp::Eq, r)
        } else if let Some(r) = s.strip_prefix("<=") {
            (CountOp::Le, r)
        } else if let Some(r) = s.strip_prefix("<") {
            (CountOp::Lt, r)
        } else {
            (CountOp::Ge, s)
        };
        let n: u64 = rest.trim().parse().ok()?;
        Some(Self { op, n })
    }

    pub fn satisfied_by(&self, count: u64) -> bool {
        match self.op {
            CountOp::Ge => count >= self.n,
            CountOp::Gt => count > self.n,
            CountOp::Eq => count == self.n,
            CountOp::Le => count <= self.n,
            CountOp::Lt => count < self.n,
        }
    }
}

/// A single event specification inside a sequence rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSpec {
    pub event: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub input: HashMap<String, Vec<FieldPattern>>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub count: Option<String>,
}

/// A cross-event sequence rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceRule {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub window: String,
    pub events: Vec<EventSpec>,
    pub decision: RuleDecision,
    #[serde(default)]
    pub message: String,
}

/// Trace storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub storage_path: String,
    #[serde(default)]
    pub session_ttl_hours: u64,
    #[serde(default)]
    pub max_events_per_session: u64,
    #[serde(default)]
    pub cleanup_probability: f64,
}

impl Default for TraceSettings {
    fn default() -> Self {
        // Zero, not the operational defaults: this is the `#[serde(default)]`
        // path a project config hits when it omits `trace:` entirely, and
        // `is_zero()`/`merge_settings` rely on it being indistinguishable
        // from "nothing set" so such a config doesn't clobber the global
        // layer's trace settings. The 24h/10_000/0.1 operational defaults
        // live in `TraceStore::open_default`.
        Self {
            enabled: false,
            storage_path: String::new(),
            session_ttl_hours: 0,
            max_events_per_session: 0,
            cleanup_probability: 0.0,
        }
    }
}

impl TraceSettings {
    fn is_zero(&self) -> bool {
        !self.enabled
            && self.storage_path.is_empty()
            && self.session_ttl_hours == 0
            && self.max_events_per_session == 0
            && self.cleanup_probability == 0.0
    }
}

/// Daemon settings (daemon lifecycle itself is out of scope; this is read-only config).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bind_address: String,
}

impl DaemonSettings {
    fn is_zero(&self) -> bool {
        !self.enabled && self.bind_address.is_empty()
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: String,
    #[serde(default)]
    pub log_file: String,
    #[serde(default)]
    pub default_decision: String,
    #[serde(default)]
    pub trace: TraceSettings,
    #[serde(default)]
    pub daemon: DaemonSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: String::new(),
            default_decision: "allow".to_string(),
            trace: TraceSettings::default(),
            daemon: DaemonSettings::default(),
        }
    }
}

/// Top-level configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub rules: HashMap<String, Vec<Rule>>,
    #[serde(default)]
    pub allowlist: Vec<Rule>,
    #[serde(default)]
    pub sequence_rules: Vec<SequenceRule>,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: String::new(),
            settings: Settings::default(),
            rules: HashMap::new(),
            allowlist: Vec::new(),
            sequence_rules: Vec::new(),
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    /// Rules for one event kind, in evaluation order (already priority-sorted).
    pub fn rules_for(&self, event_kind: &str) -> &[Rule] {
        self.rules
            .get(event_kind)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Validate every rule's regex compiles and every decision string is recognised.
    pub fn validate(&self, matcher: &PatternMatcher) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        let mut check_rule = |rule: &Rule| {
            if !rule.conditions.tool_name.is_empty() {
                if let Err(e) = matcher.compile(&rule.conditions.tool_name) {
                    errors.push(ConfigError::InvalidRulePattern {
                        name: rule.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
            for patterns in rule.conditions.input.values() {
                for fp in patterns {
                    if let Err(e) = matcher.compile(&fp.pattern) {
                        errors.push(ConfigError::InvalidRulePattern {
                            name: rule.name.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            for fp in rule
                .conditions
                .response
                .iter()
                .chain(rule.conditions.prompt.iter())
            {
                if let Err(e) = matcher.compile(&fp.pattern) {
                    errors.push(ConfigError::InvalidRulePattern {
                        name: rule.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        };

        for rules in self.rules.values() {
            for rule in rules {
                check_rule(rule);
            }
        }
        for rule in &self.allowlist {
            check_rule(rule);
        }

        for rules in self.rules.values().chain(std::iter::once(&self.allowlist)) {
            for rule in rules {
                if !matches!(
                    rule.decision,
                    RuleDecision::Allow | RuleDecision::Deny | RuleDecision::Ask | RuleDecision::Block
                ) {
                    errors.push(ConfigError::InvalidDecision {
                        name: rule.name.clone(),
                        decision: rule.decision.as_str().to_string(),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

fn merge_string(base: &str, overlay: &str) -> String {
    if overlay.is_empty() {
        base.to_string()
    } else {
        overlay.to_string()
    }
}

fn merge_rule_lists(base: &[Rule], overlay: &[Rule]) -> Vec<Rule> {
    let mut by_name: HashMap<String, Rule> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for rule in base {
        if !by_name.contains_key(&rule.name) {
            order.push(rule.name.clone());
        }
        by_name.insert(rule.name.clone(), rule.clone());
    }
    for rule in overlay {
        if !by_name.contains_key(&rule.name) {
            order.push(rule.name.clone());
        }
        by_name.insert(rule.name.clone(), rule.clone());
    }
    let mut merged: Vec<Rule> = order.into_iter().map(|n| by_name.remove(&n).unwrap()).collect();
    // Stable sort: equal priorities retain insertion order.
    merged.sort_by_key(|r| std::cmp::Reverse(r.priority));
    merged
}

fn merge_sequence_rules(base: &[SequenceRule], overlay: &[SequenceRule]) -> Vec<SequenceRule> {
    let mut by_name: HashMap<String, SequenceRule> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for rule in base {
        if !by_name.contains_key(&rule.name) {
            order.push(rule.name.clone());
        }
        by_name.insert(rule.name.clone(), rule.clone());
    }
    for rule in overlay {
        if !by_name.contains_key(&rule.name) {
            order.push(rule.name.clone());
        }
        by_name.insert(rule.name.clone(), rule.clone());
    }
    order.into_iter().map(|n| by_name.remove(&n).unwrap()).collect()
}

fn merge_settings(base: &Settings, overlay: &Settings) -> Settings {
    Settings {
        log_level: merge_string(&base.log_level, &overlay.log_level),
        log_file: merge_string(&base.log_file, &overlay.log_file),
        default_decision: merge_string(&base.default_decision, &overlay.default_decision),
        trace: if overlay.trace.is_zero() {
            base.trace.clone()
        } else {
            overlay.trace.clone()
        },
        daemon: if overlay.daemon.is_zero() {
            base.daemon.clone()
        } else {
            overlay.daemon.clone()
        },
    }
}

/// Merge `overlay` over `base`, per the rules in the spec: strings prefer
/// non-empty override, sub-structs merge only when not entirely zero, rule
/// lists union by name with override-wins, then priority-sort descending.
pub fn merge_config(base: &Config, overlay: &Config) -> Config {
    let mut rules: HashMap<String, Vec<Rule>> = HashMap::new();
    for kind in base.rules.keys().chain(overlay.rules.keys()) {
        if rules.contains_key(kind) {
            continue;
        }
        let base_rules = base.rules.get(kind).map(|v| v.as_slice()).unwrap_or(&[]);
        let overlay_rules = overlay.rules.get(kind).map(|v| v.as_slice()).unwrap_or(&[]);
        rules.insert(kind.clone(), merge_rule_lists(base_rules, overlay_rules));
    }

    Config {
        version: merge_string(&base.version, &overlay.version),
        settings: merge_settings(&base.settings, &overlay.settings),
        rules,
        allowlist: merge_rule_lists(&base.allowlist, &overlay.allowlist),
        sequence_rules: merge_sequence_rules(&base.sequence_rules, &overlay.sequence_rules),
        llm: overlay.llm.merged_over(&base.llm),
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Resolve the global config path: `<home>/.hooksy/config.yaml`.
pub fn global_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hooksy")
        .join("config.yaml")
}

/// Resolve the project config path: `<project_dir>/.hooksy/config.yaml`.
pub fn project_config_path(project_dir: Option<&Path>) -> PathBuf {
    let base = project_dir
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    base.join(".hooksy").join("config.yaml")
}

/// Load a single config file verbatim (no merging).
pub fn load_from_file(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn load_if_present(path: &Path) -> Result<Option<Config>, ConfigError> {
    if path.exists() {
        Ok(Some(load_from_file(path)?))
    } else {
        Ok(None)
    }
}

/// Load default config, merged with global then project layers.
pub fn load(project_dir: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    if let Some(global) = load_if_present(&global_config_path())? {
        config = merge_config(&config, &global);
    }
    if let Some(project) = load_if_present(&project_config_path(project_dir))? {
        config = merge_config(&config, &project);
    }
    Ok(config)
}

/// Load default config merged with the global layer only (used by the daemon).
pub fn load_global_only() -> Result<Config, ConfigError> {
    let mut config = Config::default();
    if let Some(global) = load_if_present(&global_config_path())? {
        config = merge_config(&config, &global);
    }
    Ok(config)
}
