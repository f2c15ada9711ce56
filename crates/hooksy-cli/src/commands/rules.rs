//! `hooksy rules list|test`: inspect configured rules without a live event.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde_json::Value;

use hooksy_core::config::Config;
use hooksy_core::matcher::PatternMatcher;
use hooksy_core::rule::RuleEvaluator;

use crate::cli::RulesCommands;

pub fn run(config: Config, command: RulesCommands) -> Result<()> {
    match command {
        RulesCommands::List { event } => list(&config, event.as_deref()),
        RulesCommands::Test { event, tool_name, input } => test(&config, &event, &tool_name, &input),
    }
}

fn list(config: &Config, event: Option<&str>) -> Result<()> {
    let kinds: Vec<&str> = match event {
        Some(e) => vec![e],
        None => config.rules.keys().map(String::as_str).collect(),
    };
    for kind in kinds {
        println!("{kind}:");
        for rule in config.rules_for(kind) {
            println!(
                "  [{:>4}] {:<24} {} {}",
                rule.priority,
                rule.name,
                rule.decision.as_str(),
                if rule.enabled { "" } else { "(disabled)" }
            );
        }
    }
    if !config.allowlist.is_empty() {
        println!("allowlist:");
        for rule in &config.allowlist {
            println!("  [{:>4}] {}", rule.priority, rule.name);
        }
    }
    Ok(())
}

fn test(config: &Config, event: &str, tool_name: &str, input_json: &str) -> Result<()> {
    let input_value: Value = serde_json::from_str(input_json).context("--input is not valid JSON")?;
    let input: HashMap<String, Value> = input_value
        .as_object()
        .context("--input must be a JSON object")?
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let matcher = PatternMatcher::new();
    let evaluator = RuleEvaluator::new(&matcher);
    let rules = config.rules_for(event);

    let matched = match event {
        "PostToolUse" => {
            evaluator.evaluate_post_tool_use(rules, &config.allowlist, tool_name, &input, &HashMap::new())
        }
        _ => evaluator.evaluate_pre_tool_use(rules, &config.allowlist, tool_name, &input),
    };

    match matched {
        Some(m) => println!("{} -> {} ({})", m.rule.name, m.decision.as_str(), m.message),
        None => println!("no rule matched (default decision: {})", config.settings.default_decision),
    }
    Ok(())
}
