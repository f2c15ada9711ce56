//! `hooksy llm status|test`: inspect the optional semantic-analysis layer.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use hooksy_core::config::Config;
use hooksy_core::llm::manager::LlmManager;
use hooksy_core::llm::prompt::tool_call_prompt;
use hooksy_core::llm::providers::build_providers;

use crate::cli::LlmCommands;

pub async fn run(config: Config, command: LlmCommands) -> Result<()> {
    match command {
        LlmCommands::Status => status(&config),
        LlmCommands::Test { tool_name, input } => test(&config, &tool_name, &input).await,
    }
}

fn status(config: &Config) -> Result<()> {
    if !config.llm.enabled {
        println!("llm analysis disabled");
        return Ok(());
    }
    let providers = build_providers(&config.llm.providers);
    if providers.is_empty() {
        println!("llm analysis enabled, but no providers are usable (check api key env vars)");
        return Ok(());
    }
    for provider in &providers {
        println!("{}  available={}", provider.name(), provider.available());
    }
    Ok(())
}

async fn test(config: &Config, tool_name: &str, input_json: &str) -> Result<()> {
    if !config.llm.enabled {
        bail!("llm analysis is disabled in config");
    }
    let input_value: Value = serde_json::from_str(input_json).context("--input is not valid JSON")?;
    let input: HashMap<String, Value> = input_value
        .as_object()
        .context("--input must be a JSON object")?
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let providers = build_providers(&config.llm.providers);
    if providers.is_empty() {
        bail!("no usable llm providers (check api key env vars)");
    }
    let manager = LlmManager::new(
        providers,
        Duration::from_secs(config.llm.cache_ttl_seconds),
        config.llm.rate_limit_per_minute,
        config.llm.burst,
        config.llm.daily_budget_usd,
    );

    let request = tool_call_prompt(tool_name, &input, &[], 256);
    let cache_key = format!("cli-test:{tool_name}");
    let response = manager
        .analyze(request, &cache_key)
        .await
        .context("llm analysis call failed")?;

    println!("provider: {}", response.provider);
    println!("model: {}", response.model);
    println!("confidence: {}", response.confidence);
    println!("{}", response.text);
    Ok(())
}
