//! `hooksy inspect`: the only subcommand that drives the core decision path.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;

use hooksy_core::config::Config;
use hooksy_core::engine::InspectionEngine;
use hooksy_core::event::HookEventKind;
use hooksy_core::llm::manager::LlmManager;
use hooksy_core::llm::providers::build_providers;
use hooksy_core::trace_store::TraceStore;

pub async fn run(config: Config, event: &str, dry_run: bool) -> Result<()> {
    let kind = HookEventKind::parse(event).context("unrecognised --event kind")?;

    let trace_store = if config.settings.trace.enabled {
        match TraceStore::open_default(
            &config.settings.trace.storage_path,
            config.settings.trace.session_ttl_hours,
            config.settings.trace.max_events_per_session,
            config.settings.trace.cleanup_probability,
        ) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::debug!(error = %e, "trace store unavailable, continuing without tracing");
                None
            }
        }
    } else {
        None
    };

    let llm_manager = if config.llm.enabled {
        let providers = build_providers(&config.llm.providers);
        Some(Arc::new(LlmManager::new(
            providers,
            Duration::from_secs(config.llm.cache_ttl_seconds),
            config.llm.rate_limit_per_minute,
            config.llm.burst,
            config.llm.daily_budget_usd,
        )))
    } else {
        None
    };

    let mut bytes = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut bytes)
        .await
        .context("failed to read hook event from stdin")?;

    let engine = InspectionEngine::new(config, trace_store, llm_manager, dry_run);
    let output = engine.inspect(&bytes, kind).await.context("inspection failed")?;

    let json = serde_json::to_string(&output).context("failed to serialize decision output")?;
    println!("{json}");
    Ok(())
}
