//! `hooksy trace list|show|clear|analyze`: inspect persisted session traces.

use anyhow::{bail, Context, Result};

use hooksy_core::config::Config;
use hooksy_core::trace_store::TraceStore;
use hooksy_core::transcript::analyze_file;

use crate::cli::TraceCommands;

pub fn run(config: Config, command: TraceCommands) -> Result<()> {
    let store = TraceStore::open_default(
        &config.settings.trace.storage_path,
        config.settings.trace.session_ttl_hours,
        config.settings.trace.max_events_per_session,
        config.settings.trace.cleanup_probability,
    )
    .context("failed to open trace store")?;

    match command {
        TraceCommands::List => list(&store),
        TraceCommands::Show { session_id, limit } => show(&store, &session_id, limit),
        TraceCommands::Clear { session_id } => clear(&store, &session_id),
        TraceCommands::Analyze { session_id } => analyze(&store, &session_id),
    }
}

fn list(store: &TraceStore) -> Result<()> {
    let sessions = store.list_sessions().context("failed to list sessions")?;
    if sessions.is_empty() {
        println!("no sessions recorded");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{}  created {}  last seen {}  cwd {}",
            session.session_id, session.created_at, session.last_seen_at, session.cwd
        );
    }
    Ok(())
}

fn show(store: &TraceStore, session_id: &str, limit: u64) -> Result<()> {
    let events = store
        .get_recent_events(session_id, limit)
        .context("failed to load events")?;
    if events.is_empty() {
        println!("no events for session {session_id}");
        return Ok(());
    }
    for event in events {
        println!(
            "{}  {}  {}  decision={}  rule={}",
            event.timestamp,
            event.event_type,
            event.tool_name.as_deref().unwrap_or("-"),
            event.decision.as_deref().unwrap_or("-"),
            event.rule_matched.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn clear(store: &TraceStore, session_id: &str) -> Result<()> {
    store.delete_session(session_id).context("failed to delete session")?;
    println!("cleared session {session_id}");
    Ok(())
}

fn analyze(store: &TraceStore, session_id: &str) -> Result<()> {
    let sessions = store.list_sessions().context("failed to list sessions")?;
    let session = sessions
        .into_iter()
        .find(|s| s.session_id == session_id)
        .with_context(|| format!("unknown session {session_id}"))?;

    if session.transcript_path.is_empty() {
        bail!("session {session_id} has no recorded transcript path");
    }

    let analysis = analyze_file(std::path::Path::new(&session.transcript_path))
        .context("failed to analyze transcript")?;
    println!("{}", analysis.summary());
    Ok(())
}
