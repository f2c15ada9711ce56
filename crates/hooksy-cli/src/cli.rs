//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Security inspection gateway for AI coding assistant hook events.
#[derive(Parser, Debug)]
#[command(name = "hooksy", version, about)]
pub struct Cli {
    /// Project directory to resolve `.hooksy/config.yaml` against (defaults to cwd).
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read one hook event from stdin and emit a decision on stdout.
    Inspect {
        /// The hook event kind this input carries.
        #[arg(long)]
        event: String,
        /// Rewrite any `deny` decision to a tagged `allow` instead of enforcing it.
        #[arg(long)]
        dry_run: bool,
    },
    /// Write a starter config file.
    Init {
        /// Write to the global config path instead of the project path.
        #[arg(long)]
        global: bool,
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
    /// Load and validate the merged configuration without running an inspection.
    Validate,
    /// Inspect configured rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// Print the hook registration block for Claude Code's settings file.
    GenerateHooks,
    /// Inspect persisted session traces.
    Trace {
        #[command(subcommand)]
        command: TraceCommands,
    },
    /// Inspect the LLM semantic-analysis layer.
    Llm {
        #[command(subcommand)]
        command: LlmCommands,
    },
    /// Dashboard daemon lifecycle (out of scope for this gateway's core).
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum RulesCommands {
    /// List configured rules for one event kind (or every kind).
    List {
        #[arg(long)]
        event: Option<String>,
    },
    /// Evaluate rules for one event kind against a synthetic tool call.
    Test {
        #[arg(long)]
        event: String,
        #[arg(long)]
        tool_name: String,
        /// Tool input as a JSON object.
        #[arg(long, default_value = "{}")]
        input: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum TraceCommands {
    /// List known sessions.
    List,
    /// Show recent events for one session.
    Show {
        session_id: String,
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
    /// Delete a session's trace history.
    Clear { session_id: String },
    /// Run the transcript risk analyzer against a session's transcript.
    Analyze { session_id: String },
}

#[derive(Subcommand, Debug)]
pub enum LlmCommands {
    /// Report which configured providers are currently usable.
    Status,
    /// Send one fixed analysis request through the configured providers.
    Test {
        #[arg(long, default_value = "Bash")]
        tool_name: String,
        #[arg(long, default_value = "{}")]
        input: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommands {
    Start,
    Stop,
    Status,
}
