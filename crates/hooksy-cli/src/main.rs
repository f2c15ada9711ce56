mod cli;
mod commands;
mod logging;

use clap::Parser;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match hooksy_core::config::load(cli.project_dir.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: failed to load config: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&config.settings.log_level);

    let result = match cli.command {
        Commands::Inspect { event, dry_run } => {
            commands::inspect::run(config, &event, dry_run).await
        }
        Commands::Init { global, force } => {
            commands::init::run(cli.project_dir.as_deref(), global, force)
        }
        Commands::Validate => commands::validate::run(config),
        Commands::Rules { command } => commands::rules::run(config, command),
        Commands::GenerateHooks => commands::generate_hooks::run(),
        Commands::Trace { command } => commands::trace::run(config, command),
        Commands::Llm { command } => commands::llm::run(config, command).await,
        Commands::Daemon { command } => commands::daemon::run(command),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
