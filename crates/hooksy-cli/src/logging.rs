//! Logging setup: `tracing` + `EnvFilter`, configured from `settings.log_level`
//! unless `RUST_LOG` is set.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` always wins; otherwise
/// falls back to `log_level` from the merged config (`"info"` if empty).
pub fn init(log_level: &str) {
    let default_level = if log_level.is_empty() { "info" } else { log_level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
