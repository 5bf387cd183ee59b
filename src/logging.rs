//! Diagnostics setup. Standard output carries tailed lines only, so every log
//! record goes to standard error.

use tracing_subscriber::EnvFilter;

/// Builds the log filter: `RUST_LOG` when set, otherwise `default_filter`,
/// otherwise `info`.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Later calls are ignored.
pub fn init(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
