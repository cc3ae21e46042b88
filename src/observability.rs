//! Tracing setup.
//!
//! stdout carries the JSON-RPC stream, so every log line goes to stderr.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `level`; an
/// unparsable filter falls back to `info`. Returns `false` if a subscriber
/// was already installed.
pub fn init(level: &str) -> bool {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
