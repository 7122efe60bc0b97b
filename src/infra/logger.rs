// src/infra/logger.rs — Structured logging with tracing
//
// Logs go to stderr so `fieldwatch status` output on stdout stays clean.

use tracing_subscriber::{fmt, EnvFilter};

/// RUST_LOG takes precedence over `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
