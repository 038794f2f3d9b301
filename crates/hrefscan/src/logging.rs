//! Logging init: structured `tracing` events to stderr.
//!
//! Stdout belongs to the report, so diagnostics never go there. The filter is
//! read from `HREFSCAN_LOG`, then `RUST_LOG`, and defaults to `warn`.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "HREFSCAN_LOG";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install the global subscriber. Errors if one is already installed.
pub fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("logging init failed: {e}"))?;
    Ok(())
}
