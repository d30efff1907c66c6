//! Logging setup for binaries and tests embedding the engine.

use tracing_subscriber::EnvFilter;

/// Environment variable consulted before `RUST_LOG`
pub const LOG_ENV: &str = "NODEFLOW_LOG";

/// Install a global fmt subscriber.
///
/// The filter comes from `NODEFLOW_LOG`, then `RUST_LOG`, then `default_filter`.
/// Calling this twice is harmless: the second install is ignored.
pub fn init_tracing(default_filter: &str) {
    let filter = std::env::var(LOG_ENV)
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
