//! Tracing subscriber setup for hosts embedding the engine.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Error, Result};

/// Install a global `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"graphloom=debug"`).
///
/// Fails if a global subscriber is already installed.
pub fn try_init(default_directive: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .map_err(|e| Error::Telemetry(format!("invalid directive '{}': {}", default_directive, e)))?,
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init()
        .map_err(|e| Error::Telemetry(e.to_string()))
}
