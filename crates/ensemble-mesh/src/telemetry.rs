//! # Telemetry
//!
//! Installs a `tracing` subscriber for binaries embedding the router.
//! `RUST_LOG` takes precedence over the default filter.

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Subscriber installation failed.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directive could not be parsed.
    #[error("Invalid log filter: {0}")]
    Filter(String),

    /// A global subscriber is already installed.
    #[error("Failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Install a formatted subscriber filtered by `RUST_LOG` or `default_filter`
/// (e.g. `"ensemble_mesh=debug"`).
///
/// # Errors
///
/// Fails on an unparsable filter or if called more than once per process.
pub fn init_tracing(default_filter: &str) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| TelemetryError::Filter(e.to_string()))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    tracing::info!(version = crate::VERSION, "[mesh] tracing initialized");
    Ok(())
}
