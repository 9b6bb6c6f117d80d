//! Logging setup for Parley Server.
//!
//! Everything goes through `tracing`; this module only installs the
//! subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,parley_server=debug,parley_relay=debug";

/// Initialize structured logging for deployed environments.
///
/// # Configuration
///
/// Environment variables:
/// - `RUST_LOG`: Log filter (default: info, debug for parley crates)
/// - `PARLEY_LOG_FORMAT`: `json` for one JSON object per line, anything
///   else for compact text
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json = std::env::var("PARLEY_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;
    }

    tracing::info!(json, "Telemetry initialized");

    Ok(())
}

/// Initialize telemetry for local development.
///
/// Pretty, multi-line console output with file and line numbers.
pub fn init_local() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("Local telemetry initialized");

    Ok(())
}

/// Flush and shut down telemetry.
///
/// Call this before application exit.
pub fn shutdown() {
    tracing::info!("Telemetry shutdown complete");
}
