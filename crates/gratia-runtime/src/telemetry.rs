//! Logging setup

use gratia_core::{GratiaError, GratiaResult};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `tracing` subscriber
///
/// `RUST_LOG` wins over `default_filter`. Returns `Ok(false)` when a
/// subscriber was already installed (e.g. by another test).
pub fn init_tracing(default_filter: &str, json: bool) -> GratiaResult<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| GratiaError::InvalidConfig(format!("log filter {default_filter:?}: {e}")))?,
    };

    let installed = if json {
        fmt().json().with_env_filter(filter).try_init().is_ok()
    } else {
        fmt().with_env_filter(filter).with_target(true).try_init().is_ok()
    };
    Ok(installed)
}
