//! Logging setup
//!
//! The engine only emits `tracing` events. Embedders that have no subscriber
//! of their own can install a plain fmt subscriber here.

use apogy_core::{Error, Result};

use crate::config::EngineConfig;

/// Install a global fmt subscriber at the configured level
///
/// Returns `Ok(false)` if a global subscriber was already installed, which
/// is not an error: tests and embedders commonly install their own first.
///
/// # Errors
///
/// Returns `Validation` if the configured level is not a tracing level.
pub fn init(config: &EngineConfig) -> Result<bool> {
    let level = config.log_level()?;
    Ok(tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok())
}

/// Like [`init`] but for a bare level string
pub fn init_with_level(level: &str) -> Result<bool> {
    if level.parse::<tracing::Level>().is_err() {
        return Err(Error::validation(format!("invalid log level '{}'", level)));
    }
    init(&EngineConfig::default().with_log_level(level))
}
