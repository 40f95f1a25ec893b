//! Tracing subscriber setup

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Logging setup failures
#[derive(Error, Debug)]
pub enum LoggingError {
    /// Neither `RUST_LOG` nor the fallback directive parsed
    #[error("Invalid log filter '{directive}': {reason}")]
    InvalidFilter {
        /// Directive that was rejected
        directive: String,
        /// Parser message
        reason: String,
    },

    /// A global subscriber is already installed
    #[error("Logging already initialized: {reason}")]
    AlreadyInitialized {
        /// Subscriber error text
        reason: String,
    },
}

/// Build the filter from `RUST_LOG`, falling back to `fallback`
pub fn env_filter(fallback: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(fallback).map_err(|e| LoggingError::InvalidFilter {
            directive: fallback.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Install the fmt subscriber, returning an error if one is already set
pub fn try_init_logging(fallback: &str) -> Result<(), LoggingError> {
    let filter = env_filter(fallback)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized {
            reason: e.to_string(),
        })
}

/// Install the fmt subscriber.
///
/// A second call, or a bad fallback directive, is logged to stderr and
/// otherwise ignored.
pub fn init_logging(fallback: &str) {
    if let Err(e) = try_init_logging(fallback) {
        eprintln!("camlink: {}", e);
    }
}
