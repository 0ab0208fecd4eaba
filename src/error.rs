//! Error types for the Turnstile gate.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// Only startup can fail. Once a gate is built, every request ends in
/// either an admit or a reject decision.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for TurnstileError {
    fn from(err: ::config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
