//! Error types for meter-rs

use thiserror::Error;

/// Result type alias for meter operations
pub type Result<T> = std::result::Result<T, MeterError>;

/// Meter error types
///
/// Only `InvalidIdentity` is ever returned by the meter itself; the other
/// variants come from startup (configuration, binding the listener).
#[derive(Error, Debug)]
pub enum MeterError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Identity was empty after normalization
    #[error("Invalid identity: {0:?}")]
    InvalidIdentity(String),
}

/// Quota store failures
///
/// None of these reach a caller of the meter. They select the fail-open
/// or write-error branch and are logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No endpoint or credential configured
    #[error("quota store not configured")]
    NotConfigured,

    /// Transport, timeout, status or protocol failure
    #[error("quota store unavailable: {0}")]
    Unavailable(String),

    /// Store answered but did not confirm the write
    #[error("quota store rejected write: {0}")]
    WriteRejected(String),
}
