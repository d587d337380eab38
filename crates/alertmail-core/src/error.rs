//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Relay configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Credential storage error.
    #[error("Credential error: {0}")]
    Credential(#[from] crate::credentials::CredentialError),

    /// Alert delivery failed.
    #[error("Delivery error: {0}")]
    Delivery(#[from] crate::delivery::DeliveryError),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
