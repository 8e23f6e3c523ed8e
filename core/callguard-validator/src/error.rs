//! Error types for the validator.

use callguard_license::RejectionReason;
use thiserror::Error;

/// Result type for validator operations.
pub type ValidatorResult<T> = Result<T, ValidatorError>;

/// Outcome of a failed call to the license server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The server answered with an authoritative refusal.
    #[error("rejected by license server: {0}")]
    Rejected(RejectionReason),

    /// Network failure, timeout, 5xx or an unreadable response.
    #[error("license server unreachable: {0}")]
    Transient(String),
}

/// Errors surfaced by the validator.
#[derive(Debug, Error)]
pub enum ValidatorError {
    /// No license key has been entered yet.
    #[error("no license key configured")]
    NoLicenseKey,

    /// A new key was entered while a request for the old one was in flight.
    #[error("license key changed during request")]
    KeyReplaced,

    /// The server refused the license; the session is now terminal.
    #[error("license rejected: {0}")]
    Rejected(RejectionReason),

    /// The server could not be reached; the session may be in grace.
    #[error("license server unreachable: {0}")]
    Transient(String),

    /// IO error on the session cache.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<ClientError> for ValidatorError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Rejected(reason) => Self::Rejected(reason),
            ClientError::Transient(msg) => Self::Transient(msg),
        }
    }
}
