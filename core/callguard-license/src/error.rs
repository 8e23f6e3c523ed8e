//! Error types for the licensing primitives.

use thiserror::Error;

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Invalid license key format.
    #[error("invalid license key format: {0}")]
    InvalidKeyFormat(String),

    /// Hardware fingerprint is not a well-formed identifier.
    #[error("invalid hardware fingerprint: {0}")]
    InvalidFingerprint(String),
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
