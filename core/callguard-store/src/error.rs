//! Error types for the license record store.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No license with the given key.
    #[error("license not found: {0}")]
    NotFound(String),

    /// The license is already bound to a different hardware fingerprint.
    #[error("license {key} is bound to different hardware")]
    HardwareMismatch { key: String },

    /// Every generated key collided with an existing one.
    #[error("could not generate a unique license key after {0} attempts")]
    DuplicateKey(u32),

    /// A stored row could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,
}
