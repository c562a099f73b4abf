//! Error types for the identity module.

use thiserror::Error;

/// Identity-specific errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The identity record exists but cannot be repaired in place
    /// (e.g. the record path is occupied by a directory).
    #[error("identity record corrupt and not repairable: {0}")]
    Corrupt(String),

    /// The identity record could not be written to disk.
    #[error("identity persistence failed: {0}")]
    Persistence(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The stored signing key is not valid hex key material.
    #[error("invalid signing key material: {0}")]
    InvalidKey(String),

    /// A challenge to sign was empty.
    #[error("cannot sign an empty challenge")]
    EmptyChallenge,
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
