//! Error types for the bootstrap layer.

use thiserror::Error;
use voxlink_identity::IdentityError;

/// Result type for bootstrap operations.
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Errors that can occur during device bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Identity store failure (corrupt or unwritable record).
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// The provisioning service could not be reached. The whole
    /// bootstrap may be retried by the caller; nothing retries this
    /// internally.
    #[error("provisioning service unreachable: {0}")]
    Unreachable(String),

    /// The provisioning service replied outside the protocol contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server explicitly refused the activation proof.
    #[error("activation rejected by server: {0}")]
    ActivationRejected(String),

    /// Activation polling exhausted its attempt or time budget.
    #[error("activation timed out after {attempts} attempts ({waited_secs}s); the verification code was never confirmed")]
    ActivationTimedOut {
        /// Submissions made before giving up.
        attempts: u32,
        /// Wall-clock seconds spent polling.
        waited_secs: u64,
    },

    /// The bootstrap was cancelled by the caller.
    #[error("bootstrap cancelled")]
    Cancelled,

    /// Local settings could not be read or written.
    #[error("settings error: {0}")]
    Settings(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
