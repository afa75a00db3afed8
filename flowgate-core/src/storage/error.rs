//! Error types for the secure credential store.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the secure credential store and its platform backends.
#[derive(Debug, Error, uniffi::Error)]
pub enum StorageError {
    /// Errors coming from the device keystore.
    #[error("keystore error: {0}")]
    Keystore(String),

    /// Errors coming from the platform item store.
    #[error("item store error: {0}")]
    ItemStore(String),

    /// Serialization/deserialization failures.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Cryptographic failures (AEAD open/seal).
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A sealed value could not be decoded before opening.
    #[error("invalid sealed value: {0}")]
    InvalidSealedValue(String),

    /// Unsupported persisted session record version.
    #[error("unsupported record version: {0}")]
    UnsupportedRecordVersion(u32),

    /// Unexpected `UniFFI` callback error.
    #[error("unexpected uniffi callback error: {0}")]
    UnexpectedUniFFICallbackError(String),
}

impl From<uniffi::UnexpectedUniFFICallbackError> for StorageError {
    fn from(error: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError(error.reason)
    }
}
