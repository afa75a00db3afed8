use thiserror::Error;

use crate::backend::BackendError;
use crate::storage::StorageError;

/// Error outputs from `FlowGate`
#[derive(Debug, Error, uniffi::Error)]
pub enum FlowGateError {
    /// The presented input is not valid for the requested operation
    #[error("invalid_input_{attribute}: {reason}")]
    InvalidInput {
        /// The attribute that is invalid
        attribute: String,
        /// The reason the input is invalid
        reason: String,
    },
    /// Email/password pair refused by the backend. Never retried.
    #[error("invalid_credentials")]
    InvalidCredentials,
    /// The session can no longer be refreshed. Terminal for the session.
    #[error("session_expired")]
    SessionExpired,
    /// The operation requires an authenticated session
    #[error("not_authenticated")]
    NotAuthenticated,
    /// The backend could not be reached (or answered with a transient failure)
    #[error("network_unreachable: {error}")]
    NetworkUnreachable {
        /// The error message
        error: String,
    },
    /// The persisted credential record could not be written or removed
    #[error("storage_write_failure: {error}")]
    StorageWriteFailure {
        /// The error message
        error: String,
    },
    /// A profile change could not be confirmed by the backend and was rolled back
    #[error("profile_persist_failure: {error}")]
    ProfilePersistFailure {
        /// The error message
        error: String,
    },
    /// The backend refused the request for a non-transient reason
    #[error("backend_rejected ({status:?}): {error}")]
    BackendRejected {
        /// HTTP status (if any)
        status: Option<u16>,
        /// The error message
        error: String,
    },
    /// Unexpected error serializing or deserializing information
    #[error("serialization_error: {error}")]
    SerializationError {
        /// The error message
        error: String,
    },
}

impl FlowGateError {
    /// Whether the error is worth retrying locally with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnreachable { .. } | Self::ProfilePersistFailure { .. }
        )
    }
}

impl From<BackendError> for FlowGateError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::InvalidCredentials => Self::InvalidCredentials,
            BackendError::SessionExpired => Self::SessionExpired,
            BackendError::NetworkUnreachable(error) => Self::NetworkUnreachable { error },
            BackendError::Rejected { status, message } => Self::BackendRejected {
                status: Some(status),
                error: message,
            },
            BackendError::Storage(error) => Self::BackendRejected {
                status: None,
                error: format!("asset storage: {error}"),
            },
            BackendError::InvalidResponse(error) => Self::SerializationError { error },
            BackendError::UnexpectedUniFFICallbackError(error) => Self::BackendRejected {
                status: None,
                error,
            },
        }
    }
}

impl From<StorageError> for FlowGateError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Serialization(error) => Self::SerializationError { error },
            StorageError::UnsupportedRecordVersion(version) => Self::SerializationError {
                error: format!("unsupported session record version {version}"),
            },
            other => Self::StorageWriteFailure {
                error: other.to_string(),
            },
        }
    }
}
