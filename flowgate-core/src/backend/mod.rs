//! Backend client contract.
//!
//! The stores only ever talk to the backend through [`BackendClient`]. Hosts may
//! implement it natively (bridging their own backend SDK through `UniFFI`) or use
//! the bundled [`RestBackend`].

use thiserror::Error;

use crate::profile::{Profile, ProfilePatch};
use crate::session::Session;

mod transport;
mod rest;

pub use rest::RestBackend;

/// Identity of the signed-in user as known by the backend.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct AuthUser {
    /// Backend user id.
    pub user_id: String,
    /// Email address, when the backend exposes it.
    pub email: Option<String>,
}

/// Result of a sign-up call.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct SignUpResult {
    /// The new user's id.
    pub user_id: String,
    /// The session, or `None` when email confirmation is pending.
    pub session: Option<Session>,
}

/// Errors reported by a [`BackendClient`].
#[derive(Debug, Error, uniffi::Error)]
pub enum BackendError {
    /// Email/password pair refused.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The token (access or refresh) is no longer accepted.
    #[error("session expired")]
    SessionExpired,

    /// Transport failure, timeout, rate limiting or a 5xx answer.
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The backend refused the request for a non-transient reason.
    #[error("rejected with status {status}: {message}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Message returned by the backend.
        message: String,
    },

    /// Asset storage refused the upload.
    #[error("storage error: {0}")]
    Storage(String),

    /// The backend answered with something that could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Unexpected `UniFFI` callback error.
    #[error("unexpected uniffi callback error: {0}")]
    UnexpectedUniFFICallbackError(String),
}

impl BackendError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkUnreachable(_))
    }
}

impl From<uniffi::UnexpectedUniFFICallbackError> for BackendError {
    fn from(error: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError(error.reason)
    }
}

/// Remote auth, profile and asset operations.
///
/// Calls that need authorization take the access token explicitly; the
/// implementation keeps no session state of its own.
#[uniffi::export(with_foreign)]
#[async_trait::async_trait]
pub trait BackendClient: Send + Sync {
    /// Creates an account.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` when the backend refuses the email/password pair.
    async fn sign_up(
        &self,
        email: String,
        password: String,
    ) -> Result<SignUpResult, BackendError>;

    /// Signs in with email and password.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` when the backend refuses the email/password pair.
    async fn sign_in(&self, email: String, password: String)
        -> Result<Session, BackendError>;

    /// Revokes the session remotely. Best-effort from the caller's point of view.
    ///
    /// # Errors
    ///
    /// Any transport or backend failure.
    async fn sign_out(&self, access_token: String) -> Result<(), BackendError>;

    /// Returns the live session matching `session`, `None` when the backend no
    /// longer recognizes it. The returned session may carry rotated tokens.
    ///
    /// # Errors
    ///
    /// Any transport or backend failure.
    async fn get_session(&self, session: Session) -> Result<Option<Session>, BackendError>;

    /// Exchanges a refresh token for a new token pair.
    ///
    /// # Errors
    ///
    /// `SessionExpired` when the refresh token is no longer accepted.
    async fn refresh_session(&self, refresh_token: String)
        -> Result<Session, BackendError>;

    /// Returns the user owning `access_token`, `None` when the token is not accepted.
    ///
    /// # Errors
    ///
    /// Any transport or backend failure.
    async fn get_user(&self, access_token: String) -> Result<Option<AuthUser>, BackendError>;

    /// Fetches the profile record of `user_id`. `None` when no record exists yet.
    ///
    /// # Errors
    ///
    /// Any transport or backend failure.
    async fn get_profile(
        &self,
        access_token: String,
        user_id: String,
    ) -> Result<Option<Profile>, BackendError>;

    /// Merges `patch` into the profile of `user_id`, creating the record if needed,
    /// and returns the stored profile.
    ///
    /// # Errors
    ///
    /// Any transport or backend failure.
    async fn update_profile(
        &self,
        access_token: String,
        user_id: String,
        patch: ProfilePatch,
    ) -> Result<Profile, BackendError>;

    /// Uploads an asset owned by `user_id` and returns its public URL.
    ///
    /// # Errors
    ///
    /// `Storage` when the upload is refused.
    async fn upload_asset(
        &self,
        access_token: String,
        user_id: String,
        name: String,
        bytes: Vec<u8>,
    ) -> Result<String, BackendError>;
}
