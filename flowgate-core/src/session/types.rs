use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Authenticated identity and token material for the current user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
pub struct Session {
    /// Backend user id the tokens were issued for.
    pub user_id: String,
    /// Bearer token for backend calls.
    pub access_token: String,
    /// Token used to obtain a new token pair.
    pub refresh_token: String,
    /// Unix timestamp (seconds) at which `access_token` expires.
    pub expires_at: u64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Session {
    /// Whether the access token is expired at `now`.
    #[must_use]
    pub const fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Whether the access token expires within `grace_secs` of `now`.
    #[must_use]
    pub const fn needs_refresh(&self, now: u64, grace_secs: u64) -> bool {
        now.saturating_add(grace_secs) >= self.expires_at
    }

    /// Overwrites the token material in place.
    pub(crate) fn wipe(&mut self) {
        self.access_token.zeroize();
        self.refresh_token.zeroize();
    }
}

/// Why the store is unauthenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SignedOutReason {
    /// Nothing was persisted (fresh install or previous sign-out).
    NoSession,
    /// The user signed out.
    SignedOut,
    /// The session could not be refreshed. Forces the pre-auth flow.
    Expired,
    /// A persisted session was present but could not be validated.
    RestoreFailed,
    /// The last sign-in or sign-up attempt failed.
    AuthFailed,
}

/// Session lifecycle.
///
/// `Uninitialized → Restoring → {Unauthenticated, Authenticated}`, and from
/// `Authenticated`: `Refreshing → Authenticated | Unauthenticated(Expired)`.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum SessionState {
    /// `initialize` has not been called.
    Uninitialized,
    /// The persisted session is being read and validated.
    Restoring,
    /// No usable session.
    Unauthenticated {
        /// How the store got here.
        reason: SignedOutReason,
    },
    /// A validated session is available.
    Authenticated {
        /// The current session.
        session: Session,
    },
    /// The token pair is being rotated. The previous session remains in effect.
    Refreshing {
        /// The session being refreshed.
        session: Session,
    },
}

impl SessionState {
    /// The session in effect, if any. `Refreshing` still counts as signed in.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        match self {
            Self::Authenticated { session } | Self::Refreshing { session } => Some(session),
            Self::Uninitialized | Self::Restoring | Self::Unauthenticated { .. } => None,
        }
    }

    /// Whether restore has finished (successfully or not).
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        !matches!(self, Self::Uninitialized | Self::Restoring)
    }
}

/// Outcome of a sign-up.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum SignUpOutcome {
    /// The account was created and a session established.
    SignedIn {
        /// The new session.
        session: Session,
    },
    /// The account was created but the backend requires email confirmation first.
    ConfirmationRequired {
        /// The new user's id.
        user_id: String,
    },
}
