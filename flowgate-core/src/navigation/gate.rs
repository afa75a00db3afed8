use crate::profile::Profile;
use crate::session::Session;

/// Top-level flow the router shows. Derived on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, uniffi::Enum)]
pub enum NavigationTarget {
    /// Sign-in / sign-up screens.
    PreAuth,
    /// The one-time onboarding flow.
    Onboarding,
    /// The main application.
    MainApp,
}

/// Computes the flow for a session and profile.
///
/// `session` must be `None` for an expired session (the session store never
/// hands one out). A profile owned by another user counts as absent.
#[must_use]
pub fn gate(session: Option<&Session>, profile: Option<&Profile>) -> NavigationTarget {
    let Some(session) = session else {
        return NavigationTarget::PreAuth;
    };
    match profile {
        Some(profile) if profile.user_id == session.user_id && profile.onboarding_completed => {
            NavigationTarget::MainApp
        }
        _ => NavigationTarget::Onboarding,
    }
}

/// Exported for foreign callers: see [`gate`].
#[uniffi::export(name = "gate")]
#[must_use]
#[allow(clippy::needless_pass_by_value)]
pub fn gate_ffi(session: Option<Session>, profile: Option<Profile>) -> NavigationTarget {
    gate(session.as_ref(), profile.as_ref())
}
