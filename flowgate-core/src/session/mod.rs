//! Session lifecycle: restore, sign-in/up/out and token refresh.

mod store;
mod types;

pub use store::{SessionStore, SessionStoreConfig};
pub use types::{Session, SessionState, SignUpOutcome, SignedOutReason};
