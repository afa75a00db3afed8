//! `flowgate-core` decides which top-level flow a FlowGate client shows.
//!
//! It reconciles three asynchronously arriving facts: the persisted session, the
//! live validity of that session, and the completeness of the user's profile.
//! The pieces are explicitly constructed and injected into each other:
//!
//! ```ignore
//! let credentials = Arc::new(SecureCredentialStore::from_provider(provider));
//! let backend: Arc<dyn BackendClient> =
//!     Arc::new(RestBackend::new(ClientConfig::from_environment(&Environment::Production, api_key))?);
//! let session = Arc::new(SessionStore::new(credentials, backend.clone()));
//! let profile = Arc::new(ProfileStore::new(session.clone(), backend));
//! let coordinator = Arc::new(AppCoordinator::new(session, profile));
//!
//! // the router shows a neutral loading screen until this resolves
//! let route = coordinator.clone().start().await;
//! match coordinator.presentable_route().await { /* ... */ }
//! ```
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use strum::EnumString;

/// Backend deployment targeted by the client.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    /// Pre-production deployment.
    Staging,
    /// Production deployment.
    Production,
}

pub mod backend;
pub use backend::{AuthUser, BackendClient, BackendError, RestBackend, SignUpResult};

mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

pub mod defaults;
pub use defaults::ClientConfig;

mod error;
pub use error::*;

pub mod locale;
pub use locale::Language;

pub mod logger;

pub mod navigation;
pub use navigation::{
    gate, AppCoordinator, CoordinatorConfig, NavigationTarget, RouteObserver, RouteState,
    RouteSubscription, SplashTimer,
};

pub mod profile;
pub use profile::{
    MainGoal, Profile, ProfilePatch, ProfileStore, ProfileStoreConfig, UpdateHandle,
};

pub mod session;
pub use session::{
    Session, SessionState, SessionStore, SessionStoreConfig, SignUpOutcome,
    SignedOutReason,
};

pub mod storage;
pub use storage::{
    DeviceKeystore, ItemStore, MemoryItemStore, SecureCredentialStore, StorageError,
    StorageProvider, StorageResult,
};

uniffi::setup_scaffolding!("flowgate_core");
