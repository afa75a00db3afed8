use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::field::{ProfileFields, Ticket};
use super::types::{Profile, ProfilePatch};
use crate::backend::{BackendClient, BackendError};
use crate::defaults;
use crate::error::FlowGateError;
use crate::locale::Language;
use crate::session::{Session, SessionStore};

/// Retry policy for profile reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct ProfileStoreConfig {
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// First backoff delay.
    pub retry_min_delay: Duration,
    /// Upper bound of a single backoff delay.
    pub retry_max_delay: Duration,
}

impl Default for ProfileStoreConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::PROFILE_PERSIST_RETRIES,
            retry_min_delay: defaults::RETRY_MIN_DELAY,
            retry_max_delay: defaults::RETRY_MAX_DELAY,
        }
    }
}

#[derive(Default)]
struct Inner {
    fields: Option<ProfileFields>,
    /// User whose remote record was fetched, whether it existed or not.
    resolved_for: Option<String>,
    next_ticket: Ticket,
    /// `onboarding_completed = true` failed to persist and must be re-sent.
    stranded_onboarding: bool,
    /// Advanced by `clear`; in-flight calls from an older generation leave the cache alone.
    generation: u64,
}

/// Write-through cache of the signed-in user's profile.
///
/// Updates are applied optimistically, field by field. A field a call sent
/// takes the value of the last answer to arrive; the rest of an answer only
/// lands on fields no newer call has confirmed.
#[derive(uniffi::Object)]
pub struct ProfileStore {
    session: Arc<SessionStore>,
    backend: Arc<dyn BackendClient>,
    config: ProfileStoreConfig,
    inner: Mutex<Inner>,
    profile_tx: watch::Sender<Option<Profile>>,
}

impl std::fmt::Debug for ProfileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileStore")
            .field("profile", &self.profile())
            .finish_non_exhaustive()
    }
}

#[uniffi::export(async_runtime = "tokio")]
impl ProfileStore {
    /// Creates an empty store with the default retry policy.
    #[uniffi::constructor]
    #[must_use]
    pub fn new(session: Arc<SessionStore>, backend: Arc<dyn BackendClient>) -> Self {
        Self::with_config(session, backend, ProfileStoreConfig::default())
    }

    /// Creates an empty store with a custom retry policy.
    #[uniffi::constructor]
    #[must_use]
    pub fn with_config(
        session: Arc<SessionStore>,
        backend: Arc<dyn BackendClient>,
        config: ProfileStoreConfig,
    ) -> Self {
        let (profile_tx, _) = watch::channel(None);
        Self {
            session,
            backend,
            config,
            inner: Mutex::new(Inner {
                next_ticket: 1,
                ..Inner::default()
            }),
            profile_tx,
        }
    }

    /// The cached profile, including changes not yet confirmed.
    #[must_use]
    pub fn profile(&self) -> Option<Profile> {
        self.lock().fields.as_ref().map(ProfileFields::snapshot)
    }

    /// Fetches the profile of the signed-in user.
    ///
    /// `Ok(None)` when the user has no profile record yet or nobody is signed in.
    /// Changes still waiting on the backend are kept on top of the fetched values.
    ///
    /// # Errors
    ///
    /// The backend failure once transient errors have exhausted the retries.
    pub async fn load(&self) -> Result<Option<Profile>, FlowGateError> {
        let Some(session) = self.session.fresh_session().await? else {
            self.clear();
            return Ok(None);
        };
        // a load is ordered among updates so its row never overrides a newer answer
        let (generation, ticket) = {
            let mut inner = self.lock();
            let ticket = inner.next_ticket;
            inner.next_ticket += 1;
            (inner.generation, ticket)
        };

        let fetched = (|| async {
            self.backend
                .get_profile(session.access_token.clone(), session.user_id.clone())
                .await
        })
        .retry(self.backoff())
        .when(BackendError::is_transient)
        .notify(|err: &BackendError, delay: Duration| {
            log::debug!("retrying profile load in {delay:?}: {err}");
        })
        .await?;

        let fetched = fetched.filter(|profile| {
            let owned = profile.user_id == session.user_id;
            if !owned {
                log::warn!("backend returned a profile for another user, ignoring it");
            }
            owned
        });

        let mut inner = self.lock();
        if inner.generation != generation {
            return Ok(None);
        }
        let owned = inner
            .fields
            .as_ref()
            .is_some_and(|fields| fields.user_id() == session.user_id);
        match (owned, fetched) {
            (true, Some(profile)) => {
                if let Some(fields) = inner.fields.as_mut() {
                    fields.confirm(profile, ticket, &ProfilePatch::default());
                }
            }
            // record not created yet but local changes are in flight
            (true, None) => {}
            (false, fetched) => {
                inner.fields = fetched.map(|profile| ProfileFields::confirmed(profile, ticket));
            }
        }
        inner.resolved_for = Some(session.user_id);
        Ok(self.publish(&inner))
    }

    /// Merges `patch` into the profile and persists it.
    ///
    /// The change is visible immediately. Transient failures are retried with
    /// exponential backoff; when retries run out, every field of this call that
    /// no later call has touched is rolled back. `onboarding_completed = true`
    /// is never rolled back: it stays visible and is re-sent by the next update
    /// or [`ProfileStore::flush`].
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` without a session.
    /// - `ProfilePersistFailure` when transient failures exhausted the retries.
    /// - `SessionExpired` or `BackendRejected` when the backend refused the change.
    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<Profile, FlowGateError> {
        let session = self
            .session
            .fresh_session()
            .await?
            .ok_or(FlowGateError::NotAuthenticated)?;

        let Some((ticket, sent, generation)) = self.apply(&session, patch) else {
            return self.profile().ok_or(FlowGateError::NotAuthenticated);
        };

        let result = (|| async {
            self.backend
                .update_profile(
                    session.access_token.clone(),
                    session.user_id.clone(),
                    sent.clone(),
                )
                .await
        })
        .retry(self.backoff())
        .when(BackendError::is_transient)
        .notify(|err: &BackendError, delay: Duration| {
            log::debug!("retrying profile update in {delay:?}: {err}");
        })
        .await;

        let mut inner = self.lock();
        let owned = inner.generation == generation
            && inner
                .fields
                .as_ref()
                .is_some_and(|fields| fields.user_id() == session.user_id);
        if !owned {
            // cleared or switched user while in flight
            return result.map_err(FlowGateError::from);
        }

        let outcome = match result {
            Ok(stored) => {
                if let Some(fields) = inner.fields.as_mut() {
                    fields.confirm(stored, ticket, &sent);
                }
                Ok(())
            }
            Err(err) => {
                if inner.fields.as_mut().is_some_and(|fields| fields.roll_back(ticket)) {
                    log::warn!("onboarding completion not persisted, will re-send");
                    inner.stranded_onboarding = true;
                }
                log::error!("profile update failed: {err}");
                Err(match err {
                    BackendError::NetworkUnreachable(error) => {
                        FlowGateError::ProfilePersistFailure { error }
                    }
                    other => other.into(),
                })
            }
        };
        let profile = self.publish(&inner);
        drop(inner);

        outcome?;
        profile.ok_or(FlowGateError::NotAuthenticated)
    }

    /// Changes the UI language.
    ///
    /// # Errors
    ///
    /// Same as [`ProfileStore::update_profile`].
    pub async fn set_language(&self, language: Language) -> Result<Profile, FlowGateError> {
        self.update_profile(ProfilePatch {
            language: Some(language),
            ..ProfilePatch::default()
        })
        .await
    }

    /// Uploads an avatar image and points the profile at it.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `BackendRejected` when the upload is refused, or any
    /// error of [`ProfileStore::update_profile`].
    pub async fn upload_avatar(
        &self,
        name: String,
        bytes: Vec<u8>,
    ) -> Result<Profile, FlowGateError> {
        let session = self
            .session
            .fresh_session()
            .await?
            .ok_or(FlowGateError::NotAuthenticated)?;
        let url = self
            .backend
            .upload_asset(session.access_token, session.user_id, name, bytes)
            .await?;
        self.update_profile(ProfilePatch {
            avatar_url: Some(url),
            ..ProfilePatch::default()
        })
        .await
    }

    /// Re-sends a stranded `onboarding_completed = true`, if any.
    ///
    /// # Errors
    ///
    /// Same as [`ProfileStore::update_profile`].
    pub async fn flush(&self) -> Result<Option<Profile>, FlowGateError> {
        if !self.lock().stranded_onboarding {
            return Ok(self.profile());
        }
        self.update_profile(ProfilePatch::default()).await.map(Some)
    }

    /// Drops the cached profile. Results of calls still in flight are ignored.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.fields = None;
        inner.resolved_for = None;
        inner.stranded_onboarding = false;
        self.publish(&inner);
    }
}

impl ProfileStore {
    /// Subscribes to profile changes, optimistic ones included.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Profile>> {
        self.profile_tx.subscribe()
    }

    /// Whether the remote record of `user_id` has been fetched since the last `clear`.
    #[must_use]
    pub fn is_loaded_for(&self, user_id: &str) -> bool {
        self.lock().resolved_for.as_deref() == Some(user_id)
    }

    /// Runs [`ProfileStore::update_profile`] on the runtime.
    ///
    /// Dropping the returned handle only discards the result: the backend call
    /// and the reconciliation of the cache still complete.
    #[must_use]
    pub fn spawn_update(self: &Arc<Self>, patch: ProfilePatch) -> UpdateHandle {
        let store = Arc::clone(self);
        UpdateHandle {
            task: tokio::spawn(async move { store.update_profile(patch).await }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.config.retry_min_delay)
            .with_max_delay(self.config.retry_max_delay)
            .with_max_times(self.config.max_retries as usize)
    }

    /// Applies `patch` optimistically. Returns `None` when nothing needs sending.
    fn apply(
        &self,
        session: &Session,
        mut patch: ProfilePatch,
    ) -> Option<(Ticket, ProfilePatch, u64)> {
        let mut inner = self.lock();
        let ticket = inner.next_ticket;
        inner.next_ticket += 1;
        let generation = inner.generation;

        if inner.stranded_onboarding {
            patch.fill_from(ProfilePatch {
                onboarding_completed: Some(true),
                ..ProfilePatch::default()
            });
        }

        let owned = inner
            .fields
            .as_ref()
            .is_some_and(|fields| fields.user_id() == session.user_id);
        if !owned {
            inner.fields = Some(ProfileFields::confirmed(Profile::new(&session.user_id), 0));
            inner.stranded_onboarding = false;
        }
        let fields = inner.fields.as_mut()?;
        let sent = fields.propose(patch, ticket);
        if sent.onboarding_completed == Some(true) {
            inner.stranded_onboarding = false;
        }
        self.publish(&inner);
        drop(inner);

        (!sent.is_empty()).then_some((ticket, sent, generation))
    }

    fn publish(&self, inner: &Inner) -> Option<Profile> {
        let profile = inner.fields.as_ref().map(ProfileFields::snapshot);
        self.profile_tx.send_replace(profile.clone());
        profile
    }
}

/// Result of a [`ProfileStore::spawn_update`].
#[derive(Debug)]
pub struct UpdateHandle {
    task: JoinHandle<Result<Profile, FlowGateError>>,
}

impl UpdateHandle {
    /// Waits for the update to finish.
    ///
    /// # Errors
    ///
    /// The error of the update, or `ProfilePersistFailure` if the task panicked.
    pub async fn outcome(self) -> Result<Profile, FlowGateError> {
        self.task
            .await
            .map_err(|err| FlowGateError::ProfilePersistFailure {
                error: err.to_string(),
            })?
    }
}
