use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tokio::sync::watch;

use super::types::{Session, SessionState, SignUpOutcome, SignedOutReason};
use crate::backend::{AuthUser, BackendClient, BackendError};
use crate::clock::{Clock, SystemClock};
use crate::defaults;
use crate::error::FlowGateError;
use crate::storage::{SecureCredentialStore, StorageError};

/// Tuning of the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct SessionStoreConfig {
    /// Tokens expiring within this window are refreshed before being handed out.
    pub grace_window: Duration,
    /// Retries after the first attempt for transient refresh and persistence failures.
    pub max_retries: u32,
    /// First backoff delay.
    pub retry_min_delay: Duration,
    /// Upper bound of a single backoff delay.
    pub retry_max_delay: Duration,
    /// Longest the auto refresher sleeps before comparing the expiry against the
    /// wall clock again. Bounds how late a refresh happens after the device slept.
    pub expiry_check_interval: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            grace_window: defaults::REFRESH_GRACE_WINDOW,
            max_retries: defaults::REFRESH_RETRIES,
            retry_min_delay: defaults::RETRY_MIN_DELAY,
            retry_max_delay: defaults::RETRY_MAX_DELAY,
            expiry_check_interval: defaults::EXPIRY_CHECK_INTERVAL,
        }
    }
}

struct Inner {
    state: SessionState,
    /// Advanced on every identity transition. Responses started under an older
    /// epoch are discarded.
    epoch: u64,
}

/// Owns the session of the current user.
///
/// State is kept behind a synchronous lock that is never held across an
/// await, so transitions (in particular the local half of [`sign_out`]) are
/// visible to every reader as soon as the call that made them returns.
/// Observers follow the lifecycle through [`SessionStore::subscribe`].
///
/// [`sign_out`]: SessionStore::sign_out
#[derive(uniffi::Object)]
pub struct SessionStore {
    credentials: Arc<SecureCredentialStore>,
    backend: Arc<dyn BackendClient>,
    clock: Arc<dyn Clock>,
    config: SessionStoreConfig,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
    /// Serializes writes and removals of the persisted record.
    persist_lane: tokio::sync::Mutex<()>,
    /// At most one refresh in flight.
    refresh_lane: tokio::sync::Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[uniffi::export(async_runtime = "tokio")]
impl SessionStore {
    /// Creates an uninitialized store with the default configuration.
    #[uniffi::constructor]
    #[must_use]
    pub fn new(
        credentials: Arc<SecureCredentialStore>,
        backend: Arc<dyn BackendClient>,
    ) -> Self {
        Self::with_clock(
            credentials,
            backend,
            SessionStoreConfig::default(),
            Arc::new(SystemClock),
        )
    }

    /// Creates an uninitialized store with a custom configuration.
    #[uniffi::constructor]
    #[must_use]
    pub fn with_config(
        credentials: Arc<SecureCredentialStore>,
        backend: Arc<dyn BackendClient>,
        config: SessionStoreConfig,
    ) -> Self {
        Self::with_clock(credentials, backend, config, Arc::new(SystemClock))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    /// The session in effect, `None` when signed out or when the access token is
    /// already expired. Use [`SessionStore::fresh_session`] before backend calls.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        let now = self.clock.now();
        self.lock()
            .state
            .session()
            .filter(|session| !session.is_expired(now))
            .cloned()
    }

    /// Restores the persisted session and validates it with the backend.
    ///
    /// Resolves to `Authenticated` or `Unauthenticated`; a persisted record that
    /// cannot be validated is removed. Only the first call does any work, later
    /// calls return the current state.
    pub async fn initialize(&self) -> SessionState {
        let epoch = {
            let mut inner = self.lock();
            if inner.state != SessionState::Uninitialized {
                return inner.state.clone();
            }
            self.transition(&mut inner, SessionState::Restoring);
            inner.epoch
        };

        let restored = self.restore(epoch).await;

        let mut inner = self.lock();
        if inner.epoch == epoch && inner.state == SessionState::Restoring {
            log::info!("session restore finished: {}", describe(&restored));
            self.transition(&mut inner, restored);
        } else {
            // signed in or out while restoring; that transition wins
            discard(restored);
        }
        inner.state.clone()
    }

    /// Signs in with email and password and persists the new session.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for a blank email or an empty password.
    /// - `InvalidCredentials` when the backend refuses the pair. Never retried.
    /// - `StorageWriteFailure` when the session cannot be persisted. The store
    ///   then stays signed out.
    /// - `NotAuthenticated` when a sign-out happened while the call was in flight.
    pub async fn sign_in(&self, email: String, password: String) -> Result<Session, FlowGateError> {
        validate_credentials(&email, &password)?;
        let epoch = self.epoch();

        match self.backend.sign_in(email, password).await {
            Ok(session) => self.establish(session, epoch).await,
            Err(err) => Err(self.auth_failed(err, epoch)),
        }
    }

    /// Creates an account. Signs the user in unless the backend requires email
    /// confirmation first.
    ///
    /// # Errors
    ///
    /// Same as [`SessionStore::sign_in`].
    pub async fn sign_up(
        &self,
        email: String,
        password: String,
    ) -> Result<SignUpOutcome, FlowGateError> {
        validate_credentials(&email, &password)?;
        let epoch = self.epoch();

        match self.backend.sign_up(email, password).await {
            Ok(result) => match result.session {
                Some(session) => Ok(SignUpOutcome::SignedIn {
                    session: self.establish(session, epoch).await?,
                }),
                None => {
                    log::info!("sign-up pending email confirmation");
                    Ok(SignUpOutcome::ConfirmationRequired {
                        user_id: result.user_id,
                    })
                }
            },
            Err(err) => Err(self.auth_failed(err, epoch)),
        }
    }

    /// Signs out. Local state is cleared before the first suspension point, so a
    /// reader never observes the old session once this call has started.
    ///
    /// The persisted record is removed next. The remote revoke runs detached and
    /// is attempted once; this call does not wait for it. Failures of either are
    /// logged and sign-out itself cannot fail.
    pub async fn sign_out(&self) {
        let previous = {
            let mut inner = self.lock();
            inner.epoch += 1;
            let previous = inner.state.session().cloned();
            self.transition(
                &mut inner,
                SessionState::Unauthenticated {
                    reason: SignedOutReason::SignedOut,
                },
            );
            previous
        };

        self.clear_persisted().await;

        if let Some(session) = previous {
            log::info!("signed out");
            let backend = Arc::clone(&self.backend);
            tokio::spawn(async move {
                let mut session = session;
                if let Err(err) = backend.sign_out(session.access_token.clone()).await {
                    log::warn!("remote sign-out failed, local session already cleared: {err}");
                }
                session.wipe();
            });
        }
    }

    /// Returns the current session, refreshing it first when the access token is
    /// within the grace window of its expiry.
    ///
    /// # Errors
    ///
    /// `SessionExpired` (or the transient error that exhausted the retries) when
    /// the token had to be refreshed and could not be. The store is then signed
    /// out with reason `Expired` and the persisted record removed.
    pub async fn fresh_session(&self) -> Result<Option<Session>, FlowGateError> {
        let now = self.clock.now();
        let Some(session) = self.lock().state.session().cloned() else {
            return Ok(None);
        };
        if !session.needs_refresh(now, self.config.grace_window.as_secs()) {
            return Ok(Some(session));
        }
        self.refresh().await
    }

    /// Identity of the signed-in user as reported by the backend.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without a session, or the backend failure.
    pub async fn current_user(&self) -> Result<Option<AuthUser>, FlowGateError> {
        let session = self
            .fresh_session()
            .await?
            .ok_or(FlowGateError::NotAuthenticated)?;
        Ok(self.backend.get_user(session.access_token).await?)
    }

    /// Keeps the session fresh until [`SessionStore::dispose`] is called.
    ///
    /// Sleeps until the token enters the grace window, then refreshes. The sleep
    /// is capped at `expiry_check_interval` since the timer does not advance
    /// while the device is suspended. Meant to be spawned once by the host.
    pub async fn run_auto_refresh(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut state_rx = self.state_tx.subscribe();
        let grace = self.config.grace_window.as_secs();

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }
            let refresh_in = self.lock().state.session().map(|session| {
                Duration::from_secs(
                    session
                        .expires_at
                        .saturating_sub(grace)
                        .saturating_sub(self.clock.now()),
                )
            });
            let timer = async {
                match refresh_in {
                    Some(delay) => {
                        tokio::time::sleep(delay.min(self.config.expiry_check_interval)).await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = shutdown_rx.changed() => break,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                () = timer => {}
            }

            // a capped sleep may wake before the token is due; fresh_session is then a no-op
            match self.fresh_session().await {
                Ok(_) => {}
                Err(err) if err.is_transient() => {
                    log::warn!("scheduled refresh failed, will retry: {err}");
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        () = tokio::time::sleep(self.config.retry_max_delay) => {}
                    }
                }
                Err(err) => log::info!("scheduled refresh ended the session: {err}"),
            }
        }
        log::debug!("auto refresh stopped");
    }

    /// Stops [`SessionStore::run_auto_refresh`]. The session itself is kept.
    pub fn dispose(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl SessionStore {
    /// Creates an uninitialized store reading time from `clock`.
    #[must_use]
    pub fn with_clock(
        credentials: Arc<SecureCredentialStore>,
        backend: Arc<dyn BackendClient>,
        config: SessionStoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Uninitialized);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            credentials,
            backend,
            clock,
            config,
            inner: Mutex::new(Inner {
                state: SessionState::Uninitialized,
                epoch: 0,
            }),
            state_tx,
            persist_lane: tokio::sync::Mutex::new(()),
            refresh_lane: tokio::sync::Mutex::new(()),
            shutdown_tx,
        }
    }

    /// Subscribes to lifecycle transitions. The receiver starts at the current state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Whether the store still holds a session whose access token is past its
    /// expiry, i.e. a refresh is owed before the user can be routed anywhere.
    #[must_use]
    pub fn holds_expired_session(&self) -> bool {
        let now = self.clock.now();
        self.lock()
            .state
            .session()
            .is_some_and(|session| session.is_expired(now))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Replaces the state and publishes it. Must be called with `inner` locked.
    fn transition(&self, inner: &mut Inner, next: SessionState) {
        let previous = std::mem::replace(&mut inner.state, next);
        let published = self.state_tx.send_replace(inner.state.clone());
        discard(previous);
        discard(published);
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.config.retry_min_delay)
            .with_max_delay(self.config.retry_max_delay)
            .with_max_times(self.config.max_retries as usize)
    }

    async fn restore(&self, epoch: u64) -> SessionState {
        let persisted = match self.credentials.load_session().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                return SessionState::Unauthenticated {
                    reason: SignedOutReason::NoSession,
                }
            }
            Err(err) => {
                log::warn!("persisted session unreadable: {err}");
                return self.restore_failed(SignedOutReason::RestoreFailed, epoch).await;
            }
        };

        let now = self.clock.now();
        if persisted.needs_refresh(now, self.config.grace_window.as_secs()) {
            return match self.refresh_with_retry(&persisted.refresh_token).await {
                Ok(rotated) => {
                    self.persist_with_retry(&rotated, epoch).await;
                    SessionState::Authenticated { session: rotated }
                }
                Err(BackendError::SessionExpired) => {
                    self.restore_failed(SignedOutReason::Expired, epoch).await
                }
                Err(err) => {
                    log::warn!("could not refresh persisted session: {err}");
                    self.restore_failed(SignedOutReason::RestoreFailed, epoch).await
                }
            };
        }

        match self.backend.get_session(persisted.clone()).await {
            Ok(Some(live)) if live.user_id == persisted.user_id => {
                if live != persisted {
                    self.persist_with_retry(&live, epoch).await;
                }
                SessionState::Authenticated { session: live }
            }
            Ok(_) => {
                log::info!("persisted session no longer recognized by the backend");
                self.restore_failed(SignedOutReason::RestoreFailed, epoch).await
            }
            Err(err) => {
                log::warn!("could not validate persisted session: {err}");
                self.restore_failed(SignedOutReason::RestoreFailed, epoch).await
            }
        }
    }

    async fn restore_failed(&self, reason: SignedOutReason, epoch: u64) -> SessionState {
        self.clear_persisted_at(epoch).await;
        SessionState::Unauthenticated { reason }
    }

    /// Persists `session` and makes it current, unless the epoch moved since `epoch`.
    async fn establish(&self, session: Session, epoch: u64) -> Result<Session, FlowGateError> {
        let _lane = self.persist_lane.lock().await;
        if self.epoch() != epoch {
            log::info!("discarding sign-in response, signed out meanwhile");
            discard_session(session);
            return Err(FlowGateError::NotAuthenticated);
        }

        if let Err(err) = self.credentials.save_session(&session).await {
            log::error!("could not persist new session: {err}");
            discard_session(session);
            self.mark_auth_failed(epoch);
            return Err(storage_write_failure(&err));
        }

        let mut inner = self.lock();
        if inner.epoch != epoch {
            // the sign-out waiting on the lane removes the record we just wrote
            discard_session(session);
            return Err(FlowGateError::NotAuthenticated);
        }
        inner.epoch += 1;
        log::info!("signed in as {}", session.user_id);
        self.transition(
            &mut inner,
            SessionState::Authenticated {
                session: session.clone(),
            },
        );
        drop(inner);
        Ok(session)
    }

    fn auth_failed(&self, err: BackendError, epoch: u64) -> FlowGateError {
        log::info!("authentication failed: {err}");
        self.mark_auth_failed(epoch);
        err.into()
    }

    fn mark_auth_failed(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch == epoch && matches!(inner.state, SessionState::Unauthenticated { .. }) {
            self.transition(
                &mut inner,
                SessionState::Unauthenticated {
                    reason: SignedOutReason::AuthFailed,
                },
            );
        }
    }

    /// Single-flight refresh of the current session.
    async fn refresh(&self) -> Result<Option<Session>, FlowGateError> {
        let _lane = self.refresh_lane.lock().await;

        let (current, epoch) = {
            let mut inner = self.lock();
            let Some(current) = inner.state.session().cloned() else {
                return Ok(None);
            };
            // another caller may have refreshed while we waited on the lane
            if !current.needs_refresh(self.clock.now(), self.config.grace_window.as_secs()) {
                return Ok(Some(current));
            }
            self.transition(
                &mut inner,
                SessionState::Refreshing {
                    session: current.clone(),
                },
            );
            (current, inner.epoch)
        };

        match self.refresh_with_retry(&current.refresh_token).await {
            Ok(rotated) => {
                self.persist_with_retry(&rotated, epoch).await;
                let mut inner = self.lock();
                if inner.epoch != epoch {
                    discard_session(rotated);
                    return Ok(None);
                }
                log::debug!("session refreshed, expires at {}", rotated.expires_at);
                self.transition(
                    &mut inner,
                    SessionState::Authenticated {
                        session: rotated.clone(),
                    },
                );
                drop(inner);
                Ok(Some(rotated))
            }
            Err(err) => {
                let terminal = matches!(err, BackendError::SessionExpired)
                    || current.is_expired(self.clock.now());
                if !terminal {
                    log::warn!("refresh failed, current token still valid: {err}");
                    let mut inner = self.lock();
                    if inner.epoch == epoch {
                        self.transition(
                            &mut inner,
                            SessionState::Authenticated {
                                session: current.clone(),
                            },
                        );
                    }
                    drop(inner);
                    return Ok(Some(current));
                }

                let expired_epoch = {
                    let mut inner = self.lock();
                    if inner.epoch == epoch {
                        inner.epoch += 1;
                        log::info!("session expired: {err}");
                        self.transition(
                            &mut inner,
                            SessionState::Unauthenticated {
                                reason: SignedOutReason::Expired,
                            },
                        );
                        Some(inner.epoch)
                    } else {
                        None
                    }
                };
                discard_session(current);
                if let Some(expired_epoch) = expired_epoch {
                    self.clear_persisted_at(expired_epoch).await;
                }
                Err(err.into())
            }
        }
    }

    async fn refresh_with_retry(&self, refresh_token: &str) -> Result<Session, BackendError> {
        (|| async {
            self.backend
                .refresh_session(refresh_token.to_string())
                .await
        })
        .retry(self.backoff())
        .when(BackendError::is_transient)
        .notify(|err: &BackendError, delay: Duration| {
            log::debug!("retrying refresh in {delay:?}: {err}");
        })
        .await
    }

    /// Writes a rotated session unless the epoch moved since `epoch`. A failure
    /// is logged; the in-memory session stays authoritative and the next
    /// rotation writes again.
    async fn persist_with_retry(&self, session: &Session, epoch: u64) {
        let _lane = self.persist_lane.lock().await;
        if self.epoch() != epoch {
            return;
        }
        let result = (|| async { self.credentials.save_session(session).await })
            .retry(self.backoff())
            .when(|err: &StorageError| !matches!(err, StorageError::Serialization(_)))
            .await;
        if let Err(err) = result {
            log::error!("{}", storage_write_failure(&err));
        }
    }

    async fn clear_persisted(&self) {
        let _lane = self.persist_lane.lock().await;
        self.remove_record().await;
    }

    /// Removes the persisted record unless the epoch moved since `epoch`. A
    /// record written by a sign-in that won the race is kept.
    async fn clear_persisted_at(&self, epoch: u64) {
        let _lane = self.persist_lane.lock().await;
        if self.epoch() != epoch {
            log::debug!("keeping persisted session written after epoch {epoch}");
            return;
        }
        self.remove_record().await;
    }

    /// Must be called on the persist lane.
    async fn remove_record(&self) {
        if let Err(err) = self.credentials.clear_session().await {
            log::error!("{}", storage_write_failure(&err));
        }
    }
}

fn validate_credentials(email: &str, password: &str) -> Result<(), FlowGateError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(FlowGateError::InvalidInput {
            attribute: "email".to_string(),
            reason: "must be an email address".to_string(),
        });
    }
    if password.is_empty() {
        return Err(FlowGateError::InvalidInput {
            attribute: "password".to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn storage_write_failure(err: &StorageError) -> FlowGateError {
    FlowGateError::StorageWriteFailure {
        error: err.to_string(),
    }
}

fn describe(state: &SessionState) -> String {
    match state {
        SessionState::Authenticated { session } | SessionState::Refreshing { session } => {
            format!("authenticated as {}", session.user_id)
        }
        SessionState::Unauthenticated { reason } => format!("unauthenticated ({reason:?})"),
        SessionState::Uninitialized | SessionState::Restoring => format!("{state:?}"),
    }
}

fn discard_session(mut session: Session) {
    session.wipe();
}

/// Wipes the token material of a state that is no longer current.
fn discard(state: SessionState) {
    match state {
        SessionState::Authenticated { session } | SessionState::Refreshing { session } => {
            discard_session(session);
        }
        SessionState::Uninitialized
        | SessionState::Restoring
        | SessionState::Unauthenticated { .. } => {}
    }
}
