use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::gate::{gate, NavigationTarget};
use super::splash::SplashTimer;
use crate::defaults;
use crate::error::FlowGateError;
use crate::profile::ProfileStore;
use crate::session::SessionStore;

/// What the router renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum RouteState {
    /// Neutral loading screen. Not a navigation decision.
    Loading,
    /// A decision is available.
    Ready {
        /// Flow to show.
        target: NavigationTarget,
    },
}

/// Startup tuning of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct CoordinatorConfig {
    /// Longest `start` waits on restore and the first profile load before routing
    /// with whatever state is available.
    pub max_restore_wait: Duration,
    /// Minimum display time of the splash screen.
    pub splash_min_display: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_restore_wait: defaults::MAX_RESTORE_WAIT,
            splash_min_display: defaults::SPLASH_MIN_DISPLAY,
        }
    }
}

/// Receives route changes on the host side.
#[uniffi::export(with_foreign)]
pub trait RouteObserver: Send + Sync {
    /// Called with the current route on registration and on every change.
    fn on_route(&self, route: RouteState);
}

#[derive(Default)]
struct Inner {
    started: bool,
    /// User whose profile could not be loaded. Routed with the cached profile.
    profile_failed_for: Option<String>,
    tasks: Vec<JoinHandle<()>>,
}

/// Ties the session and profile stores to the router.
///
/// Owns no session or profile state. Routes are computed on demand from the
/// stores' snapshots and pushed to subscribers on every change.
#[derive(uniffi::Object)]
pub struct AppCoordinator {
    session: Arc<SessionStore>,
    profile: Arc<ProfileStore>,
    config: CoordinatorConfig,
    splash: Arc<SplashTimer>,
    inner: Mutex<Inner>,
    route_tx: watch::Sender<RouteState>,
    /// Serializes profile loads so concurrent triggers for one user fetch once.
    load_lane: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for AppCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCoordinator")
            .field("route", &self.route())
            .finish_non_exhaustive()
    }
}

#[uniffi::export(async_runtime = "tokio")]
impl AppCoordinator {
    /// Creates a coordinator with the default configuration.
    #[uniffi::constructor]
    #[must_use]
    pub fn new(session: Arc<SessionStore>, profile: Arc<ProfileStore>) -> Self {
        Self::with_config(session, profile, CoordinatorConfig::default())
    }

    /// Creates a coordinator. The splash timer starts now.
    #[uniffi::constructor]
    #[must_use]
    pub fn with_config(
        session: Arc<SessionStore>,
        profile: Arc<ProfileStore>,
        config: CoordinatorConfig,
    ) -> Self {
        let (route_tx, _) = watch::channel(RouteState::Loading);
        Self {
            splash: Arc::new(SplashTimer::new(config.splash_min_display)),
            session,
            profile,
            config,
            inner: Mutex::new(Inner::default()),
            route_tx,
            load_lane: tokio::sync::Mutex::new(()),
        }
    }

    /// Restores the session, loads the profile and starts following both stores.
    ///
    /// Waits at most `max_restore_wait`; past that the route is computed from
    /// whatever is available and corrected once the slow work lands. Calling
    /// it again only returns the current route.
    pub async fn start(self: Arc<Self>) -> RouteState {
        let already_started = std::mem::replace(&mut self.lock().started, true);
        if already_started {
            return self.route();
        }

        let mut startup = tokio::spawn({
            let coordinator = Arc::clone(&self);
            async move {
                let state = coordinator.session.initialize().await;
                if let Some(session) = state.session() {
                    coordinator.ensure_profile(session.user_id.clone()).await;
                }
            }
        });
        match tokio::time::timeout(self.config.max_restore_wait, &mut startup).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::error!("startup task failed: {err}"),
            Err(_) => {
                log::warn!(
                    "startup exceeded {:?}, routing with the state available",
                    self.config.max_restore_wait
                );
            }
        }

        let follower = tokio::spawn(Arc::clone(&self).follow_stores());
        let refresher = tokio::spawn({
            let session = Arc::clone(&self.session);
            async move { session.run_auto_refresh().await }
        });
        {
            let mut inner = self.lock();
            // a startup past the timeout keeps running; only `dispose` stops it
            inner.tasks.extend([startup, follower, refresher]);
        }
        self.publish_route()
    }

    /// Route for the current snapshots. Synchronous and side-effect free.
    ///
    /// A session whose access token expired is owed a refresh, not a sign-in:
    /// the route stays `Loading` until the refresh lands or ends the session.
    #[must_use]
    pub fn route(&self) -> RouteState {
        let (started, failed_for) = {
            let inner = self.lock();
            (inner.started, inner.profile_failed_for.clone())
        };
        if !started || self.session.holds_expired_session() {
            return RouteState::Loading;
        }

        let Some(session) = self.session.session() else {
            return RouteState::Ready {
                target: gate(None, None),
            };
        };
        let awaiting_profile = !self.profile.is_loaded_for(&session.user_id)
            && failed_for.as_deref() != Some(session.user_id.as_str());
        if awaiting_profile {
            return RouteState::Loading;
        }
        RouteState::Ready {
            target: gate(Some(&session), self.profile.profile().as_ref()),
        }
    }

    /// Signs in and loads the new user's profile before returning the route.
    ///
    /// # Errors
    ///
    /// Any error of [`SessionStore::sign_in`].
    pub async fn sign_in(
        &self,
        email: String,
        password: String,
    ) -> Result<RouteState, FlowGateError> {
        let session = self.session.sign_in(email, password).await?;
        self.ensure_profile(session.user_id).await;
        Ok(self.publish_route())
    }

    /// Re-checks the session when the app returns to the foreground. A token
    /// that expired while the device slept is refreshed before routing.
    pub async fn resume(&self) -> RouteState {
        if let Err(err) = self.session.fresh_session().await {
            log::info!("session could not be refreshed on resume: {err}");
        }
        self.publish_route()
    }

    /// Signs out and drops the cached profile. Routes to `PreAuth` immediately.
    pub async fn sign_out(&self) -> RouteState {
        self.session.sign_out().await;
        self.profile.clear();
        self.publish_route()
    }

    /// Waits until the route is ready and the splash minimum display time has
    /// passed, then returns the route to present.
    pub async fn presentable_route(&self) -> RouteState {
        let mut route_rx = self.route_tx.subscribe();
        let ready = async {
            let _ = route_rx
                .wait_for(|route| matches!(route, RouteState::Ready { .. }))
                .await;
        };
        tokio::join!(ready, self.splash.elapsed());
        self.route()
    }

    /// The splash timer started with this coordinator.
    #[must_use]
    pub fn splash(&self) -> Arc<SplashTimer> {
        Arc::clone(&self.splash)
    }

    /// Registers `observer` and returns the subscription keeping it alive.
    #[allow(clippy::unused_async)] // async so the observer task spawns on the runtime uniffi drives
    pub async fn add_route_observer(&self, observer: Arc<dyn RouteObserver>) -> Arc<RouteSubscription> {
        let mut route_rx = self.route_tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                let route = *route_rx.borrow_and_update();
                observer.on_route(route);
                if route_rx.changed().await.is_err() {
                    break;
                }
            }
        });
        Arc::new(RouteSubscription { task })
    }

    /// Stops following the stores and ends background work.
    pub fn dispose(&self) {
        self.session.dispose();
        let tasks = std::mem::take(&mut self.lock().tasks);
        for task in tasks {
            task.abort();
        }
    }
}

impl AppCoordinator {
    /// Subscribes to route changes. The receiver starts at the last published route.
    #[must_use]
    pub fn subscribe_routes(&self) -> watch::Receiver<RouteState> {
        self.route_tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_route(&self) -> RouteState {
        let route = self.route();
        self.route_tx.send_if_modified(|current| {
            let changed = *current != route;
            *current = route;
            changed
        });
        route
    }

    /// Loads the profile of `user_id` unless it is already loaded.
    async fn ensure_profile(&self, user_id: String) {
        let _lane = self.load_lane.lock().await;
        if self.profile.is_loaded_for(&user_id) {
            return;
        }
        if self.session.session().map(|session| session.user_id) != Some(user_id.clone()) {
            return;
        }
        match self.profile.load().await {
            Ok(_) => self.lock().profile_failed_for = None,
            Err(err) => {
                log::warn!("profile load failed, routing with the cached profile: {err}");
                self.lock().profile_failed_for = Some(user_id);
            }
        }
        self.publish_route();
    }

    async fn follow_stores(self: Arc<Self>) {
        let mut session_rx = self.session.subscribe();
        let mut profile_rx = self.profile.subscribe();
        let mut current_user = self.session.session().map(|session| session.user_id);

        loop {
            tokio::select! {
                changed = session_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let user = session_rx
                        .borrow_and_update()
                        .session()
                        .map(|session| session.user_id.clone());
                    if user != current_user {
                        self.on_user_changed(user.clone());
                        current_user = user;
                    }
                }
                changed = profile_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    profile_rx.borrow_and_update();
                }
            }
            self.publish_route();
        }
    }

    fn on_user_changed(self: &Arc<Self>, user: Option<String>) {
        self.lock().profile_failed_for = None;
        let Some(user_id) = user else {
            self.profile.clear();
            return;
        };
        // a cached profile of the previous user is ignored by the gate until replaced
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(async move { coordinator.ensure_profile(user_id).await });
        let mut inner = self.lock();
        inner.tasks.retain(|task| !task.is_finished());
        inner.tasks.push(task);
    }
}

/// Keeps a [`RouteObserver`] registered. Dropping it unregisters the observer.
#[derive(Debug, uniffi::Object)]
pub struct RouteSubscription {
    task: JoinHandle<()>,
}

#[uniffi::export]
impl RouteSubscription {
    /// Unregisters the observer.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for RouteSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
