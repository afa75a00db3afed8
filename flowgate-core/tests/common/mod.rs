#![allow(dead_code, reason = "not every test binary uses every helper")]

//! Common test utilities shared across integration tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use flowgate_core::storage::SESSION_RECORD_KEY;
use flowgate_core::{
    AppCoordinator, AuthUser, BackendClient, BackendError, Clock, CoordinatorConfig,
    DeviceKeystore, ItemStore, ManualClock, MemoryItemStore, Profile, ProfilePatch,
    ProfileStore, ProfileStoreConfig, SecureCredentialStore, Session, SessionStore,
    SessionStoreConfig, SignUpResult, StorageError,
};
use rand::{rngs::OsRng, RngCore};
use tokio::sync::oneshot;

pub const NOW: u64 = 1_700_000_000;
pub const TOKEN_TTL: u64 = 3600;

/// Routes the crate's `log` output to the test writer. `RUST_LOG` picks the level.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub struct InMemoryKeystore {
    key: [u8; 32],
}

impl InMemoryKeystore {
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }
}

impl DeviceKeystore for InMemoryKeystore {
    fn seal(
        &self,
        associated_data: Vec<u8>,
        plaintext: Vec<u8>,
    ) -> Result<Vec<u8>, StorageError> {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key));
        let mut nonce_bytes = [0u8; 24];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: &associated_data,
                },
            )
            .map_err(|err| StorageError::Crypto(err.to_string()))?;
        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open_sealed(
        &self,
        associated_data: Vec<u8>,
        ciphertext: Vec<u8>,
    ) -> Result<Vec<u8>, StorageError> {
        if ciphertext.len() < 24 {
            return Err(StorageError::InvalidSealedValue(
                "ciphertext too short".to_string(),
            ));
        }
        let (nonce_bytes, payload) = ciphertext.split_at(24);
        XChaCha20Poly1305::new(Key::from_slice(&self.key))
            .decrypt(
                XNonce::from_slice(nonce_bytes),
                Payload {
                    msg: payload,
                    aad: &associated_data,
                },
            )
            .map_err(|err| StorageError::Crypto(err.to_string()))
    }
}

/// Item store whose writes and removals can be made to fail.
#[derive(Default)]
pub struct FlakyItemStore {
    inner: MemoryItemStore,
    pub fail_writes: AtomicBool,
}

#[async_trait::async_trait]
impl ItemStore for FlakyItemStore {
    async fn get_item(&self, key: String) -> Result<Option<String>, StorageError> {
        self.inner.get_item(key).await
    }

    async fn set_item(&self, key: String, value: String) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::ItemStore("disk full".to_string()));
        }
        self.inner.set_item(key, value).await
    }

    async fn remove_item(&self, key: String) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::ItemStore("disk full".to_string()));
        }
        self.inner.remove_item(key).await
    }
}

#[derive(Default)]
struct FakeState {
    /// email -> (password, user id)
    accounts: HashMap<String, (String, String)>,
    live_tokens: HashSet<String>,
    issued: u64,
    refresh_results: VecDeque<Result<(), BackendError>>,
    profiles: HashMap<String, Profile>,
    update_failures: VecDeque<BackendError>,
    update_gates: VecDeque<oneshot::Receiver<()>>,
    /// Per `update_profile` call, in arrival order: held after the patch is applied.
    reply_gates: VecDeque<Option<oneshot::Receiver<()>>>,
    revoke_gate: Option<oneshot::Receiver<()>>,
    sign_in_gate: Option<oneshot::Receiver<()>>,
    validate_gate: Option<oneshot::Receiver<()>>,
    sign_up_needs_confirmation: bool,
    revoke_fails: bool,
}

/// Scripted in-memory backend.
pub struct FakeBackend {
    clock: Arc<ManualClock>,
    state: Mutex<FakeState>,
    pub network_down: AtomicBool,
    pub sign_in_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub sign_out_calls: AtomicUsize,
    pub get_profile_calls: AtomicUsize,
    pub validate_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            state: Mutex::new(FakeState::default()),
            network_down: AtomicBool::new(false),
            sign_in_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            get_profile_calls: AtomicUsize::new(0),
            validate_calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn add_account(&self, email: &str, password: &str, user_id: &str) {
        self.state()
            .accounts
            .insert(email.to_string(), (password.to_string(), user_id.to_string()));
    }

    /// Issues a session the backend recognizes.
    pub fn issue(&self, user_id: &str) -> Session {
        let mut state = self.state();
        state.issued += 1;
        let session = Session {
            user_id: user_id.to_string(),
            access_token: format!("at-{user_id}-{}", state.issued),
            refresh_token: format!("rt-{user_id}-{}", state.issued),
            expires_at: self.clock.now() + TOKEN_TTL,
        };
        state.live_tokens.insert(session.access_token.clone());
        session
    }

    pub fn revoke_all(&self) {
        self.state().live_tokens.clear();
    }

    pub fn set_profile(&self, profile: Profile) {
        self.state().profiles.insert(profile.user_id.clone(), profile);
    }

    pub fn stored_profile(&self, user_id: &str) -> Option<Profile> {
        self.state().profiles.get(user_id).cloned()
    }

    pub fn script_refresh(&self, result: Result<(), BackendError>) {
        self.state().refresh_results.push_back(result);
    }

    pub fn fail_updates(&self, errors: impl IntoIterator<Item = BackendError>) {
        self.state().update_failures.extend(errors);
    }

    /// The next `update_profile` call waits until the returned sender fires.
    pub fn gate_next_update(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state().update_gates.push_back(rx);
        tx
    }

    /// The next `update_profile` call applies its patch, then waits for the
    /// returned sender before replying. Later calls reply immediately.
    pub fn hold_next_reply(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state().reply_gates.push_back(Some(rx));
        tx
    }

    /// The next remote sign-out waits until the returned sender fires.
    pub fn gate_next_revoke(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state().revoke_gate = Some(rx);
        tx
    }

    pub fn gate_next_sign_in(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state().sign_in_gate = Some(rx);
        tx
    }

    pub fn gate_next_validation(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state().validate_gate = Some(rx);
        tx
    }

    pub fn require_confirmation(&self) {
        self.state().sign_up_needs_confirmation = true;
    }

    pub fn fail_revoke(&self) {
        self.state().revoke_fails = true;
    }

    fn check_network(&self) -> Result<(), BackendError> {
        if self.network_down.load(Ordering::SeqCst) {
            return Err(BackendError::NetworkUnreachable("offline".to_string()));
        }
        Ok(())
    }

    fn user_for(&self, access_token: &str) -> Option<String> {
        let state = self.state();
        if !state.live_tokens.contains(access_token) {
            return None;
        }
        // tokens look like at-{user}-{n}
        let rest = access_token.strip_prefix("at-")?;
        let (user, _) = rest.rsplit_once('-')?;
        Some(user.to_string())
    }
}

async fn wait_gate(gate: Option<oneshot::Receiver<()>>) {
    if let Some(gate) = gate {
        let _ = gate.await;
    }
}

#[async_trait::async_trait]
impl BackendClient for FakeBackend {
    async fn sign_up(&self, email: String, password: String) -> Result<SignUpResult, BackendError> {
        self.check_network()?;
        let (user_id, confirm) = {
            let mut state = self.state();
            if state.accounts.contains_key(&email) {
                return Err(BackendError::Rejected {
                    status: 422,
                    message: "User already registered".to_string(),
                });
            }
            let user_id = format!("user{}", state.accounts.len() + 1);
            state.accounts.insert(email, (password, user_id.clone()));
            (user_id, state.sign_up_needs_confirmation)
        };
        let session = (!confirm).then(|| self.issue(&user_id));
        Ok(SignUpResult { user_id, session })
    }

    async fn sign_in(&self, email: String, password: String) -> Result<Session, BackendError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.state().sign_in_gate.take();
        wait_gate(gate).await;
        self.check_network()?;
        let user_id = match self.state().accounts.get(&email) {
            Some((expected, user_id)) if *expected == password => user_id.clone(),
            _ => return Err(BackendError::InvalidCredentials),
        };
        Ok(self.issue(&user_id))
    }

    async fn sign_out(&self, access_token: String) -> Result<(), BackendError> {
        let gate = self.state().revoke_gate.take();
        wait_gate(gate).await;
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        self.check_network()?;
        let mut state = self.state();
        if state.revoke_fails {
            return Err(BackendError::Rejected {
                status: 500,
                message: "revoke failed".to_string(),
            });
        }
        state.live_tokens.remove(&access_token);
        Ok(())
    }

    async fn get_session(&self, session: Session) -> Result<Option<Session>, BackendError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.state().validate_gate.take();
        wait_gate(gate).await;
        self.check_network()?;
        Ok(self
            .user_for(&session.access_token)
            .filter(|user| *user == session.user_id)
            .map(|_| session))
    }

    async fn refresh_session(&self, refresh_token: String) -> Result<Session, BackendError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.check_network()?;
        let scripted = self.state().refresh_results.pop_front().unwrap_or(Ok(()));
        scripted?;
        let rest = refresh_token
            .strip_prefix("rt-")
            .ok_or(BackendError::SessionExpired)?;
        let (user, _) = rest.rsplit_once('-').ok_or(BackendError::SessionExpired)?;
        Ok(self.issue(user))
    }

    async fn get_user(&self, access_token: String) -> Result<Option<AuthUser>, BackendError> {
        self.check_network()?;
        let user = self.user_for(&access_token);
        let state = self.state();
        Ok(user.map(|user_id| AuthUser {
            email: state
                .accounts
                .iter()
                .find(|(_, (_, id))| *id == user_id)
                .map(|(email, _)| email.clone()),
            user_id,
        }))
    }

    async fn get_profile(
        &self,
        access_token: String,
        user_id: String,
    ) -> Result<Option<Profile>, BackendError> {
        self.get_profile_calls.fetch_add(1, Ordering::SeqCst);
        self.check_network()?;
        if self.user_for(&access_token).as_deref() != Some(user_id.as_str()) {
            return Err(BackendError::SessionExpired);
        }
        Ok(self.state().profiles.get(&user_id).cloned())
    }

    async fn update_profile(
        &self,
        access_token: String,
        user_id: String,
        patch: ProfilePatch,
    ) -> Result<Profile, BackendError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let (gate, reply_gate) = {
            let mut state = self.state();
            let reply_gate = state.reply_gates.pop_front().flatten();
            (state.update_gates.pop_front(), reply_gate)
        };
        wait_gate(gate).await;
        self.check_network()?;
        if let Some(err) = self.state().update_failures.pop_front() {
            return Err(err);
        }
        if self.user_for(&access_token).as_deref() != Some(user_id.as_str()) {
            return Err(BackendError::SessionExpired);
        }

        let snapshot = {
            let mut state = self.state();
            let profile = state
                .profiles
                .entry(user_id.clone())
                .or_insert_with(|| Profile::new(user_id));
            if let Some(value) = patch.onboarding_completed {
                profile.onboarding_completed = value;
            }
            if let Some(value) = patch.main_goal {
                profile.main_goal = value;
            }
            if let Some(value) = patch.language {
                profile.language = value;
            }
            if patch.display_name.is_some() {
                profile.display_name = patch.display_name;
            }
            if patch.avatar_url.is_some() {
                profile.avatar_url = patch.avatar_url;
            }
            profile.clone()
        };
        wait_gate(reply_gate).await;
        Ok(snapshot)
    }

    async fn upload_asset(
        &self,
        access_token: String,
        user_id: String,
        name: String,
        bytes: Vec<u8>,
    ) -> Result<String, BackendError> {
        self.check_network()?;
        if self.user_for(&access_token).as_deref() != Some(user_id.as_str()) {
            return Err(BackendError::SessionExpired);
        }
        if bytes.is_empty() {
            return Err(BackendError::Storage("empty upload".to_string()));
        }
        Ok(format!("https://cdn.test/avatars/{user_id}/{name}"))
    }
}

/// Stores wired together against the fake backend.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub backend: Arc<FakeBackend>,
    pub items: Arc<FlakyItemStore>,
    pub credentials: Arc<SecureCredentialStore>,
    pub session: Arc<SessionStore>,
    pub profile: Arc<ProfileStore>,
}

impl Harness {
    pub fn new() -> Self {
        init_logging();
        let clock = Arc::new(ManualClock::new(NOW));
        let backend = Arc::new(FakeBackend::new(clock.clone()));
        let items = Arc::new(FlakyItemStore::default());
        let credentials = Arc::new(SecureCredentialStore::sealed(
            Arc::new(InMemoryKeystore::new()),
            items.clone(),
        ));
        let session = Arc::new(SessionStore::with_clock(
            credentials.clone(),
            backend.clone(),
            fast_session_config(),
            clock.clone(),
        ));
        let profile = Arc::new(ProfileStore::with_config(
            session.clone(),
            backend.clone(),
            fast_profile_config(),
        ));
        Self {
            clock,
            backend,
            items,
            credentials,
            session,
            profile,
        }
    }

    pub fn coordinator(&self) -> Arc<AppCoordinator> {
        Arc::new(AppCoordinator::with_config(
            self.session.clone(),
            self.profile.clone(),
            CoordinatorConfig {
                max_restore_wait: Duration::from_millis(200),
                splash_min_display: Duration::from_millis(10),
            },
        ))
    }

    /// Writes `session` the way the store persists it.
    pub async fn persist(&self, session: &Session) {
        let record = serde_json::json!({ "version": 1, "session": session });
        self.credentials
            .set(SESSION_RECORD_KEY.to_string(), record.to_string())
            .await
            .expect("persist");
    }

    pub async fn persisted(&self) -> Option<Session> {
        let raw = self
            .credentials
            .get(SESSION_RECORD_KEY.to_string())
            .await
            .expect("read record")?;
        let record: serde_json::Value = serde_json::from_str(&raw).expect("record json");
        assert_eq!(record["version"], 1);
        Some(serde_json::from_value(record["session"].clone()).expect("session json"))
    }

    /// An already signed-in store for `user_id`, with its session persisted.
    pub async fn signed_in(&self, user_id: &str) -> Session {
        let session = self.backend.issue(user_id);
        self.persist(&session).await;
        self.session.initialize().await;
        session
    }
}

pub fn fast_session_config() -> SessionStoreConfig {
    SessionStoreConfig {
        retry_min_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
        expiry_check_interval: Duration::from_millis(10),
        ..SessionStoreConfig::default()
    }
}

pub fn fast_profile_config() -> ProfileStoreConfig {
    ProfileStoreConfig {
        max_retries: 3,
        retry_min_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
    }
}
