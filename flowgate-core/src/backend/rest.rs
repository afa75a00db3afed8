//! HTTP implementation of [`BackendClient`] for the hosted auth/data/storage API.

use std::sync::Arc;

use reqwest::{Method, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::transport::Transport;
use super::{AuthUser, BackendClient, BackendError, SignUpResult};
use crate::clock::{Clock, SystemClock};
use crate::defaults::ClientConfig;
use crate::error::FlowGateError;
use crate::locale::Language;
use crate::profile::{MainGoal, Profile, ProfilePatch};
use crate::session::Session;

/// Lifetime assumed when the backend omits both `expires_at` and `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// `BackendClient` speaking to the hosted REST endpoints.
#[derive(uniffi::Object)]
pub struct RestBackend {
    base_url: String,
    avatar_bucket: String,
    transport: Transport,
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[uniffi::export]
impl RestBackend {
    /// Creates a backend client from `config`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the base URL is not an `https` URL.
    #[uniffi::constructor]
    pub fn new(config: ClientConfig) -> Result<Self, FlowGateError> {
        let url = Url::parse(&config.base_url).map_err(|err| FlowGateError::InvalidInput {
            attribute: "base_url".to_string(),
            reason: err.to_string(),
        })?;
        #[cfg(not(test))]
        if url.scheme() != "https" {
            return Err(FlowGateError::InvalidInput {
                attribute: "base_url".to_string(),
                reason: "must use https".to_string(),
            });
        }

        let timeout = config.request_timeout();
        Ok(Self {
            base_url: url.as_str().trim_end_matches('/').to_string(),
            avatar_bucket: config.avatar_bucket,
            transport: Transport::new(config.api_key, timeout, config.max_network_retries),
        })
    }

    /// This backend as the client handed to the stores.
    #[must_use]
    pub fn client(self: Arc<Self>) -> Arc<dyn BackendClient> {
        self
    }
}

#[async_trait::async_trait]
impl BackendClient for RestBackend {
    async fn sign_up(
        &self,
        email: String,
        password: String,
    ) -> Result<SignUpResult, BackendError> {
        let url = format!("{}/auth/v1/signup", self.base_url);
        let response = self
            .transport
            .send(
                self.transport
                    .builder(Method::POST, &url, None)
                    .json(&Credentials { email, password }),
            )
            .await?;

        match response.status() {
            status if status.is_success() => {
                match parse_json::<SignUpResponse>(response).await? {
                    SignUpResponse::Session(token) => {
                        let session = token.into_session();
                        Ok(SignUpResult {
                            user_id: session.user_id.clone(),
                            session: Some(session),
                        })
                    }
                    SignUpResponse::Pending(user) => Ok(SignUpResult {
                        user_id: user.id,
                        session: None,
                    }),
                }
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                Err(BackendError::InvalidCredentials)
            }
            _ => Err(rejection(response).await),
        }
    }

    async fn sign_in(
        &self,
        email: String,
        password: String,
    ) -> Result<Session, BackendError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);
        let response = self
            .transport
            .send(
                self.transport
                    .builder(Method::POST, &url, None)
                    .json(&Credentials { email, password }),
            )
            .await?;

        match response.status() {
            status if status.is_success() => {
                Ok(parse_json::<TokenResponse>(response).await?.into_session())
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                Err(BackendError::InvalidCredentials)
            }
            _ => Err(rejection(response).await),
        }
    }

    async fn sign_out(&self, access_token: String) -> Result<(), BackendError> {
        let url = format!("{}/auth/v1/logout", self.base_url);
        // best effort; the caller has already signed out locally
        let response = self
            .transport
            .send_once(self.transport.builder(Method::POST, &url, Some(&access_token)))
            .await?;

        match response.status() {
            // an already revoked token is as signed out as it gets
            status if status.is_success() || status == StatusCode::UNAUTHORIZED => Ok(()),
            _ => Err(rejection(response).await),
        }
    }

    async fn get_session(&self, session: Session) -> Result<Option<Session>, BackendError> {
        let user = self.get_user(session.access_token.clone()).await?;
        Ok(user
            .filter(|user| user.user_id == session.user_id)
            .map(|_| session))
    }

    async fn refresh_session(&self, refresh_token: String) -> Result<Session, BackendError> {
        let url = format!("{}/auth/v1/token?grant_type=refresh_token", self.base_url);
        let response = self
            .transport
            .send(
                self.transport
                    .builder(Method::POST, &url, None)
                    .json(&RefreshRequest { refresh_token }),
            )
            .await?;

        match response.status() {
            status if status.is_success() => {
                Ok(parse_json::<TokenResponse>(response).await?.into_session())
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(BackendError::SessionExpired)
            }
            _ => Err(rejection(response).await),
        }
    }

    async fn get_user(&self, access_token: String) -> Result<Option<AuthUser>, BackendError> {
        let url = format!("{}/auth/v1/user", self.base_url);
        let response = self
            .transport
            .send(self.transport.builder(Method::GET, &url, Some(&access_token)))
            .await?;

        match response.status() {
            status if status.is_success() => {
                let user = parse_json::<UserResponse>(response).await?;
                Ok(Some(AuthUser {
                    user_id: user.id,
                    email: user.email,
                }))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(None),
            _ => Err(rejection(response).await),
        }
    }

    async fn get_profile(
        &self,
        access_token: String,
        user_id: String,
    ) -> Result<Option<Profile>, BackendError> {
        let mut url = Url::parse(&format!("{}/rest/v1/profiles", self.base_url))
            .map_err(|err| BackendError::InvalidResponse(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{user_id}"))
            .append_pair("select", "*");
        let response = self
            .transport
            .send(self.transport.builder(Method::GET, url.as_str(), Some(&access_token)))
            .await?;

        match response.status() {
            status if status.is_success() => {
                let rows = parse_json::<Vec<ProfileRow>>(response).await?;
                Ok(rows.into_iter().next().map(Profile::from))
            }
            StatusCode::UNAUTHORIZED => Err(BackendError::SessionExpired),
            _ => Err(rejection(response).await),
        }
    }

    async fn update_profile(
        &self,
        access_token: String,
        user_id: String,
        patch: ProfilePatch,
    ) -> Result<Profile, BackendError> {
        let url = format!("{}/rest/v1/profiles", self.base_url);
        let response = self
            .transport
            .send(
                self.transport
                    .builder(Method::POST, &url, Some(&access_token))
                    .header("Prefer", "resolution=merge-duplicates,return=representation")
                    .json(&ProfileUpsert {
                        id: &user_id,
                        patch: &patch,
                    }),
            )
            .await?;

        match response.status() {
            status if status.is_success() => parse_json::<Vec<ProfileRow>>(response)
                .await?
                .into_iter()
                .next()
                .map(Profile::from)
                .ok_or_else(|| {
                    BackendError::InvalidResponse("upsert returned no profile row".to_string())
                }),
            StatusCode::UNAUTHORIZED => Err(BackendError::SessionExpired),
            _ => Err(rejection(response).await),
        }
    }

    async fn upload_asset(
        &self,
        access_token: String,
        user_id: String,
        name: String,
        bytes: Vec<u8>,
    ) -> Result<String, BackendError> {
        let object_path = self.object_url("object", &user_id, &name)?;
        let response = self
            .transport
            .send(
                self.transport
                    .builder(Method::POST, object_path.as_str(), Some(&access_token))
                    .header("x-upsert", "true")
                    .header("Content-Type", "application/octet-stream")
                    .body(bytes),
            )
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(BackendError::SessionExpired);
        }
        if !status.is_success() {
            let (_, message) = error_message(response).await;
            return Err(BackendError::Storage(message));
        }

        Ok(self.object_url("object/public", &user_id, &name)?.to_string())
    }
}

impl RestBackend {
    fn object_url(&self, kind: &str, user_id: &str, name: &str) -> Result<Url, BackendError> {
        let mut url = Url::parse(&format!("{}/storage/v1/{kind}", self.base_url))
            .map_err(|err| BackendError::Storage(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| BackendError::Storage("base url cannot be a base".to_string()))?
            .extend([self.avatar_bucket.as_str(), user_id, name]);
        Ok(url)
    }
}

#[derive(Serialize)]
struct Credentials {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Deserialize)]
struct UserResponse {
    id: String,
    email: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: Option<u64>,
    expires_at: Option<u64>,
    user: UserResponse,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self.expires_at.unwrap_or_else(|| {
            SystemClock
                .now()
                .saturating_add(self.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS))
        });
        Session {
            user_id: self.user.id,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    Pending(UserResponse),
}

#[derive(Deserialize)]
struct ErrorResponse {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ProfileRow {
    id: String,
    #[serde(default)]
    onboarding_completed: bool,
    #[serde(default)]
    main_goal: MainGoal,
    #[serde(default)]
    language: Language,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            user_id: row.id,
            onboarding_completed: row.onboarding_completed,
            main_goal: row.main_goal,
            language: row.language,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
        }
    }
}

#[derive(Serialize)]
struct ProfileUpsert<'a> {
    id: &'a str,
    #[serde(flatten)]
    patch: &'a ProfilePatch,
}

async fn parse_json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, BackendError> {
    let body = response
        .text()
        .await
        .map_err(|err| BackendError::NetworkUnreachable(err.to_string()))?;
    serde_json::from_str(&body).map_err(|err| BackendError::InvalidResponse(err.to_string()))
}

async fn rejection(response: Response) -> BackendError {
    let (status, message) = error_message(response).await;
    BackendError::Rejected { status, message }
}

/// Status and the most specific message the error body carries.
async fn error_message(response: Response) -> (u16, String) {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .ok()
        .and_then(|err| {
            err.error_description
                .or(err.msg)
                .or(err.message)
                .or(err.error)
        })
        .unwrap_or(body);
    (status, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn backend(server: &Server) -> RestBackend {
        RestBackend::new(ClientConfig {
            base_url: server.url(),
            api_key: "anon-key".to_string(),
            avatar_bucket: "avatars".to_string(),
            request_timeout_ms: 5_000,
            max_network_retries: 0,
        })
        .expect("backend")
    }

    const TOKEN_BODY: &str = r#"{
        "access_token": "at-1",
        "refresh_token": "rt-1",
        "expires_in": 3600,
        "expires_at": 1900000000,
        "user": {"id": "u1", "email": "ada@example.com"}
    }"#;

    #[tokio::test]
    async fn test_sign_in_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/v1/token?grant_type=password")
            .match_header("apikey", "anon-key")
            .match_body(Matcher::Json(serde_json::json!({
                "email": "ada@example.com",
                "password": "hunter22"
            })))
            .with_status(200)
            .with_body(TOKEN_BODY)
            .create_async()
            .await;

        let session = backend(&server)
            .sign_in("ada@example.com".to_string(), "hunter22".to_string())
            .await
            .expect("session");

        mock.assert_async().await;
        assert_eq!(session.user_id, "u1");
        assert_eq!(session.access_token, "at-1");
        assert_eq!(session.refresh_token, "rt-1");
        assert_eq!(session.expires_at, 1_900_000_000);
    }

    #[tokio::test]
    async fn test_sign_in_invalid_credentials() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/auth/v1/token?grant_type=password")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#)
            .create_async()
            .await;

        let result = backend(&server)
            .sign_in("ada@example.com".to_string(), "nope".to_string())
            .await;
        assert!(matches!(result, Err(BackendError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_sign_up_pending_confirmation() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/auth/v1/signup")
            .with_status(200)
            .with_body(r#"{"id": "u2", "email": "new@example.com"}"#)
            .create_async()
            .await;

        let result = backend(&server)
            .sign_up("new@example.com".to_string(), "hunter22".to_string())
            .await
            .expect("sign up");
        assert_eq!(result.user_id, "u2");
        assert!(result.session.is_none());
    }

    #[tokio::test]
    async fn test_refresh_rejected_is_session_expired() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/auth/v1/token?grant_type=refresh_token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let result = backend(&server).refresh_session("rt-old".to_string()).await;
        assert!(matches!(result, Err(BackendError::SessionExpired)));
    }

    #[tokio::test]
    async fn test_get_session_validates_owner() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/auth/v1/user")
            .match_header("authorization", "Bearer at-1")
            .with_status(200)
            .with_body(r#"{"id": "u1", "email": "ada@example.com"}"#)
            .create_async()
            .await;

        let backend = backend(&server);
        let session = Session {
            user_id: "u1".to_string(),
            access_token: "at-1".to_string(),
            refresh_token: "rt-1".to_string(),
            expires_at: 1_900_000_000,
        };
        assert_eq!(
            backend.get_session(session.clone()).await.expect("live"),
            Some(session.clone())
        );

        let foreign = Session {
            user_id: "someone-else".to_string(),
            ..session
        };
        assert_eq!(backend.get_session(foreign).await.expect("live"), None);
    }

    #[tokio::test]
    async fn test_get_user_unauthorized_is_absent() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/auth/v1/user")
            .with_status(401)
            .with_body(r#"{"msg":"invalid JWT"}"#)
            .create_async()
            .await;

        assert_eq!(
            backend(&server).get_user("at-dead".to_string()).await.expect("user"),
            None
        );
    }

    #[tokio::test]
    async fn test_get_profile_absent_and_present() {
        let mut server = Server::new_async().await;
        let _missing = server
            .mock("GET", "/rest/v1/profiles?id=eq.u-new&select=*")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;
        let _present = server
            .mock("GET", "/rest/v1/profiles?id=eq.u1&select=*")
            .with_status(200)
            .with_body(
                r#"[{"id":"u1","onboarding_completed":true,"main_goal":"reduce_stress","language":"en","display_name":"Ada","avatar_url":null,"created_at":"2024-01-01"}]"#,
            )
            .create_async()
            .await;

        let backend = backend(&server);
        assert_eq!(
            backend
                .get_profile("at".to_string(), "u-new".to_string())
                .await
                .expect("profile"),
            None
        );
        let profile = backend
            .get_profile("at".to_string(), "u1".to_string())
            .await
            .expect("profile")
            .expect("present");
        assert!(profile.onboarding_completed);
        assert_eq!(profile.main_goal, MainGoal::ReduceStress);
        assert_eq!(profile.language, Language::En);
        assert_eq!(profile.display_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_update_profile_sends_only_patched_fields() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/profiles")
            .match_header("prefer", "resolution=merge-duplicates,return=representation")
            .match_body(Matcher::Json(serde_json::json!({
                "id": "u1",
                "language": "en"
            })))
            .with_status(201)
            .with_body(r#"[{"id":"u1","onboarding_completed":false,"main_goal":"unspecified","language":"en"}]"#)
            .create_async()
            .await;

        let profile = backend(&server)
            .update_profile(
                "at".to_string(),
                "u1".to_string(),
                ProfilePatch {
                    language: Some(Language::En),
                    ..ProfilePatch::default()
                },
            )
            .await
            .expect("profile");

        mock.assert_async().await;
        assert_eq!(profile.language, Language::En);
        assert!(!profile.onboarding_completed);
    }

    #[tokio::test]
    async fn test_server_errors_are_network_unreachable() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/profiles")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let mut config = ClientConfig::from_environment(&crate::Environment::Staging, "k".to_string());
        config.base_url = server.url();
        config.max_network_retries = 1;
        let backend = RestBackend::new(config).expect("backend");

        let result = backend
            .update_profile("at".to_string(), "u1".to_string(), ProfilePatch::default())
            .await;

        mock.assert_async().await;
        assert!(matches!(result, Err(BackendError::NetworkUnreachable(_))));
    }

    #[tokio::test]
    async fn test_sign_out_is_attempted_once() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/v1/logout")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let mut config = ClientConfig::from_environment(&crate::Environment::Staging, "k".to_string());
        config.base_url = server.url();
        config.max_network_retries = 2;
        let backend = RestBackend::new(config).expect("backend");

        let result = backend.sign_out("at".to_string()).await;

        mock.assert_async().await;
        assert!(matches!(result, Err(BackendError::NetworkUnreachable(_))));
    }

    #[tokio::test]
    async fn test_get_profile_encodes_user_id() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/profiles")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("id".to_string(), "eq.u1&select=secret".to_string()),
                Matcher::UrlEncoded("select".to_string(), "*".to_string()),
            ]))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let profile = backend(&server)
            .get_profile("at".to_string(), "u1&select=secret".to_string())
            .await
            .expect("profile");

        mock.assert_async().await;
        assert_eq!(profile, None);
    }

    #[tokio::test]
    async fn test_upload_asset_returns_public_url() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/storage/v1/object/avatars/u1/avatar.png")
            .match_header("x-upsert", "true")
            .match_body(vec![1u8, 2, 3])
            .with_status(200)
            .with_body(r#"{"Key":"avatars/u1/avatar.png"}"#)
            .create_async()
            .await;

        let url = backend(&server)
            .upload_asset(
                "at".to_string(),
                "u1".to_string(),
                "avatar.png".to_string(),
                vec![1, 2, 3],
            )
            .await
            .expect("url");

        mock.assert_async().await;
        assert_eq!(
            url,
            format!("{}/storage/v1/object/public/avatars/u1/avatar.png", server.url())
        );
    }

    #[tokio::test]
    async fn test_upload_asset_refused_is_storage_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/storage/v1/object/avatars/u1/big.png")
            .with_status(413)
            .with_body(r#"{"message":"Payload too large"}"#)
            .create_async()
            .await;

        let result = backend(&server)
            .upload_asset("at".to_string(), "u1".to_string(), "big.png".to_string(), vec![0; 8])
            .await;
        match result {
            Err(BackendError::Storage(message)) => assert_eq!(message, "Payload too large"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
