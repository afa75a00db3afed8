//! Client defaults and backend configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::FlowGateError, Environment};

/// Tokens expiring within this window are refreshed before being handed out.
pub const REFRESH_GRACE_WINDOW: Duration = Duration::from_secs(60);

/// Retries (after the first attempt) for transient profile persistence failures.
pub const PROFILE_PERSIST_RETRIES: u32 = 3;

/// Retries (after the first attempt) for transient refresh failures.
pub const REFRESH_RETRIES: u32 = 2;

/// First backoff delay for local retries.
pub const RETRY_MIN_DELAY: Duration = Duration::from_millis(200);

/// Upper bound of a single backoff delay.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// Longest the auto refresher sleeps between wall-clock expiry checks.
pub const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Longest the router waits on session restore before routing with what it has.
pub const MAX_RESTORE_WAIT: Duration = Duration::from_secs(5);

/// Minimum time the splash screen stays up. Presentation only.
pub const SPLASH_MIN_DISPLAY: Duration = Duration::from_millis(1500);

/// Storage bucket holding user avatars.
pub const AVATAR_BUCKET: &str = "avatars";

/// Configuration of the hosted backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
pub struct ClientConfig {
    /// Project base URL, e.g. `https://api.flowgate.app`.
    pub base_url: String,
    /// Public (anon) API key sent with every request.
    pub api_key: String,
    /// Bucket used by `upload_asset` for avatars.
    #[serde(default = "default_avatar_bucket")]
    pub avatar_bucket: String,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Transport-level retries for 429/5xx/connect failures (total attempts = retries + 1).
    #[serde(default = "default_max_network_retries")]
    pub max_network_retries: u32,
}

fn default_avatar_bucket() -> String {
    AVATAR_BUCKET.to_string()
}

const fn default_request_timeout_ms() -> u64 {
    10_000
}

const fn default_max_network_retries() -> u32 {
    2
}

impl ClientConfig {
    /// Default configuration for `environment`.
    #[must_use]
    pub fn from_environment(environment: &Environment, api_key: String) -> Self {
        let base_url = match environment {
            Environment::Staging => "https://staging.api.flowgate.app",
            Environment::Production => "https://api.flowgate.app",
        }
        .to_string();

        Self {
            base_url,
            api_key,
            avatar_bucket: default_avatar_bucket(),
            request_timeout_ms: default_request_timeout_ms(),
            max_network_retries: default_max_network_retries(),
        }
    }

    /// Parses a configuration from JSON. Missing optional fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the JSON is malformed or the base URL is empty.
    pub fn from_json(config: &str) -> Result<Self, FlowGateError> {
        let config: Self =
            serde_json::from_str(config).map_err(|err| FlowGateError::InvalidInput {
                attribute: "config".to_string(),
                reason: err.to_string(),
            })?;
        if config.base_url.trim().is_empty() {
            return Err(FlowGateError::InvalidInput {
                attribute: "base_url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(config)
    }

    pub(crate) const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
