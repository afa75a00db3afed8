use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, RequestBuilder, Response, StatusCode};

use super::BackendError;

/// Shared HTTP client for the REST endpoints.
///
/// Every request carries the project API key, a user agent and the configured
/// timeout. Answers the backend may give differently a moment later (429 and
/// 5xx) and connect or timeout failures surface as
/// [`BackendError::NetworkUnreachable`]; everything else is left to the endpoint.
pub struct Transport {
    client: reqwest::Client,
    api_key: String,
    timeout: Duration,
    max_retries: u32,
}

impl Transport {
    pub fn new(api_key: String, timeout: Duration, max_retries: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            timeout,
            max_retries,
        }
    }

    /// Starts a request, authorized with `access_token` or else the API key.
    pub fn builder(&self, method: Method, url: &str, access_token: Option<&str>) -> RequestBuilder {
        self.client
            .request(method, url)
            .timeout(self.timeout)
            .header("apikey", &self.api_key)
            .bearer_auth(access_token.unwrap_or(&self.api_key))
            .header(
                "User-Agent",
                format!("flowgate-core/{}", env!("CARGO_PKG_VERSION")),
            )
    }

    /// Sends `request`, retrying unreachable outcomes with backoff.
    ///
    /// Streaming bodies cannot be replayed and get a single attempt.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let Some(template) = request.try_clone() else {
            return attempt(request).await;
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.max_retries as usize);

        (|| async {
            match template.try_clone() {
                Some(request) => attempt(request).await,
                None => Err(BackendError::Rejected {
                    status: 0,
                    message: "request body cannot be replayed".to_string(),
                }),
            }
        })
        .retry(backoff)
        .when(BackendError::is_transient)
        .notify(|err: &BackendError, delay: Duration| {
            log::debug!("backend call retried in {delay:?}: {err}");
        })
        .await
    }

    /// Sends `request` exactly once.
    pub async fn send_once(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        attempt(request).await
    }
}

async fn attempt(request: RequestBuilder) -> Result<Response, BackendError> {
    let (client, request) = request.build_split();
    let request = request.map_err(|err| BackendError::Rejected {
        status: 0,
        message: format!("malformed request: {err}"),
    })?;
    let endpoint = request.url().path().to_string();

    match client.execute(request).await {
        Ok(response) if unavailable(response.status()) => Err(BackendError::NetworkUnreachable(
            format!("{endpoint} answered {}", response.status()),
        )),
        Ok(response) => Ok(response),
        Err(err) if err.is_timeout() || err.is_connect() => {
            Err(BackendError::NetworkUnreachable(format!("{endpoint}: {err}")))
        }
        Err(err) => Err(BackendError::Rejected {
            status: err.status().map_or(0, |status| status.as_u16()),
            message: format!("{endpoint}: {err}"),
        }),
    }
}

/// Statuses that say "not now" rather than "no".
fn unavailable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
