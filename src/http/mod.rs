use std::sync::Mutex;
use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::config::AppDefaults;
use crate::errors::{AppError, AppResult};

const DEFAULT_RETRY_AFTER_SECS: u64 = 5;
const MERGE_PATCH_CONTENT_TYPE: &str = "application/merge-patch+json";

/// Enforces a minimum spacing between outbound dispatches, shared by every
/// caller of the client.
///
/// Callers reserve a dispatch slot under the lock and sleep until it outside
/// the lock, so concurrent callers get distinct slots at least `min_delay`
/// apart and dispatch in reservation order.
pub struct RateLimiter {
    min_delay: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            next_slot: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let slot = {
            let mut next = self
                .next_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.min_delay);
            slot
        };
        sleep_until(slot).await;
    }
}

/// Exponential backoff schedule for retryable failures: 1s, 2s, 4s, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(16))
}

/// Server-suggested wait from a 429 response, in seconds.
pub fn retry_after_secs(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// Human-readable message from the provider's error envelope, falling back
/// to the HTTP status line when no usable body is present.
pub fn envelope_message(status: StatusCode, body: Option<&serde_json::Value>) -> String {
    body.and_then(|v| {
        v.get("message")
            .or_else(|| v.get("hydra:description"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    })
    .unwrap_or_else(|| {
        format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("error")
        )
    })
}

/// Rate-limited, retrying HTTP client over the provider's REST API.
///
/// 429 responses wait out the server-suggested delay and do not consume the
/// retry budget. 5xx and transport errors retry with exponential backoff up
/// to `max_retries`. Other 4xx responses fail immediately with the parsed
/// envelope message; 401 maps to its own error variant so callers can treat
/// it as a session-invalidation signal.
pub struct HttpClient {
    http: reqwest::Client,
    limiter: RateLimiter,
    max_retries: u32,
}

impl HttpClient {
    pub fn new(defaults: &AppDefaults) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            limiter: RateLimiter::new(Duration::from_millis(defaults.min_request_delay_ms)),
            max_retries: defaults.max_retries,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        token: Option<&str>,
    ) -> AppResult<T> {
        let resp = self
            .execute(|| self.with_auth(self.http.get(url.clone()), token))
            .await?;
        decode_json(resp).await
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &impl Serialize,
        token: Option<&str>,
    ) -> AppResult<T> {
        let resp = self
            .execute(|| self.with_auth(self.http.post(url.clone()).json(body), token))
            .await?;
        decode_json(resp).await
    }

    pub async fn patch_merge<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &impl Serialize,
        token: &str,
    ) -> AppResult<T> {
        let resp = self
            .execute(|| {
                self.http
                    .patch(url.clone())
                    .header(CONTENT_TYPE, MERGE_PATCH_CONTENT_TYPE)
                    .bearer_auth(token)
                    .json(body)
            })
            .await?;
        decode_json(resp).await
    }

    pub async fn delete(&self, url: Url, token: &str) -> AppResult<()> {
        self.execute(|| self.http.delete(url.clone()).bearer_auth(token))
            .await?;
        Ok(())
    }

    pub async fn get_bytes(&self, url: Url, token: &str) -> AppResult<Vec<u8>> {
        let resp = self
            .execute(|| self.http.get(url.clone()).bearer_auth(token))
            .await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| AppError::Network(format!("reading response body: {e}")))?;
        Ok(bytes.to_vec())
    }

    fn with_auth(
        &self,
        builder: reqwest::RequestBuilder,
        token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        match token {
            Some(t) => builder.bearer_auth(t),
            None => builder,
        }
    }

    /// Dispatches one logical request: a single rate-limiter slot, then the
    /// attempt loop. `build` must produce a fresh request each call since
    /// reqwest builders are consumed on send.
    async fn execute<F>(&self, build: F) -> AppResult<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        self.limiter.acquire().await;

        let mut attempt: u32 = 0;
        loop {
            let last_error = match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let wait = retry_after_secs(resp.headers());
                        debug!(wait_secs = wait, "Rate limited by server; waiting");
                        sleep(Duration::from_secs(wait)).await;
                        continue;
                    }

                    let body = resp.json::<serde_json::Value>().await.ok();
                    let message = envelope_message(status, body.as_ref());
                    if status == StatusCode::UNAUTHORIZED {
                        return Err(AppError::Unauthorized(message));
                    }
                    if status.is_client_error() {
                        return Err(AppError::Api(message));
                    }
                    AppError::Api(message)
                }
                Err(e) => AppError::Network(e.to_string()),
            };

            if attempt >= self.max_retries {
                return Err(last_error);
            }
            let delay = backoff_delay(attempt);
            warn!(
                attempt = attempt + 1,
                delay_secs = delay.as_secs(),
                error = %last_error,
                "Request failed; retrying"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

async fn decode_json<T: DeserializeOwned>(resp: reqwest::Response) -> AppResult<T> {
    resp.json::<T>()
        .await
        .map_err(|e| AppError::Unexpected(format!("decoding response: {e}")))
}
