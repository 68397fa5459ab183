//! Upstream HTTP plumbing: a mockable transport plus the retry executor
//! every provider call goes through.

use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use rand::Rng;
use reqwest::StatusCode;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const USER_AGENT: &str = concat!("aloft/", env!("CARGO_PKG_VERSION"));

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    /// Bad or missing credential (401). Not retried; the provider is
    /// reported once and skipped.
    #[error("upstream rejected credentials: {0}")]
    Config(String),
    /// Connection-level failure; retryable.
    #[error("transport error: {0}")]
    Transport(String),
    /// Call exceeded the per-request deadline; retryable.
    #[error("request timed out")]
    Timeout,
    /// Upstream said 429, or the proactive budget refused the call.
    /// Retried with the server's Retry-After when given; on exhaustion the
    /// caller opens a shared-quota cooldown.
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },
    /// Upstream has no data for this query. Mapped to `Ok(None)` by the
    /// executor, never retried.
    #[error("not found")]
    NotFound,
    /// Any other non-success status; 5xx retryable, 4xx not.
    #[error("upstream returned status {status}")]
    Upstream { status: u16 },
    #[error("malformed response body: {0}")]
    Decode(String),
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::Timeout | FetchError::RateLimited { .. } => true,
            FetchError::Upstream { status } => *status >= 500,
            FetchError::Config(_) | FetchError::NotFound | FetchError::Decode(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// The one seam between providers and the network. Mocked in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                Err(FetchError::Config("unauthorized (check API token)".into()))
            }
            StatusCode::NOT_FOUND => Err(FetchError::NotFound),
            StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited {
                retry_after: parse_retry_after(&response),
            }),
            status if !status.is_success() => Err(FetchError::Upstream {
                status: status.as_u16(),
            }),
            _ => response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| FetchError::Decode(e.to_string())),
        }
    }
}

/// Exponential backoff with a hard cap; jitter is applied at sleep time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Deterministic delay before retry number `attempt` (0-based):
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// A server-sent Retry-After wins over backoff but is still capped.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(ra) => ra.min(self.max_delay),
            None => self.backoff_delay(attempt),
        }
    }
}

/// Spread sleeps by up to one extra base delay so synchronized retries don't
/// stampede. The configured maximum bounds the jittered result as well.
fn with_jitter(delay: Duration, policy: &RetryPolicy) -> Duration {
    if policy.base_delay.is_zero() {
        return delay;
    }
    let jitter = policy.base_delay.mul_f64(rand::thread_rng().gen_range(0.0..1.0));
    (delay + jitter).min(policy.max_delay)
}

/// Run a transport call with retries.
///
/// 404 means "no data for this target" and comes back as `Ok(None)`.
/// Retryable failures sleep (Retry-After when the server sent one) and go
/// again up to `max_retries` times; everything else surfaces immediately.
pub async fn fetch_with_retry(
    transport: &dyn Transport,
    url: &str,
    policy: &RetryPolicy,
) -> Result<Option<serde_json::Value>, FetchError> {
    let mut attempt = 0u32;
    loop {
        match transport.get_json(url).await {
            Ok(value) => return Ok(Some(value)),
            Err(FetchError::NotFound) => return Ok(None),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = with_jitter(policy.effective_delay(attempt, err.retry_after()), policy);
                warn!(
                    "fetch attempt {} failed ({}), retrying in {:?}: {}",
                    attempt + 1,
                    err,
                    delay,
                    url
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
