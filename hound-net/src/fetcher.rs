//! Retrying, rate-limited fetcher
//!
//! Every attempt first draws a token from the target's bucket. Timeouts,
//! connection failures and 5xx are retried with exponential backoff; 429 honours
//! Retry-After. DNS, TLS and malformed URLs fail at once. Any other status,
//! including 404, is a successful fetch: deciding what it means is the
//! checker's job.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use hound_core::ProbeError;

use crate::{FetchRequest, HttpConfig, RateLimitConfig, RateLimiter, Transport};

/// A response worth handing to a checker
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    pub final_url: String,
    /// Attempts used, including the successful one
    pub attempts: u32,
    /// Wall time across all attempts and waits
    pub elapsed: Duration,
}

/// Tri-state fetch result
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(FetchResponse),
    /// Retries exhausted
    Transient {
        attempts: u32,
        message: String,
        /// The last attempt was answered with 429
        rate_limited: bool,
    },
    /// Not worth retrying
    Fatal { message: String },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    /// The probe error a failed outcome stands for
    pub fn into_result(self) -> Result<FetchResponse, ProbeError> {
        match self {
            FetchOutcome::Success(response) => Ok(response),
            FetchOutcome::Transient {
                attempts,
                rate_limited: true,
                ..
            } => Err(ProbeError::RateLimitExceeded { attempts }),
            FetchOutcome::Transient {
                attempts, message, ..
            } => Err(ProbeError::TransientNetwork { attempts, message }),
            FetchOutcome::Fatal { message } => Err(ProbeError::FatalPlatform(message)),
        }
    }
}

/// The engine's single external-call primitive
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    limits: RateLimitConfig,
    limiters: DashMap<String, Arc<RateLimiter>>,
    attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    max_retry_after: Duration,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, http: &HttpConfig, limits: RateLimitConfig) -> Self {
        Self {
            transport,
            limits,
            limiters: DashMap::new(),
            attempts: http.attempts.max(1),
            backoff_base: Duration::from_millis(http.backoff_base_ms),
            backoff_cap: Duration::from_millis(http.backoff_cap_ms.max(http.backoff_base_ms)),
            max_retry_after: Duration::from_secs(http.max_retry_after_secs),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The bucket for a target, created on first use
    pub fn limiter_for(&self, target: &str, rate_hint: f64) -> Arc<RateLimiter> {
        self.limiters
            .entry(target.to_lowercase())
            .or_insert_with(|| Arc::new(RateLimiter::from_config(&self.limits.scaled(rate_hint))))
            .clone()
    }

    pub async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let limiter = self.limiter_for(&request.target, request.rate_hint);
        let started = Instant::now();
        let mut last_error = String::new();
        let mut rate_limited = false;

        for attempt in 0..self.attempts {
            limiter.acquire().await;

            let delay = match self.transport.send(request).await {
                Ok(response) if response.status == 429 => {
                    rate_limited = true;
                    last_error = "HTTP 429 Too Many Requests".to_string();
                    response
                        .retry_after
                        .as_deref()
                        .and_then(|value| parse_retry_after(value, Utc::now()))
                        .map(|wait| wait.min(self.max_retry_after))
                        .unwrap_or_else(|| self.backoff(attempt))
                }
                Ok(response) if response.status >= 500 => {
                    rate_limited = false;
                    last_error = format!("HTTP {}", response.status);
                    self.backoff(attempt)
                }
                Ok(response) => {
                    return FetchOutcome::Success(FetchResponse {
                        status: response.status,
                        body: response.body,
                        final_url: response.final_url,
                        attempts: attempt + 1,
                        elapsed: started.elapsed(),
                    });
                }
                Err(e) if e.is_retriable() => {
                    rate_limited = false;
                    last_error = e.to_string();
                    self.backoff(attempt)
                }
                Err(e) => {
                    warn!("Fetch of {} failed: {}", request.url, e);
                    return FetchOutcome::Fatal {
                        message: e.to_string(),
                    };
                }
            };

            if attempt + 1 < self.attempts {
                debug!(
                    "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    self.attempts,
                    request.url,
                    last_error,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        warn!(
            "Giving up on {} after {} attempts: {}",
            request.url, self.attempts, last_error
        );
        FetchOutcome::Transient {
            attempts: self.attempts,
            message: last_error,
            rate_limited,
        }
    }

    /// base * 2^attempt, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }
}

/// Parse a Retry-After value: delta seconds or an HTTP date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

const ROOT_PATHS: &[&str] = &["", "/index.html", "/index.php", "/index", "/home"];

/// Whether a request with a path ended up on a site's landing page
pub fn redirected_to_root(requested: &str, final_url: &str) -> bool {
    let (Ok(requested), Ok(landed)) = (Url::parse(requested), Url::parse(final_url)) else {
        return false;
    };
    let requested_path = requested.path().trim_end_matches('/').to_lowercase();
    let landed_path = landed.path().trim_end_matches('/').to_lowercase();

    !requested_path.is_empty()
        && requested_path != landed_path
        && ROOT_PATHS.contains(&landed_path.as_str())
}
