//! HTTP transport
//!
//! One attempt, no retries, no pacing. The [`Fetcher`](crate::Fetcher) layers
//! those on top of whatever [`Transport`] it is given.

use async_trait::async_trait;
use reqwest::header::{RETRY_AFTER, USER_AGENT};
use reqwest::{redirect, Client, Proxy, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error as _;
use std::time::Duration;
use thiserror::Error;

use hound_core::{Platform, DEFAULT_ATTEMPTS, DEFAULT_TIMEOUT_SECS};

/// HTTP client and retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Total attempts per fetch, including the first
    pub attempts: u32,
    /// First backoff delay; doubles on every retry
    pub backoff_base_ms: u64,
    /// Upper bound on a single backoff delay
    pub backoff_cap_ms: u64,
    /// Longest Retry-After that is honoured as given
    pub max_retry_after_secs: u64,
    /// Optional proxy (http, https or socks5h URL)
    pub proxy: Option<String>,
    /// Fixed user agent; a rotating browser agent is used when unset
    pub user_agent: Option<String>,
    /// Maximum redirects followed per request
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            attempts: DEFAULT_ATTEMPTS,
            backoff_base_ms: 500,
            backoff_cap_ms: 8_000,
            max_retry_after_secs: 60,
            proxy: None,
            user_agent: None,
            max_redirects: 10,
        }
    }
}

/// Errors from a single transport attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("DNS resolution failed: {0}")]
    Dns(String),

    #[error("TLS failure: {0}")]
    Tls(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Request failed: {0}")]
    Other(String),
}

impl TransportError {
    /// Timeouts, refused connections and unclassified failures are worth retrying
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout(_) | TransportError::Connect(_) | TransportError::Other(_)
        )
    }
}

/// A single outbound GET
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    /// Per-request timeout override
    pub timeout: Option<Duration>,
    /// Rate-limit bucket this request draws from
    pub target: String,
    /// Multiplier on the bucket's refill rate
    pub rate_hint: f64,
}

impl FetchRequest {
    /// Plain GET limited per URL host
    pub fn get(url: &str) -> Self {
        let target = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string());
        Self {
            url: url.to_string(),
            headers: BTreeMap::new(),
            timeout: None,
            target,
            rate_hint: 1.0,
        }
    }

    /// GET against a platform, limited per platform with its headers and hints
    pub fn for_platform(platform: &Platform, url: &str) -> Self {
        Self {
            url: url.to_string(),
            headers: platform.headers.clone(),
            timeout: platform.timeout_secs.map(Duration::from_secs),
            target: platform.name.to_lowercase(),
            rate_hint: platform.rate_hint,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

/// What came back from one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    /// URL after following redirects
    pub final_url: String,
    /// Raw Retry-After header value
    pub retry_after: Option<String>,
}

/// One HTTP attempt against the outside world
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &FetchRequest) -> Result<RawResponse, TransportError>;
}

/// User agents for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:137.0) Gecko/20100101 Firefox/137.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.7; rv:137.0) Gecko/20100101 Firefox/137.0",
];

pub fn random_user_agent() -> &'static str {
    use rand::Rng;
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Build the shared, connection-pooling HTTP client
pub fn create_client(config: &HttpConfig) -> Result<Client, TransportError> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .redirect(redirect::Policy::limited(config.max_redirects))
        .pool_idle_timeout(Duration::from_secs(90));

    if let Some(proxy) = &config.proxy {
        let proxy = Proxy::all(proxy).map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| TransportError::ClientBuild(e.to_string()))
}

/// reqwest-backed transport sharing one client across all probes
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    user_agent: Option<String>,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        Ok(Self {
            client: create_client(config)?,
            user_agent: config.user_agent.clone(),
        })
    }

    /// Configured agent, or a fresh pick from the rotation
    fn user_agent(&self) -> &str {
        match self.user_agent.as_deref() {
            Some(agent) => agent,
            None => random_user_agent(),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &FetchRequest) -> Result<RawResponse, TransportError> {
        let url = Url::parse(&request.url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let user_agent = self.user_agent();

        let mut builder = self.client.get(url).header(USER_AGENT, user_agent);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(classify)?;

        Ok(RawResponse {
            status,
            body,
            final_url,
            retry_after,
        })
    }
}

/// Map a reqwest error onto the transport taxonomy
fn classify(err: reqwest::Error) -> TransportError {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    classify_message(&chain, err.is_timeout(), err.is_connect(), err.is_builder())
}

/// Classification over the flattened error chain
pub fn classify_message(
    chain: &str,
    is_timeout: bool,
    is_connect: bool,
    is_builder: bool,
) -> TransportError {
    let lower = chain.to_lowercase();
    let message = chain.to_string();

    if is_builder || lower.contains("relative url") || lower.contains("invalid url") {
        return TransportError::InvalidUrl(message);
    }
    if is_timeout {
        return TransportError::Timeout(message);
    }
    if lower.contains("dns error")
        || lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("no such host")
        || lower.contains("nodename nor servname")
    {
        return TransportError::Dns(message);
    }
    if lower.contains("certificate") || lower.contains("tls") || lower.contains("handshake") {
        return TransportError::Tls(message);
    }
    if is_connect {
        return TransportError::Connect(message);
    }
    TransportError::Other(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HttpConfig::default();
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.attempts, 3);
        assert!(config.proxy.is_none());
    }

    #[test]
    fn test_random_user_agent() {
        assert!(random_user_agent().contains("Mozilla"));
    }

    #[test]
    fn test_classify_message() {
        let dns = classify_message(
            "error sending request: client error (Connect): dns error: failed to lookup address information",
            false,
            true,
            false,
        );
        assert!(matches!(dns, TransportError::Dns(_)));
        assert!(!dns.is_retriable());

        let tls = classify_message("invalid peer certificate: UnknownIssuer", false, true, false);
        assert!(matches!(tls, TransportError::Tls(_)));

        let refused = classify_message("tcp connect error: Connection refused", false, true, false);
        assert!(matches!(refused, TransportError::Connect(_)));
        assert!(refused.is_retriable());

        let timeout = classify_message("operation timed out", true, false, false);
        assert!(timeout.is_retriable());
    }

    #[test]
    fn test_request_targets() {
        let request = FetchRequest::get("https://github.com/alice123");
        assert_eq!(request.target, "github.com");

        let platform = Platform::new("GitHub", "https://github.com/{username}").with_rate_hint(0.5);
        let request = FetchRequest::for_platform(&platform, "https://github.com/alice123");
        assert_eq!(request.target, "github");
        assert_eq!(request.rate_hint, 0.5);
    }

    #[test]
    fn test_configured_user_agent_wins() {
        let config = HttpConfig {
            user_agent: Some("tracehound-test/1.0".to_string()),
            ..HttpConfig::default()
        };
        let transport = ReqwestTransport::new(&config).unwrap();
        assert_eq!(transport.user_agent(), "tracehound-test/1.0");

        let rotating = ReqwestTransport::new(&HttpConfig::default()).unwrap();
        assert!(USER_AGENTS.contains(&rotating.user_agent()));
    }

    #[tokio::test]
    async fn test_invalid_url_is_fatal() {
        let transport = ReqwestTransport::new(&HttpConfig::default()).unwrap();
        let err = transport
            .send(&FetchRequest::get("not a url"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
    }
}
