//! Page fetching.
//!
//! The crawl passes only need "fetch a URL, get the raw page". The HTTP
//! implementation adds a request timeout, a circuit breaker per host and a
//! bounded retry on throttling and server errors.

use crate::circuit_breaker::{BreakerConfig, BreakerRegistry};
use crate::db::retry::{execute_with_retry_custom, Retriable};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_USER_AGENT: &str = concat!("esports-crawler/", env!("CARGO_PKG_VERSION"));

/// A fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },

    #[error("{url} answered {status}")]
    Status { url: String, status: u16 },

    #[error("circuit open for host {host}")]
    CircuitOpen { host: String },

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout { url: url.to_string() }
        } else {
            FetchError::Request {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    }
}

impl Retriable for FetchError {
    /// Throttling, server errors and timeouts are worth another try.
    fn is_retriable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            FetchError::Request { .. } => true,
            FetchError::CircuitOpen { .. } | FetchError::InvalidUrl(_) => false,
        }
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError>;
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    /// Attempts per page, including the first
    pub max_attempts: u32,
    pub retry_base_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub user_agent: String,
    pub breaker: BreakerConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_base_backoff_ms: 500,
            retry_max_backoff_ms: 10_000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl FetchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: std::env::var("CRAWL_FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_attempts: std::env::var("CRAWL_FETCH_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .map(|retries| retries + 1)
                .unwrap_or(defaults.max_attempts),
            user_agent: std::env::var("CRAWL_USER_AGENT").unwrap_or(defaults.user_agent),
            breaker: BreakerConfig::from_env(),
            ..defaults
        }
    }
}

/// `reqwest` fetcher with per-host circuit breakers.
pub struct HttpFetcher {
    client: Client,
    breakers: BreakerRegistry,
    config: FetchConfig,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("timeout", &self.config.timeout)
            .field("max_attempts", &self.config.max_attempts)
            .finish()
    }
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            breakers: BreakerRegistry::new(config.breaker.clone()),
            config,
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<Page, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), e))?;
        Ok(Page {
            url: final_url,
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?
            .to_string();

        let breaker = self.breakers.for_host(&host);
        if !breaker.is_available() {
            return Err(FetchError::CircuitOpen { host });
        }

        let result = execute_with_retry_custom(
            || self.fetch_once(&parsed),
            self.config.max_attempts,
            self.config.retry_base_backoff_ms,
            self.config.retry_max_backoff_ms,
        )
        .await;

        match &result {
            Ok(page) => {
                breaker.record_success();
                debug!(url, status = page.status, bytes = page.body.len(), "page fetched");
            }
            Err(e) => {
                breaker.record_failure();
                warn!(url, error = %e, "fetch failed");
            }
        }
        result
    }
}
