//! Network fetch capability and the HTTP client behind it

use crate::{NetworkConfig, NetworkError, Result, RetryConfig};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Response of a completed fetch.
///
/// Any status is a completed fetch; only transport failures are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// HTTP status
    pub status: u16,
    /// Response headers (lowercase names)
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
}

impl FetchResponse {
    /// Create a response with no headers
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Add header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.into().to_ascii_lowercase(), value.into()));
        self
    }

    /// Check for status 200
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Value of the `content-type` header
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// Performs one bounded network fetch
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, failing with [`NetworkError::Timeout`] after `timeout`
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse>;
}

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Enable compression
    pub compression: bool,
    /// User agent
    pub user_agent: String,
}

impl From<&NetworkConfig> for ClientConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            compression: config.compression,
            user_agent: config.user_agent.clone(),
        }
    }
}

/// `reqwest`-backed [`Fetcher`]
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut builder = Client::builder().user_agent(&config.user_agent);

        if config.compression {
            builder = builder.gzip(true).brotli(true);
        }

        let client = builder
            .build()
            .map_err(|e| NetworkError::Configuration(e.to_string()))?;

        Ok(Self { client })
    }

    /// Single fetch attempt
    async fn fetch_once(&self, url: &str) -> Result<FetchResponse> {
        let response = self.client.get(url).send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Fetcher for HttpClient {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse> {
        debug!("Fetching: {}", url);
        // Dropping the request future on expiry cancels it
        match tokio::time::timeout(timeout, self.fetch_once(url)).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout(timeout.as_millis() as u64)),
        }
    }
}

/// Fetch with the fixed-backoff retry policy.
///
/// Retryable failures ([`NetworkError::is_retryable`]) are attempted again up
/// to `retry.max_retries` times, sleeping `retry.backoff` in between. The last
/// error is returned unchanged so callers can still tell a timeout apart.
pub async fn fetch_with_retry<F>(
    fetcher: &F,
    url: &str,
    timeout: Duration,
    retry: &RetryConfig,
) -> Result<FetchResponse>
where
    F: Fetcher + ?Sized,
{
    let mut attempt = 0;

    loop {
        match fetcher.fetch(url, timeout).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                attempt += 1;
                warn!(
                    "Fetch of {} failed (attempt {}): {}; retrying in {:?}",
                    url, attempt, e, retry.backoff
                );
                tokio::time::sleep(retry.backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
