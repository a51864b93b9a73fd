//! HTTP transport to the upstream API
//!
//! One attempt maps to exactly one upstream request. [`Transport::request_with_retry`]
//! layers exponential backoff on top, rebuilding headers before every attempt
//! so each carries a fresh timestamp and signature.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Config, RetryConfig};
use crate::error::{Error, Result, MAX_RESPONSE_SIZE};

/// Upstream error bodies are cut to this many characters
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// Successful (2xx) upstream response
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Bytes,
}

impl RawResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.len() > MAX_RESPONSE_SIZE {
            return Err(Error::ResponseTooLarge {
                size: self.body.len() as u64,
            });
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Shared HTTP client bound to one upstream base URL
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    base_url: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl Transport {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.transport.connect_timeout())
            .timeout(config.transport.timeout())
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, config))
    }

    /// Use an existing `reqwest` client
    #[must_use]
    pub fn with_client(client: Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.upstream.base_url.trim_end_matches('/').to_string(),
            timeout: config.transport.timeout(),
            retry: config.retry.clone(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Default per-attempt timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Perform a single attempt.
    ///
    /// GET sends `params` as query parameters, POST as a JSON body.
    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        params: &Value,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<RawResponse> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, path, "Upstream request");

        let builder = self
            .client
            .request(method.as_reqwest(), &url)
            .headers(headers)
            .timeout(timeout);

        let builder = match method {
            HttpMethod::Get => builder.query(&query_pairs(params)),
            HttpMethod::Post => builder.json(params),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| classify(e, path, timeout))?;

        let status = response.status();
        if let Some(len) = response.content_length() {
            if len as usize > MAX_RESPONSE_SIZE {
                return Err(Error::ResponseTooLarge { size: len });
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| classify(e, path, timeout))?;
        if body.len() > MAX_RESPONSE_SIZE {
            return Err(Error::ResponseTooLarge {
                size: body.len() as u64,
            });
        }

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(Error::Upstream {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        Ok(RawResponse {
            status: status.as_u16(),
            body,
        })
    }

    /// Perform a request, retrying transient failures with exponential
    /// backoff.
    ///
    /// `headers` runs before every attempt. An error from it aborts the call
    /// unless it is itself retryable.
    pub async fn request_with_retry<F, Fut>(
        &self,
        method: HttpMethod,
        path: &str,
        params: &Value,
        timeout: Duration,
        mut headers: F,
    ) -> Result<RawResponse>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<HeaderMap>>,
    {
        let mut last_err = None;
        let mut attempt = 0u32;
        for delay in std::iter::once(Duration::ZERO).chain(self.backoff()) {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;

            let result = match headers().await {
                Ok(map) => self.request(method, path, params, map, timeout).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => {
                    warn!(
                        path,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "Upstream request failed, will retry"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Network(format!("retries exhausted for {path}"))))
    }

    /// Delays between attempts; empty when only one attempt is allowed
    fn backoff(&self) -> impl Iterator<Item = Duration> {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.retry.min_backoff_ms))
            .with_max_delay(Duration::from_millis(self.retry.max_backoff_ms))
            .with_max_times(self.retry.max_attempts.saturating_sub(1) as usize);
        if self.retry.jitter {
            builder = builder.with_jitter();
        }
        builder.build()
    }
}

fn classify(err: reqwest::Error, path: &str, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout {
            path: path.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        Error::from(err)
    }
}

/// Flatten a JSON object into query pairs, dropping nulls
fn query_pairs(params: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = params else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((key.clone(), s.clone())),
            other => Some((key.clone(), other.to_string())),
        })
        .collect()
}
