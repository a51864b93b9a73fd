//! Shared error types for the Dramabox client
//!
//! One error enum for every layer (token manager, transport, content client).
//! Variants only carry owned strings and integers so the enum is `Clone`: a
//! failed token refresh is fanned out to every task waiting on it.

use thiserror::Error;

/// Maximum response body size accepted from the upstream (16 MB).
pub const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

/// HTTP statuses worth another attempt.
const RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request to {path} timed out after {timeout_ms}ms")]
    Timeout { path: String, timeout_ms: u64 },

    #[error("Upstream returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (code {code}): {message}")]
    Api { code: i64, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    #[error("Response too large ({size} bytes, max {MAX_RESPONSE_SIZE})")]
    ResponseTooLarge { size: u64 },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Whether the transport should make another attempt after this error.
    ///
    /// Connection failures, deadlines and transient upstream statuses
    /// (429, 502, 503, 504) are retried; everything else fails fast.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::Upstream { status, .. } => RETRYABLE_STATUSES.contains(status),
            _ => false,
        }
    }

    /// Whether the upstream rejected the credentials of the request.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Upstream { status: 401 | 403, .. })
    }

    /// Stable machine-readable code for API responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Auth(_) => "UPSTREAM_AUTH_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Timeout { .. } => "REQUEST_TIMEOUT",
            Self::Upstream { status: 429, .. } => "UPSTREAM_RATE_LIMIT",
            Self::Upstream { .. } | Self::Api { .. } | Self::Decode(_) | Self::ResponseTooLarge { .. } => {
                "UPSTREAM_ERROR"
            }
            Self::Network(_) => "UPSTREAM_UNAVAILABLE",
            Self::InvalidHeader(_) | Self::Config(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status a router should answer with for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Timeout { .. } => 408,
            Self::Upstream { status: 429, .. } => 429,
            Self::Auth(_)
            | Self::Upstream { .. }
            | Self::Api { .. }
            | Self::Decode(_)
            | Self::ResponseTooLarge { .. } => 502,
            Self::Network(_) => 503,
            Self::InvalidHeader(_) | Self::Config(_) => 500,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<reqwest::header::InvalidHeaderValue> for Error {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<reqwest::header::InvalidHeaderName> for Error {
    fn from(err: reqwest::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
