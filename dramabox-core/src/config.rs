use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::HttpMethod;

/// Language used when a caller does not ask for one.
pub const DEFAULT_LANGUAGE: &str = "in";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub auth: AuthConfig,
    pub transport: TransportConfig,
    pub retry: RetryConfig,
    pub content: ContentConfig,
    pub logging: LoggingConfig,
}

/// Where the upstream lives and how the client identifies itself to it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub user_agent: String,
    pub app_version: String,
    pub package_name: String,
    pub time_zone: String,
    pub endpoints: Endpoints,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sapi.dramaboxdb.com".to_string(),
            user_agent: "okhttp/4.10.0".to_string(),
            app_version: "470".to_string(),
            package_name: "com.storymatrix.drama".to_string(),
            time_zone: "+0700".to_string(),
            endpoints: Endpoints::default(),
        }
    }
}

/// A single upstream route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub method: HttpMethod,
    pub path: String,
}

impl Endpoint {
    fn new(method: HttpMethod, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
        }
    }
}

/// Upstream routes used by the content client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub token: Endpoint,
    pub search: Endpoint,
    pub home: Endpoint,
    pub vip: Endpoint,
    pub detail: Endpoint,
    pub chapters: Endpoint,
    pub stream: Endpoint,
    pub categories: Endpoint,
    pub category_books: Endpoint,
    pub recommended: Endpoint,
    /// Channel requested by the home listing
    pub home_channel_id: u32,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            token: Endpoint::new(HttpMethod::Post, "/drama-box/ap001/bootstrap"),
            search: Endpoint::new(HttpMethod::Post, "/drama-box/search/search"),
            home: Endpoint::new(HttpMethod::Post, "/drama-box/he001/theater"),
            vip: Endpoint::new(HttpMethod::Post, "/drama-box/he001/vip"),
            detail: Endpoint::new(HttpMethod::Get, "/drama-box/chapterv2/detail"),
            chapters: Endpoint::new(HttpMethod::Get, "/drama-box/chapterv2/chapters"),
            stream: Endpoint::new(HttpMethod::Get, "/drama-box/chapterv2/play"),
            categories: Endpoint::new(HttpMethod::Get, "/drama-box/he001/classify"),
            category_books: Endpoint::new(HttpMethod::Post, "/drama-box/he001/classify/books"),
            recommended: Endpoint::new(HttpMethod::Get, "/drama-box/he001/recommend"),
            home_channel_id: 43,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Lifetime assumed for tokens when the upstream does not report one
    pub token_ttl_secs: u64,
    /// Refresh once the remaining lifetime drops below this
    pub refresh_margin_secs: u64,
    /// Key for the request signature
    pub signing_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 6 * 60 * 60,
            refresh_margin_secs: 5 * 60,
            signing_secret: "dramabox-default-signing-key".to_string(),
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub const fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    #[must_use]
    pub const fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, the first one included
    pub max_attempts: u32,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_backoff_ms: 200,
            max_backoff_ms: 2_000,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub max_keyword_len: usize,
    pub max_page_size: u32,
    pub batch_concurrency: usize,
    pub default_language: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            max_keyword_len: 200,
            max_page_size: 100,
            batch_concurrency: 4,
            default_language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided; a missing file is an error)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        // an explicitly named file must exist
        if let Some(path) = config_file {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // DRAMABOX_UPSTREAM__BASE_URL, DRAMABOX_RETRY__MAX_ATTEMPTS, ...
        builder = builder.add_source(
            Environment::with_prefix("DRAMABOX")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Reject settings the client cannot work with
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.upstream.base_url)
            .map_err(|e| Error::Config(format!("upstream.base_url: {e}")))?;

        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.min_backoff_ms > self.retry.max_backoff_ms {
            return Err(Error::Config(
                "retry.min_backoff_ms must not exceed retry.max_backoff_ms".to_string(),
            ));
        }
        if self.transport.timeout_ms == 0 {
            return Err(Error::Config("transport.timeout_ms must be positive".to_string()));
        }
        if self.auth.token_ttl_secs == 0 || self.auth.refresh_margin_secs >= self.auth.token_ttl_secs {
            return Err(Error::Config(
                "auth.refresh_margin_secs must be smaller than auth.token_ttl_secs".to_string(),
            ));
        }
        if self.content.max_page_size == 0 || self.content.batch_concurrency == 0 {
            return Err(Error::Config(
                "content.max_page_size and content.batch_concurrency must be positive".to_string(),
            ));
        }
        if self.content.max_keyword_len == 0 {
            return Err(Error::Config("content.max_keyword_len must be positive".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.content.max_keyword_len, 200);
        assert_eq!(config.content.default_language, "in");
        assert_eq!(config.upstream.endpoints.search.method, HttpMethod::Post);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_margin_above_ttl() {
        let mut config = Config::default();
        config.auth.token_ttl_secs = 60;
        config.auth.refresh_margin_secs = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let mut config = Config::default();
        config.upstream.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[upstream]\nbase_url = \"http://127.0.0.1:9000\"\n\n[retry]\nmax_attempts = 5\n\n[upstream.endpoints.vip]\nmethod = \"GET\"\npath = \"/vip\""
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.upstream.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.upstream.endpoints.vip.method, HttpMethod::Get);
        assert_eq!(config.upstream.endpoints.vip.path, "/vip");
        // untouched sections keep their defaults
        assert_eq!(config.transport.timeout_ms, 15_000);
        assert_eq!(config.upstream.endpoints.search.path, "/drama-box/search/search");
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let missing = missing.to_str().unwrap();

        let err = Config::load(Some(missing)).unwrap_err();
        assert!(err.to_string().contains("not found"), "got {err}");
        assert!(Config::from_file(missing).is_err());
    }
}
