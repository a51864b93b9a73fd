//! Request signing
//!
//! Every upstream call carries the device identity of the current token, the
//! time the request was built and a signature over both. The upstream rejects
//! headers whose timestamp falls outside its clock-skew window, so headers are
//! built right before each attempt and never reused.

use std::collections::BTreeMap;

use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use sha2::Sha256;

use crate::config::UpstreamConfig;
use crate::error::{Error, Result};
use crate::token::Token;

pub const HEADER_TOKEN: &str = "tn";
pub const HEADER_DEVICE_ID: &str = "device-id";
pub const HEADER_LANGUAGE: &str = "language";
pub const HEADER_CURRENT_LANGUAGE: &str = "current-language";
pub const HEADER_TIMESTAMP: &str = "timestamp";
pub const HEADER_SIGNATURE: &str = "sn";
pub const HEADER_USER_AGENT: &str = "user-agent";
pub const HEADER_VERSION: &str = "version";
pub const HEADER_PACKAGE_NAME: &str = "package-name";
pub const HEADER_TIME_ZONE: &str = "time-zone";

/// Header name to value, ordered by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SignedHeaders(BTreeMap<String, String>);

impl SignedHeaders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert for use on a `reqwest` request
    pub fn to_header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(self.0.len());
        for (name, value) in &self.0 {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }
        Ok(headers)
    }
}

/// Strategy deriving the signed header set for one request
///
/// Implementations must be pure: the same token and timestamp always give the
/// same headers.
pub trait RequestSigner: Send + Sync {
    fn build_headers(&self, token: &Token, timestamp: i64) -> SignedHeaders;
}

/// Identification headers sent with every request, signed or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderProfile {
    pub language: String,
    pub user_agent: String,
    pub app_version: String,
    pub package_name: String,
    pub time_zone: String,
}

impl HeaderProfile {
    #[must_use]
    pub fn from_config(upstream: &UpstreamConfig, language: &str) -> Self {
        Self {
            language: language.to_string(),
            user_agent: upstream.user_agent.clone(),
            app_version: upstream.app_version.clone(),
            package_name: upstream.package_name.clone(),
            time_zone: upstream.time_zone.clone(),
        }
    }

    /// Headers that do not depend on a token
    #[must_use]
    pub fn base_headers(&self) -> SignedHeaders {
        let mut headers = SignedHeaders::new();
        headers.insert(HEADER_LANGUAGE, &self.language);
        headers.insert(HEADER_CURRENT_LANGUAGE, &self.language);
        headers.insert(HEADER_USER_AGENT, &self.user_agent);
        headers.insert(HEADER_VERSION, &self.app_version);
        headers.insert(HEADER_PACKAGE_NAME, &self.package_name);
        headers.insert(HEADER_TIME_ZONE, &self.time_zone);
        headers
    }
}

/// HMAC-SHA256 over `{device_id}\n{timestamp}\n{token}`, base64 encoded
#[derive(Clone)]
pub struct HmacSigner {
    mac: Hmac<Sha256>,
    profile: HeaderProfile,
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl HmacSigner {
    pub fn new(secret: &[u8], profile: HeaderProfile) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Config("signing secret must not be empty".to_string()));
        }
        let mac = Hmac::<Sha256>::new_from_slice(secret)
            .map_err(|e| Error::Config(format!("invalid signing secret: {e}")))?;
        Ok(Self { mac, profile })
    }

    #[must_use]
    pub fn profile(&self) -> &HeaderProfile {
        &self.profile
    }

    /// Signature for one (device, timestamp, token) triple
    #[must_use]
    pub fn signature(&self, device_id: &str, timestamp: i64, token_value: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(canonical_string(device_id, timestamp, token_value).as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Check a signature produced by [`HmacSigner::signature`]
    #[must_use]
    pub fn verify(&self, device_id: &str, timestamp: i64, token_value: &str, signature: &str) -> bool {
        let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(canonical_string(device_id, timestamp, token_value).as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

impl RequestSigner for HmacSigner {
    fn build_headers(&self, token: &Token, timestamp: i64) -> SignedHeaders {
        let mut headers = self.profile.base_headers();
        headers.insert(HEADER_TOKEN, format!("Bearer {}", token.value()));
        headers.insert(HEADER_DEVICE_ID, token.device_id());
        headers.insert(HEADER_TIMESTAMP, timestamp.to_string());
        headers.insert(
            HEADER_SIGNATURE,
            self.signature(token.device_id(), timestamp, token.value()),
        );
        headers
    }
}

fn canonical_string(device_id: &str, timestamp: i64, token_value: &str) -> String {
    format!("{device_id}\n{timestamp}\n{token_value}")
}
