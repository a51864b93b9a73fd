//! Token lifecycle
//!
//! Each client handle owns one [`TokenManager`]. The manager is an explicit
//! state machine:
//!
//! ```text
//! Unset ──get_token──▶ Refreshing ──ok──▶ Valid ──margin reached──▶ Expired
//!   ▲                      │                                          │
//!   └────────error─────────┘◀────────────────get_token────────────────┘
//! ```
//!
//! While `Refreshing`, every caller awaits the same shared future, so a burst
//! of requests on a cold handle costs exactly one issuance call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::Endpoint;
use crate::error::{Error, Result};
use crate::signer::{HeaderProfile, HEADER_DEVICE_ID};
use crate::transport::Transport;
use crate::types::Envelope;

/// Upstream credential bound to a device identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    device_id: String,
    #[serde(skip_serializing)]
    value: String,
    issued_at: DateTime<Utc>,
    expiry: DateTime<Utc>,
}

impl Token {
    pub fn new(
        device_id: impl Into<String>,
        value: impl Into<String>,
        issued_at: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::auth("upstream issued an empty token"));
        }
        if expiry <= issued_at {
            return Err(Error::auth(format!(
                "token expiry {expiry} is not after its issue time {issued_at}"
            )));
        }
        Ok(Self {
            device_id: device_id.into(),
            value,
            issued_at,
            expiry,
        })
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    #[must_use]
    pub const fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    #[must_use]
    pub const fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    /// True once less than `margin` of lifetime is left
    #[must_use]
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now.checked_add_signed(margin)
            .map_or(true, |deadline| deadline >= self.expiry)
    }
}

/// Strategy obtaining a fresh token from the upstream
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, language: &str) -> Result<Token>;
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Arc<Token>>>>;

enum TokenState {
    Unset,
    Valid(Arc<Token>),
    Refreshing { generation: u64, future: RefreshFuture },
}

struct Inner {
    state: TokenState,
    generation: u64,
}

/// Per-handle token cache with single-flight refresh
pub struct TokenManager {
    language: String,
    issuer: Arc<dyn TokenIssuer>,
    clock: Arc<dyn Clock>,
    refresh_margin: chrono::Duration,
    inner: Arc<Mutex<Inner>>,
}

impl TokenManager {
    pub fn new(
        language: impl Into<String>,
        issuer: Arc<dyn TokenIssuer>,
        clock: Arc<dyn Clock>,
        refresh_margin: Duration,
    ) -> Self {
        Self {
            language: language.into(),
            issuer,
            clock,
            refresh_margin: chrono::Duration::from_std(refresh_margin)
                .unwrap_or_else(|_| chrono::Duration::zero()),
            inner: Arc::new(Mutex::new(Inner {
                state: TokenState::Unset,
                generation: 0,
            })),
        }
    }

    /// Current token, refreshing it first when missing or about to expire
    pub async fn get_token(&self) -> Result<Arc<Token>> {
        let future = {
            let mut inner = self.inner.lock();
            match &inner.state {
                TokenState::Valid(token) if !self.is_stale(token) => return Ok(Arc::clone(token)),
                TokenState::Refreshing { future, .. } => future.clone(),
                TokenState::Valid(_) | TokenState::Unset => self.start_refresh(&mut inner),
            }
        };

        future.await
    }

    /// Valid cached token, without refreshing
    #[must_use]
    pub fn cached(&self) -> Option<Arc<Token>> {
        match &self.inner.lock().state {
            TokenState::Valid(token) if !self.is_stale(token) => Some(Arc::clone(token)),
            _ => None,
        }
    }

    /// Drop `rejected` so the next call issues a new token.
    ///
    /// Only the exact token the upstream rejected is dropped. A newer cached
    /// token or an in-flight refresh is left alone.
    pub fn invalidate(&self, rejected: &Arc<Token>) {
        let mut inner = self.inner.lock();
        match &inner.state {
            TokenState::Valid(current) if Arc::ptr_eq(current, rejected) => {
                debug!(language = %self.language, "Dropping rejected token");
                inner.state = TokenState::Unset;
            }
            _ => debug!(language = %self.language, "Rejected token already replaced"),
        }
    }

    /// One of `unset`, `valid`, `refreshing` or `expired`
    #[must_use]
    pub fn state_name(&self) -> &'static str {
        match &self.inner.lock().state {
            TokenState::Unset => "unset",
            TokenState::Valid(token) if self.is_stale(token) => "expired",
            TokenState::Valid(_) => "valid",
            TokenState::Refreshing { .. } => "refreshing",
        }
    }

    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    fn is_stale(&self, token: &Token) -> bool {
        token.needs_refresh_at(self.clock.now(), self.refresh_margin)
    }

    fn start_refresh(&self, inner: &mut Inner) -> RefreshFuture {
        inner.generation += 1;
        let generation = inner.generation;

        debug!(language = %self.language, generation, "Refreshing upstream token");

        let issuer = Arc::clone(&self.issuer);
        let clock = Arc::clone(&self.clock);
        let shared_state = Arc::clone(&self.inner);
        let language = self.language.clone();

        let future = async move {
            let result = match issuer.issue(&language).await {
                Ok(token) if token.is_expired_at(clock.now()) => {
                    Err(Error::auth("upstream issued an already expired token"))
                }
                Ok(token) => Ok(Arc::new(token)),
                Err(err @ Error::Auth(_)) => Err(err),
                Err(err) => Err(Error::auth(err.to_string())),
            };

            {
                let mut inner = shared_state.lock();
                let current = matches!(
                    inner.state,
                    TokenState::Refreshing { generation: g, .. } if g == generation
                );
                if current {
                    inner.state = match &result {
                        Ok(token) => TokenState::Valid(Arc::clone(token)),
                        Err(_) => TokenState::Unset,
                    };
                }
            }

            if let Err(err) = &result {
                warn!(language = %language, error = %err, "Token refresh failed");
            }
            result
        }
        .boxed()
        .shared();

        inner.state = TokenState::Refreshing {
            generation,
            future: future.clone(),
        };
        future
    }
}

/// Obtains tokens from the upstream bootstrap endpoint
pub struct HttpTokenIssuer {
    transport: Arc<Transport>,
    endpoint: Endpoint,
    profile: HeaderProfile,
    clock: Arc<dyn Clock>,
    default_ttl: chrono::Duration,
    timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BootstrapData {
    #[serde(default)]
    user: Option<BootstrapUser>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BootstrapUser {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl HttpTokenIssuer {
    pub fn new(
        transport: Arc<Transport>,
        endpoint: Endpoint,
        profile: HeaderProfile,
        clock: Arc<dyn Clock>,
        default_ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            endpoint,
            profile,
            clock,
            default_ttl: chrono::Duration::from_std(default_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
            timeout,
        }
    }

    async fn bootstrap(&self, language: &str, device_id: &str) -> Result<BootstrapData> {
        let mut headers = HeaderProfile {
            language: language.to_string(),
            ..self.profile.clone()
        }
        .base_headers();
        headers.insert(HEADER_DEVICE_ID, device_id);

        let response = self
            .transport
            .request(
                self.endpoint.method,
                &self.endpoint.path,
                &json!({ "distinctId": null }),
                headers.to_header_map()?,
                self.timeout,
            )
            .await?;

        let envelope: Envelope<BootstrapData> = response.json()?;
        Ok(envelope.into_data()?.unwrap_or_default())
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn issue(&self, language: &str) -> Result<Token> {
        let device_id = uuid::Uuid::new_v4().to_string();
        let issued_at = self.clock.now();

        let data = self
            .bootstrap(language, &device_id)
            .await
            .map_err(|e| Error::auth(format!("token issuance failed: {e}")))?;

        let (user_token, user_ttl) = data
            .user
            .map(|user| (user.token, user.expires_in))
            .unwrap_or_default();

        let value = user_token
            .or(data.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::auth("token issuance response carried no token"))?;

        let ttl = user_ttl
            .or(data.expires_in)
            .filter(|secs| *secs > 0)
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(self.default_ttl);
        let expiry = issued_at
            .checked_add_signed(ttl)
            .ok_or_else(|| Error::auth("token lifetime out of range"))?;

        debug!(language, device_id = %device_id, "Issued upstream token");
        Token::new(device_id, value, issued_at, expiry)
    }
}
