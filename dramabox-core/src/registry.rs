// Client Registry
//
// One content client per language, created on first use

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::client::DramaboxClient;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::signer::{HeaderProfile, HmacSigner, RequestSigner};
use crate::token::{HttpTokenIssuer, TokenIssuer, TokenManager};
use crate::transport::Transport;
use crate::validation::normalize_language;

/// Signer factory function type, called with the handle language
pub type SignerFactory = Box<dyn Fn(&str) -> Result<Arc<dyn RequestSigner>> + Send + Sync>;

/// Registry of per-language client handles
///
/// Handles share one [`Transport`] (and so one connection pool) but each owns
/// its token.
pub struct ClientRegistry {
    config: Config,
    transport: Arc<Transport>,
    clock: Arc<dyn Clock>,
    issuer: Arc<dyn TokenIssuer>,
    signer_factory: SignerFactory,
    clients: DashMap<String, Arc<DramaboxClient>>,
}

impl ClientRegistry {
    /// Registry wired to the real upstream
    pub fn new(config: Config) -> Result<Self> {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn builder(config: Config) -> ClientRegistryBuilder {
        ClientRegistryBuilder {
            config,
            transport: None,
            clock: None,
            issuer: None,
            signer_factory: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle for `language`, creating it on first use.
    ///
    /// The code is trimmed and lowercased; blank selects the default language.
    pub fn get(&self, language: &str) -> Result<Arc<DramaboxClient>> {
        let language = normalize_language(language, &self.config.content.default_language)?;

        if let Some(client) = self.clients.get(&language) {
            return Ok(Arc::clone(client.value()));
        }

        let client = self
            .clients
            .entry(language.clone())
            .or_try_insert_with(|| self.create(&language).map(Arc::new))?;
        Ok(Arc::clone(client.value()))
    }

    /// Drop one handle. Returns whether it existed.
    pub fn remove(&self, language: &str) -> bool {
        normalize_language(language, &self.config.content.default_language)
            .map(|language| self.clients.remove(&language).is_some())
            .unwrap_or(false)
    }

    /// Drop every handle; later calls start with fresh tokens
    pub fn clear(&self) {
        let count = self.clients.len();
        self.clients.clear();
        info!(count, "Cleared client handles");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Languages with a live handle, sorted
    #[must_use]
    pub fn languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        languages.sort();
        languages
    }

    fn create(&self, language: &str) -> Result<DramaboxClient> {
        let signer = (self.signer_factory)(language)?;
        let tokens = TokenManager::new(
            language,
            Arc::clone(&self.issuer),
            Arc::clone(&self.clock),
            self.config.auth.refresh_margin(),
        );

        info!(language, "Created client handle");
        Ok(DramaboxClient::new(
            tokens,
            signer,
            Arc::clone(&self.transport),
            Arc::clone(&self.clock),
            self.config.upstream.endpoints.clone(),
            self.config.content.clone(),
        ))
    }
}

/// Builder for [`ClientRegistry`]; unset parts use the production defaults
pub struct ClientRegistryBuilder {
    config: Config,
    transport: Option<Arc<Transport>>,
    clock: Option<Arc<dyn Clock>>,
    issuer: Option<Arc<dyn TokenIssuer>>,
    signer_factory: Option<SignerFactory>,
}

impl ClientRegistryBuilder {
    #[must_use]
    pub fn transport(mut self, transport: Arc<Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn token_issuer(mut self, issuer: Arc<dyn TokenIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    #[must_use]
    pub fn signer_factory(mut self, factory: SignerFactory) -> Self {
        self.signer_factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<ClientRegistry> {
        let config = self.config;
        config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(Transport::new(&config)?),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let issuer: Arc<dyn TokenIssuer> = match self.issuer {
            Some(issuer) => issuer,
            None => Arc::new(HttpTokenIssuer::new(
                Arc::clone(&transport),
                config.upstream.endpoints.token.clone(),
                HeaderProfile::from_config(&config.upstream, &config.content.default_language),
                Arc::clone(&clock),
                config.auth.token_ttl(),
                config.transport.timeout(),
            )),
        };

        let signer_factory = match self.signer_factory {
            Some(factory) => factory,
            None => hmac_signer_factory(&config),
        };

        Ok(ClientRegistry {
            config,
            transport,
            clock,
            issuer,
            signer_factory,
            clients: DashMap::new(),
        })
    }
}

fn hmac_signer_factory(config: &Config) -> SignerFactory {
    let upstream = config.upstream.clone();
    let secret = config.auth.signing_secret.clone().into_bytes();
    Box::new(move |language: &str| {
        let signer = HmacSigner::new(&secret, HeaderProfile::from_config(&upstream, language))?;
        Ok(Arc::new(signer) as Arc<dyn RequestSigner>)
    })
}
