//! The assembled gate: configuration, discovery, key cache and verifier
//!
//! [`TokenGate`] is what the tower middleware holds. It is cheap to clone;
//! all clones share one discovery cache and one key set snapshot.

use std::sync::Arc;

use http::HeaderValue;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::GateConfig;
use crate::discovery::DiscoveryClient;
use crate::error::{ConfigError, RejectionReason, VerifyError};
use crate::http_client::build_client;
use crate::jwt::{Claims, KeySetCache, TokenVerifier};

/// Bearer-token gate for one tenant and one audience
#[derive(Debug, Clone)]
pub struct TokenGate {
    config: Arc<GateConfig>,
    issuer: Arc<str>,
    discovery: Arc<DiscoveryClient>,
    keys: Arc<KeySetCache>,
    verifier: TokenVerifier,
    clock: Arc<dyn Clock>,
}

impl TokenGate {
    /// Build a gate from a configuration
    ///
    /// No network calls are made; see [`warm_up`](Self::warm_up).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: GateConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let client = build_client(&config.http)?;
        let discovery = Arc::new(DiscoveryClient::with_client(
            client.clone(),
            &config.authority_host,
            config.http.max_response_size,
        ));
        let keys = Arc::new(KeySetCache::with_client(
            client,
            &config,
            Arc::clone(&discovery),
        ));
        let verifier = TokenVerifier::new(&config, Arc::clone(&keys));

        Ok(Self {
            issuer: config.authority().into(),
            config: Arc::new(config),
            discovery,
            keys,
            verifier,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the verification clock
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Fetch provider metadata and signing keys ahead of the first request
    ///
    /// Failures are logged and otherwise ignored; the caches fill on demand.
    pub async fn warm_up(&self) {
        let tenant = &self.config.tenant_id;
        if let Err(e) = self.discovery.discover(tenant).await {
            warn!(tenant = %tenant, error = %e, "warm-up discovery failed");
            return;
        }
        match self.keys.prefetch().await {
            Ok(keys) => info!(tenant = %tenant, key_count = keys.len(), "gate warmed up"),
            Err(e) => warn!(tenant = %tenant, error = %e, "warm-up key fetch failed"),
        }
    }

    /// Authenticate a request by its `Authorization` header value
    ///
    /// A missing or non-`Bearer` header is rejected before any network call.
    ///
    /// # Errors
    ///
    /// See [`VerifyError`]; use [`VerifyError::status_code`] to answer.
    pub async fn authenticate(&self, authorization: Option<&HeaderValue>) -> Result<Claims, VerifyError> {
        let result = match bearer_token(authorization) {
            Ok(token) => self.verify_token(token).await,
            Err(reason) => Err(reason.into()),
        };

        if let Err(e) = &result {
            match e.rejection() {
                Some(reason) => debug!(reason = reason.as_str(), "request rejected"),
                None => error!(error = %e, "token verification unavailable"),
            }
        }
        result
    }

    /// Verify a raw compact token against this tenant and audience
    ///
    /// The expected issuer is the tenant authority; discovery refuses any
    /// document naming another issuer. The provider is only contacted once the
    /// token has passed its structural checks and its key must be resolved.
    ///
    /// # Errors
    ///
    /// See [`VerifyError`].
    pub async fn verify_token(&self, token: &str) -> Result<Claims, VerifyError> {
        let now = self.clock.now();
        self.verifier
            .verify(token, &self.issuer, &self.config.client_id, now)
            .await
    }

    /// The configuration this gate was built from
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// The discovery client, for explicit invalidation
    pub fn discovery(&self) -> &DiscoveryClient {
        &self.discovery
    }

    /// The signing key cache, for explicit invalidation and inspection
    pub fn keys(&self) -> &KeySetCache {
        &self.keys
    }
}

/// Extract the token from `Authorization: Bearer <token>`
///
/// The scheme is matched exactly, including case and the single space.
///
/// # Errors
///
/// Returns [`RejectionReason::MissingOrMalformedHeader`] if the header is
/// absent, not visible ASCII, uses another scheme, or carries no token.
pub fn bearer_token(authorization: Option<&HeaderValue>) -> Result<&str, RejectionReason> {
    authorization
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or(RejectionReason::MissingOrMalformedHeader)
}
