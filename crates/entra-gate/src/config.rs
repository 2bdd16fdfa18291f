//! Gate Configuration Types
//!
//! A [`GateConfig`] is built once at startup (by whatever owns process
//! configuration) and handed to [`TokenGate::new`](crate::TokenGate::new).
//! Components never read the environment themselves.

use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::ConfigError;

/// Default Entra ID authority host
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Well-known path of the OIDC discovery document, relative to the authority
pub const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// Largest accepted clock skew
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(3600);

/// Gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Directory tenant id, in GUID form
    ///
    /// Discovery for a domain name (`contoso.onmicrosoft.com`) returns the
    /// GUID issuer, which never matches an authority built from the domain.
    pub tenant_id: String,
    /// Application (client) id; tokens must name it in `aud`
    pub client_id: String,
    /// Scheme and host of the identity provider
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
    /// Algorithms a token header may name
    #[serde(default = "default_algorithms")]
    pub allowed_algorithms: Vec<Algorithm>,
    /// Tolerance applied to `exp` and `nbf`
    #[serde(default)]
    pub clock_skew: Duration,
    /// Insert validated claims into request extensions
    #[serde(default = "default_true")]
    pub expose_claims: bool,
    /// Outbound HTTP settings
    #[serde(default)]
    pub http: HttpConfig,
    /// Signing key cache settings
    #[serde(default)]
    pub key_cache: KeyCacheConfig,
}

/// Outbound HTTP settings for calls to the identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Whole-request timeout (default: 10 seconds)
    pub request_timeout: Duration,
    /// TCP/TLS connect timeout (default: 5 seconds)
    pub connect_timeout: Duration,
    /// Maximum accepted response body (default: 64 KiB)
    pub max_response_size: usize,
    /// User agent for outbound requests
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            max_response_size: 64 * 1024,
            user_agent: format!("entra-gate/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Signing key cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyCacheConfig {
    /// How long a fetched key set is served before a refresh is triggered
    pub ttl: Duration,
    /// Minimum spacing between refreshes caused by unknown key ids
    pub min_refresh_interval: Duration,
    /// TTL extension granted to the previous key set after a failed refresh
    pub failure_backoff: Duration,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            min_refresh_interval: Duration::from_secs(30),
            failure_backoff: Duration::from_secs(30),
        }
    }
}

fn default_authority_host() -> String {
    DEFAULT_AUTHORITY_HOST.to_string()
}

fn default_algorithms() -> Vec<Algorithm> {
    vec![Algorithm::RS256]
}

fn default_true() -> bool {
    true
}

impl GateConfig {
    /// Create a validated configuration with defaults for everything but the
    /// tenant and client ids
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either id is empty or the tenant id is not a
    /// single path segment.
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            authority_host: default_authority_host(),
            allowed_algorithms: default_algorithms(),
            clock_skew: Duration::ZERO,
            expose_claims: true,
            http: HttpConfig::default(),
            key_cache: KeyCacheConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Override the authority host (tests, sovereign clouds)
    #[must_use]
    pub fn with_authority_host(mut self, host: impl Into<String>) -> Self {
        self.authority_host = host.into();
        self
    }

    /// Override the signing key cache settings
    #[must_use]
    pub fn with_key_cache(mut self, key_cache: KeyCacheConfig) -> Self {
        self.key_cache = key_cache;
        self
    }

    /// Set clock skew tolerance
    #[must_use]
    pub fn with_clock_skew(mut self, leeway: Duration) -> Self {
        self.clock_skew = leeway;
        self
    }

    /// Set allowed algorithms
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    /// Validate the whole configuration
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_tenant(&self.tenant_id)?;

        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("client_id"));
        }

        let host = Url::parse(&self.authority_host).map_err(|e| ConfigError::Invalid {
            field: "authority_host",
            reason: e.to_string(),
        })?;
        if !is_secure_or_loopback(&host) {
            return Err(ConfigError::Invalid {
                field: "authority_host",
                reason: "must use https (http only allowed for loopback hosts)".to_string(),
            });
        }

        if self.allowed_algorithms.is_empty() {
            return Err(ConfigError::Invalid {
                field: "allowed_algorithms",
                reason: "at least one algorithm is required".to_string(),
            });
        }
        if let Some(symmetric) = self
            .allowed_algorithms
            .iter()
            .find(|alg| matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
        {
            return Err(ConfigError::Invalid {
                field: "allowed_algorithms",
                reason: format!("symmetric algorithm {symmetric:?} cannot verify provider tokens"),
            });
        }

        if self.clock_skew > MAX_CLOCK_SKEW {
            return Err(ConfigError::Invalid {
                field: "clock_skew",
                reason: format!("must not exceed {}s", MAX_CLOCK_SKEW.as_secs()),
            });
        }

        for (field, value) in [
            ("key_cache.ttl", self.key_cache.ttl),
            ("key_cache.min_refresh_interval", self.key_cache.min_refresh_interval),
            ("key_cache.failure_backoff", self.key_cache.failure_backoff),
            ("http.request_timeout", self.http.request_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Authority URL for the configured tenant, e.g.
    /// `https://login.microsoftonline.com/{tenant}/v2.0`
    pub fn authority(&self) -> String {
        authority_for(&self.authority_host, &self.tenant_id)
    }
}

/// Authority URL for `tenant` under `authority_host`
pub(crate) fn authority_for(authority_host: &str, tenant: &str) -> String {
    format!("{}/{}/v2.0", authority_host.trim_end_matches('/'), tenant)
}

/// Tenant ids land in a URL path, so only a single plain segment is accepted
pub(crate) fn validate_tenant(tenant: &str) -> Result<(), ConfigError> {
    if tenant.trim().is_empty() {
        return Err(ConfigError::Missing("tenant_id"));
    }
    if !tenant
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
        || tenant.starts_with('.')
    {
        return Err(ConfigError::Invalid {
            field: "tenant_id",
            reason: "must be a single path segment".to_string(),
        });
    }
    Ok(())
}

/// HTTPS, or plain HTTP against a loopback host
pub(crate) fn is_secure_or_loopback(url: &Url) -> bool {
    match url.scheme() {
        "https" => true,
        "http" => match url.host() {
            Some(Host::Domain(domain)) => domain == "localhost",
            Some(Host::Ipv4(ip)) => ip.is_loopback(),
            Some(Host::Ipv6(ip)) => ip.is_loopback(),
            None => false,
        },
        _ => false,
    }
}
