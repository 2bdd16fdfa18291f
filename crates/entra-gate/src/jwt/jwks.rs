//! JWKS (JSON Web Key Set) fetching and caching
//!
//! The cache holds one immutable [`KeySet`] snapshot behind an atomic pointer.
//! Lookups never lock; a refresh builds a whole new snapshot and swaps it in.
//!
//! # Refresh rules
//!
//! - **Hit, fresh**: return the key.
//! - **Hit, stale**: return the key and refresh in the background
//!   (stale-while-revalidate).
//! - **Miss, refresh running**: wait for it, then look up once more.
//! - **Miss, snapshot recently fetched**: the key is unknown; no fetch. This
//!   bounds how often tokens with made-up key ids can reach the provider.
//! - **Miss, otherwise**: refresh, wait, look up once more.
//!
//! At most one refresh runs at a time; everyone who needs one shares it.
//!
//! A failed refresh keeps the previous snapshot and pushes its next refresh
//! out by `failure_backoff`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use arc_swap::ArcSwapOption;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{GateConfig, KeyCacheConfig};
use crate::discovery::DiscoveryClient;
use crate::error::{KeyFetchError, KeyLookupError};
use crate::flight::SingleFlight;
use crate::http_client::{build_client, get_json};

type RefreshResult = Result<Arc<KeySet>, KeyLookupError>;

/// Key type family, used to pin a key to the algorithms it can verify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    /// `kty: RSA` (RS*, PS*)
    Rsa,
    /// `kty: EC` (ES*)
    Ec,
    /// `kty: OKP` (EdDSA)
    Okp,
}

impl KeyFamily {
    /// Family an algorithm belongs to; `None` for symmetric algorithms
    pub fn of(algorithm: Algorithm) -> Option<Self> {
        match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Some(Self::Rsa),
            Algorithm::ES256 | Algorithm::ES384 => Some(Self::Ec),
            Algorithm::EdDSA => Some(Self::Okp),
            _ => None,
        }
    }

    fn from_kty(kty: &str) -> Option<Self> {
        match kty {
            "RSA" => Some(Self::Rsa),
            "EC" => Some(Self::Ec),
            "OKP" => Some(Self::Okp),
            _ => None,
        }
    }
}

/// A public key ready for signature verification
#[derive(Clone)]
pub struct VerificationKey {
    kid: String,
    family: KeyFamily,
    algorithm: Option<Algorithm>,
    decoding_key: DecodingKey,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("family", &self.family)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    /// Key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Key type family
    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// Algorithm the provider pinned this key to, if it declared one
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Whether a token header naming `algorithm` may be verified with this key
    pub fn accepts(&self, algorithm: Algorithm) -> bool {
        KeyFamily::of(algorithm) == Some(self.family)
            && self.algorithm.is_none_or(|pinned| pinned == algorithm)
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

/// One immutable key set snapshot
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: Arc<HashMap<String, VerificationKey>>,
    fetched_at: SystemTime,
    refresh_after: Instant,
    retry_after: Instant,
}

impl KeySet {
    fn new(keys: HashMap<String, VerificationKey>, config: &KeyCacheConfig) -> Self {
        let now = Instant::now();
        Self {
            keys: Arc::new(keys),
            fetched_at: SystemTime::now(),
            refresh_after: now + config.ttl,
            retry_after: now + config.min_refresh_interval,
        }
    }

    /// Key by identifier
    pub fn get(&self, kid: &str) -> Option<&VerificationKey> {
        self.keys.get(kid)
    }

    /// Number of usable keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// `true` if the provider published no usable keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Identifiers of all usable keys
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// When the keys were fetched
    pub fn fetched_at(&self) -> SystemTime {
        self.fetched_at
    }

    fn is_stale(&self, now: Instant) -> bool {
        now >= self.refresh_after
    }

    fn may_refetch_for_miss(&self, now: Instant) -> bool {
        now >= self.retry_after
    }

    /// Same keys, next refresh pushed out after a failed fetch
    fn backed_off(&self, config: &KeyCacheConfig) -> Self {
        let now = Instant::now();
        Self {
            keys: Arc::clone(&self.keys),
            fetched_at: self.fetched_at,
            refresh_after: now + config.failure_backoff,
            retry_after: now + config.failure_backoff.max(config.min_refresh_interval),
        }
    }
}

/// Signing key cache for one tenant
#[derive(Debug)]
pub struct KeySetCache {
    fetcher: Arc<KeyFetcher>,
    state: Arc<ArcSwapOption<KeySet>>,
    flight: SingleFlight<RefreshResult>,
}

/// Everything a detached refresh needs
#[derive(Debug)]
struct KeyFetcher {
    tenant: String,
    discovery: Arc<DiscoveryClient>,
    client: reqwest::Client,
    config: KeyCacheConfig,
    max_response_size: usize,
}

impl KeySetCache {
    /// Create an empty cache for the configured tenant
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](crate::ConfigError) if the HTTP client cannot be built.
    pub fn new(
        config: &GateConfig,
        discovery: Arc<DiscoveryClient>,
    ) -> Result<Self, crate::error::ConfigError> {
        Ok(Self::with_client(
            build_client(&config.http)?,
            config,
            discovery,
        ))
    }

    pub(crate) fn with_client(
        client: reqwest::Client,
        config: &GateConfig,
        discovery: Arc<DiscoveryClient>,
    ) -> Self {
        Self {
            fetcher: Arc::new(KeyFetcher {
                tenant: config.tenant_id.clone(),
                discovery,
                client,
                config: config.key_cache.clone(),
                max_response_size: config.http.max_response_size,
            }),
            state: Arc::new(ArcSwapOption::empty()),
            flight: SingleFlight::new(),
        }
    }

    /// Resolve a verification key by identifier
    ///
    /// # Errors
    ///
    /// - [`KeyLookupError::UnknownKey`] if the key is absent after a fresh fetch,
    ///   or absent from a snapshot fetched within `min_refresh_interval`
    /// - [`KeyLookupError::FetchFailed`] / [`KeyLookupError::Discovery`] if the
    ///   refresh this lookup depended on failed
    pub async fn get_key(&self, kid: &str) -> Result<VerificationKey, KeyLookupError> {
        let snapshot = self.state.load_full();
        let now = Instant::now();

        if let Some(set) = &snapshot
            && let Some(key) = set.get(kid)
        {
            if set.is_stale(now) {
                self.refresh_in_background(snapshot.clone());
            }
            return Ok(key.clone());
        }

        if let Some(flight) = self.flight.current() {
            debug!(key_id = %kid, "key miss, joining in-flight refresh");
            let set = self.flight.wait(flight).await?;
            return lookup(&set, kid);
        }

        if let Some(set) = &snapshot
            && !set.may_refetch_for_miss(now)
        {
            debug!(key_id = %kid, "key miss within refresh interval, not refetching");
            return Err(KeyLookupError::UnknownKey(kid.to_string()));
        }

        debug!(key_id = %kid, "key miss, refreshing key set");
        let set = self.refresh_from(snapshot).await?;
        lookup(&set, kid)
    }

    /// Load the key set if none is cached yet, joining any refresh already running
    ///
    /// # Errors
    ///
    /// Returns [`KeyLookupError::FetchFailed`] or [`KeyLookupError::Discovery`]
    /// if the fetch fails.
    pub async fn prefetch(&self) -> Result<Arc<KeySet>, KeyLookupError> {
        if let Some(set) = self.state.load_full() {
            return Ok(set);
        }
        self.refresh_from(None).await
    }

    /// Current snapshot, if any keys have been fetched
    pub fn snapshot(&self) -> Option<Arc<KeySet>> {
        self.state.load_full()
    }

    /// Drop the snapshot; the next lookup refetches
    pub fn invalidate(&self) {
        self.state.store(None);
        info!(tenant = %self.fetcher.tenant, "key set invalidated");
    }

    async fn refresh_from(&self, observed: Option<Arc<KeySet>>) -> RefreshResult {
        let fetcher = Arc::clone(&self.fetcher);
        let state = Arc::clone(&self.state);
        self.flight
            .run(move || refresh_task(fetcher, state, observed))
            .await
    }

    fn refresh_in_background(&self, observed: Option<Arc<KeySet>>) {
        let fetcher = Arc::clone(&self.fetcher);
        let state = Arc::clone(&self.state);
        let (flight, started) = self
            .flight
            .join_or_start(move || refresh_task(fetcher, state, observed));
        if started {
            debug!(tenant = %self.fetcher.tenant, "key set stale, refreshing in background");
            tokio::spawn(flight);
        }
    }
}

fn lookup(set: &KeySet, kid: &str) -> Result<VerificationKey, KeyLookupError> {
    set.get(kid)
        .cloned()
        .ok_or_else(|| KeyLookupError::UnknownKey(kid.to_string()))
}

/// Fetch and publish a new snapshot
///
/// `observed` is the snapshot the caller saw when it decided to refresh. If
/// another refresh has published a different one since, that result is reused.
fn refresh_task(
    fetcher: Arc<KeyFetcher>,
    state: Arc<ArcSwapOption<KeySet>>,
    observed: Option<Arc<KeySet>>,
) -> BoxFuture<'static, RefreshResult> {
    async move {
        if let Some(current) = state.load_full()
            && observed
                .as_ref()
                .is_none_or(|seen| !Arc::ptr_eq(&current, seen))
        {
            return Ok(current);
        }

        match fetcher.fetch().await {
            Ok(set) => {
                let set = Arc::new(set);
                state.store(Some(Arc::clone(&set)));
                Ok(set)
            }
            Err(e) => {
                warn!(tenant = %fetcher.tenant, error = %e, "key set refresh failed");
                if let Some(previous) = state.load_full() {
                    state.store(Some(Arc::new(previous.backed_off(&fetcher.config))));
                }
                Err(e)
            }
        }
    }
    .boxed()
}

impl KeyFetcher {
    async fn fetch(&self) -> Result<KeySet, KeyLookupError> {
        let metadata = self.discovery.discover(&self.tenant).await?;
        let document: RawKeySet =
            get_json(&self.client, &metadata.jwks_uri, self.max_response_size)
                .await
                .map_err(KeyFetchError::from)?;

        let keys = parse_keys(document);
        info!(
            tenant = %self.tenant,
            jwks_uri = %metadata.jwks_uri,
            key_count = keys.len(),
            "key set refreshed"
        );
        Ok(KeySet::new(keys, &self.config))
    }
}

#[derive(Debug, Deserialize)]
struct RawKeySet {
    keys: Vec<serde_json::Value>,
}

/// Load every usable signing key, skipping the rest
fn parse_keys(document: RawKeySet) -> HashMap<String, VerificationKey> {
    let mut keys = HashMap::with_capacity(document.keys.len());
    for raw in document.keys {
        match parse_key(raw) {
            Ok(key) => {
                keys.insert(key.kid.clone(), key);
            }
            Err(reason) => warn!(reason = %reason, "skipping key set entry"),
        }
    }
    keys
}

pub(crate) fn parse_key(raw: serde_json::Value) -> Result<VerificationKey, String> {
    let field = |name: &str| raw.get(name).and_then(serde_json::Value::as_str);

    let kid = field("kid").ok_or("key has no kid")?.to_string();
    if let Some(usage) = field("use")
        && usage != "sig"
    {
        return Err(format!("key {kid} has use {usage}"));
    }
    let family = field("kty")
        .and_then(KeyFamily::from_kty)
        .ok_or_else(|| format!("key {kid} has unsupported kty"))?;
    let algorithm = match field("alg") {
        Some(alg) => Some(
            Algorithm::from_str(alg).map_err(|_| format!("key {kid} has unsupported alg {alg}"))?,
        ),
        None => None,
    };
    if algorithm.is_some_and(|alg| KeyFamily::of(alg) != Some(family)) {
        return Err(format!("key {kid} alg does not match its kty"));
    }

    let jwk: Jwk = serde_json::from_value(raw).map_err(|e| format!("key {kid}: {e}"))?;
    let decoding_key = DecodingKey::from_jwk(&jwk).map_err(|e| format!("key {kid}: {e}"))?;

    Ok(VerificationKey {
        kid,
        family,
        algorithm,
        decoding_key,
    })
}
