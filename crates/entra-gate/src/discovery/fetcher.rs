//! # Discovery Document Fetcher
//!
//! Per-tenant cache of provider metadata with coalesced cold-start fetches.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use futures_util::FutureExt;
use tracing::{debug, info, warn};
use url::Url;

use super::types::{DiscoveryDocument, ProviderMetadata};
use crate::config::{DISCOVERY_PATH, GateConfig, authority_for, validate_tenant};
use crate::error::DiscoveryError;
use crate::flight::SingleFlight;
use crate::http_client::{build_client, get_json};

type DiscoveryResult = Result<Arc<ProviderMetadata>, DiscoveryError>;

/// Cached metadata plus the refresh guard for one tenant
#[derive(Debug, Default)]
struct TenantSlot {
    metadata: ArcSwapOption<ProviderMetadata>,
    flight: SingleFlight<DiscoveryResult>,
}

/// Provider metadata client
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct DiscoveryClient {
    client: reqwest::Client,
    authority_host: String,
    max_response_size: usize,
    tenants: DashMap<String, Arc<TenantSlot>>,
}

impl DiscoveryClient {
    /// Create a client using the authority host and HTTP settings of `config`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](crate::ConfigError) if the HTTP client cannot be built.
    pub fn new(config: &GateConfig) -> Result<Self, crate::error::ConfigError> {
        Ok(Self::with_client(
            build_client(&config.http)?,
            &config.authority_host,
            config.http.max_response_size,
        ))
    }

    pub(crate) fn with_client(
        client: reqwest::Client,
        authority_host: &str,
        max_response_size: usize,
    ) -> Self {
        Self {
            client,
            authority_host: authority_host.trim_end_matches('/').to_string(),
            max_response_size,
            tenants: DashMap::new(),
        }
    }

    /// Metadata for `tenant`, fetching it on first use
    ///
    /// Concurrent first-use callers share one request. Failures are not cached.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] on network failure, a non-2xx status, an
    /// unusable document, or an issuer that does not match the tenant authority.
    pub async fn discover(&self, tenant: &str) -> Result<Arc<ProviderMetadata>, DiscoveryError> {
        let slot = self.slot(tenant)?;
        if let Some(metadata) = slot.metadata.load_full() {
            return Ok(metadata);
        }

        let fetch = {
            let slot = Arc::clone(&slot);
            let client = self.client.clone();
            let authority = authority_for(&self.authority_host, tenant);
            let max_size = self.max_response_size;
            move || {
                async move {
                    // Another flight may have finished between our load and here
                    if let Some(metadata) = slot.metadata.load_full() {
                        return Ok(metadata);
                    }
                    let metadata = Arc::new(fetch_metadata(&client, &authority, max_size).await?);
                    slot.metadata.store(Some(Arc::clone(&metadata)));
                    Ok(metadata)
                }
                .boxed()
            }
        };

        slot.flight.run(fetch).await
    }

    /// Drop the cached metadata for `tenant`; the next call refetches
    pub fn invalidate(&self, tenant: &str) {
        if let Some(slot) = self.tenants.get(tenant) {
            slot.metadata.store(None);
            info!(tenant = %tenant, "discovery metadata invalidated");
        }
    }

    fn slot(&self, tenant: &str) -> Result<Arc<TenantSlot>, DiscoveryError> {
        if let Some(slot) = self.tenants.get(tenant) {
            return Ok(Arc::clone(&slot));
        }
        validate_tenant(tenant).map_err(|e| DiscoveryError::InvalidTenant(e.to_string()))?;
        Ok(Arc::clone(
            &self.tenants.entry(tenant.to_string()).or_default(),
        ))
    }
}

async fn fetch_metadata(
    client: &reqwest::Client,
    authority: &str,
    max_size: usize,
) -> Result<ProviderMetadata, DiscoveryError> {
    let url = Url::parse(&format!("{authority}/{DISCOVERY_PATH}"))
        .map_err(|e| DiscoveryError::InvalidTenant(e.to_string()))?;
    debug!(url = %url, "fetching discovery document");

    let result = match get_json::<DiscoveryDocument>(client, &url, max_size).await {
        Ok(document) => document.validate(authority),
        Err(failure) => Err(failure.into()),
    };

    match &result {
        Ok(metadata) => info!(
            issuer = %metadata.issuer,
            jwks_uri = %metadata.jwks_uri,
            "discovery document loaded"
        ),
        Err(e) => warn!(url = %url, error = %e, "discovery failed"),
    }
    result
}
