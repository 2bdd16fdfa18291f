//! # Provider Metadata Types
//!
//! The subset of the OpenID Connect Discovery 1.0 document the gate relies on.

use std::time::SystemTime;

use serde::Deserialize;
use url::Url;

use crate::config::is_secure_or_loopback;
use crate::error::DiscoveryError;

/// Raw discovery document as served by the provider
///
/// Unknown fields are ignored; the document carries dozens we never read.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DiscoveryDocument {
    /// REQUIRED. The provider's issuer identifier
    pub issuer: String,

    /// REQUIRED. URL of the provider's JWK Set document
    pub jwks_uri: String,
}

/// Validated provider metadata for one tenant
///
/// Immutable once fetched; replaced only after an explicit invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
    /// Issuer every token from this tenant must carry in `iss`
    pub issuer: String,
    /// Signing key endpoint
    pub jwks_uri: Url,
    /// When the document was fetched
    pub fetched_at: SystemTime,
}

impl DiscoveryDocument {
    /// Validate the document against the authority it was fetched for
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if the issuer differs from `expected_issuer`
    /// or `jwks_uri` is not an absolute HTTPS URL.
    pub(crate) fn validate(self, expected_issuer: &str) -> Result<ProviderMetadata, DiscoveryError> {
        if self.issuer != expected_issuer {
            return Err(DiscoveryError::IssuerMismatch {
                document: self.issuer,
                expected: expected_issuer.to_string(),
            });
        }

        let jwks_uri = Url::parse(&self.jwks_uri).map_err(|e| {
            DiscoveryError::InvalidDocument(format!("jwks_uri is not a valid URL: {e}"))
        })?;
        if !is_secure_or_loopback(&jwks_uri) {
            return Err(DiscoveryError::InvalidDocument(
                "jwks_uri must use https (http only allowed for loopback hosts)".to_string(),
            ));
        }

        Ok(ProviderMetadata {
            issuer: self.issuer,
            jwks_uri,
            fetched_at: SystemTime::now(),
        })
    }
}
