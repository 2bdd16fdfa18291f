//! # Entra Gate - Bearer-Token Gate for Microsoft Entra ID
//!
//! Authenticates inbound HTTP requests with access tokens issued by a
//! Microsoft Entra ID (Azure AD) tenant, forwarding valid requests to an inner
//! service and answering everything else itself.
//!
//! ## Key Features
//!
//! - **OIDC discovery** - provider metadata fetched once per tenant, issuer checked
//! - **Signing key cache** - atomic snapshots, stale-while-revalidate, bounded
//!   refetching for unknown key ids, failure backoff
//! - **Refresh coalescing** - concurrent misses share one network fetch
//! - **Strict verification** - algorithm allow-list pinned to the key family,
//!   exact issuer and audience matching, one clock reading per request
//! - **Tower middleware** - `401` for bad credentials, `500` when the provider
//!   is unreachable, validated claims in the request extensions
//!
//! ## Architecture
//!
//! - [`config`] - [`GateConfig`], built once at startup
//! - [`discovery`] - provider metadata client
//! - [`jwt`] - [`KeySetCache`] and [`TokenVerifier`]
//! - [`gate`] - [`TokenGate`], the assembled pipeline
//! - [`tower`] - [`GateLayer`] and [`GateService`]
//! - [`error`] - credential vs infrastructure error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use entra_gate::{GateConfig, GateLayer, TokenGate};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GateConfig::new("72f988bf-86f1-41af-91ab-2d7cd011db47", "api://orders")?;
//! let gate = TokenGate::new(config)?;
//! gate.warm_up().await;
//!
//! // Wrap any tower service (axum Router, tonic server, ...)
//! let layer = GateLayer::new(gate);
//! # let _ = layer;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
mod flight;
pub mod gate;
mod http_client;
pub mod jwt;
pub mod tower;

#[doc(inline)]
pub use clock::{Clock, FixedClock, SystemClock};
#[doc(inline)]
pub use config::{GateConfig, HttpConfig, KeyCacheConfig};
#[doc(inline)]
pub use discovery::{DiscoveryClient, ProviderMetadata};
#[doc(inline)]
pub use error::{
    ConfigError, DiscoveryError, KeyFetchError, KeyLookupError, RejectionReason, VerifyError,
};
#[doc(inline)]
pub use gate::{TokenGate, bearer_token};
#[doc(inline)]
pub use jwt::{
    Audience, Claims, KeySet, KeySetCache, NumericDate, TokenVerifier, VerificationKey,
};
#[doc(inline)]
pub use self::tower::{GateLayer, GateService};
