//! # Provider Metadata Discovery
//!
//! Fetches the OpenID Connect discovery document for a tenant from
//! `{authority_host}/{tenant}/v2.0/.well-known/openid-configuration` and keeps
//! the validated result for the life of the process.
//!
//! ## Caching Strategy
//!
//! - One network fetch per tenant unless [`DiscoveryClient::invalidate`] is called
//! - Concurrent cold-start callers for the same tenant share one request
//! - No internal retries: a failed fetch is reported and the next caller tries again
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use entra_gate::GateConfig;
//! use entra_gate::discovery::DiscoveryClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GateConfig::new("72f988bf-86f1-41af-91ab-2d7cd011db47", "api://my-app")?;
//! let client = DiscoveryClient::new(&config)?;
//!
//! let metadata = client.discover("72f988bf-86f1-41af-91ab-2d7cd011db47").await?;
//! println!("keys at {}", metadata.jwks_uri);
//! # Ok(())
//! # }
//! ```

mod fetcher;
mod types;

pub use fetcher::DiscoveryClient;
pub use types::ProviderMetadata;
