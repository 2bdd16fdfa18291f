//! Command-line and environment configuration
//!
//! Every flag can also be set through the environment variable named in its
//! help text; the flag wins when both are present.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use entra_gate::config::DEFAULT_AUTHORITY_HOST;
use entra_gate::{ConfigError, GateConfig, KeyCacheConfig};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// entra-gate - bearer-token gate for Microsoft Entra ID
///
/// Verifies `Authorization: Bearer` tokens issued by one tenant for one
/// application and forwards authenticated requests upstream.
#[derive(Parser, Debug)]
#[command(name = "entra-gate", version, about, author)]
pub struct Cli {
    /// Directory tenant id (GUID; domain names fail issuer validation)
    #[arg(long, env = "AZURE_TENANT_ID")]
    pub tenant_id: String,

    /// Application (client) id; tokens must name it as their audience
    #[arg(long, env = "AZURE_CLIENT_ID")]
    pub client_id: String,

    /// Address to listen on
    #[arg(long, env = "GATE_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Identity provider scheme and host
    #[arg(long, env = "GATE_AUTHORITY_HOST", default_value = DEFAULT_AUTHORITY_HOST)]
    pub authority_host: String,

    /// Seconds a fetched signing key set is served before it is refreshed
    #[arg(long, env = "GATE_KEY_CACHE_TTL_SECS", default_value_t = 600)]
    pub key_cache_ttl_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "GATE_LOG_JSON")]
    pub log_json: bool,

    /// Enable verbose logging (-v, -vv, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Build the gate configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required value is missing or invalid.
    pub fn gate_config(&self) -> Result<GateConfig, ConfigError> {
        let config = GateConfig::new(&self.tenant_id, &self.client_id)?
            .with_authority_host(&self.authority_host)
            .with_key_cache(KeyCacheConfig {
                ttl: Duration::from_secs(self.key_cache_ttl_secs),
                ..KeyCacheConfig::default()
            });
        config.validate()?;
        Ok(config)
    }

    /// Default log level for the `-v` count; `RUST_LOG` overrides it
    pub fn log_level(&self) -> Level {
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    /// Initialize the tracing subscriber
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_level().as_str().to_lowercase()));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true);

        if self.log_json {
            builder.json().init();
        } else {
            builder.init();
        }
    }
}
