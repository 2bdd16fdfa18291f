//! entra-gate server entry point
//!
//! Puts the bearer-token gate in front of a placeholder upstream that answers
//! every authenticated request with `200 OK`.

mod cli;

use anyhow::Context;
use axum::Router;
use axum::extract::Extension;
use clap::Parser;
use entra_gate::{Claims, GateLayer, TokenGate};
use tracing::info;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.init_tracing();

    let config = cli.gate_config().context("invalid gate configuration")?;
    info!(
        tenant = %config.tenant_id,
        authority = %config.authority(),
        "starting entra-gate"
    );

    let gate = TokenGate::new(config).context("failed to build token gate")?;
    gate.warm_up().await;

    let app = router(gate);
    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen))?;
    info!(address = %cli.listen, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shut down");
    Ok(())
}

/// Every path, behind the gate
fn router(gate: TokenGate) -> Router {
    Router::new()
        .fallback(upstream)
        .layer(GateLayer::new(gate))
}

/// Placeholder upstream handler
async fn upstream(claims: Option<Extension<Claims>>) -> &'static str {
    if let Some(Extension(claims)) = claims {
        tracing::debug!(subject = ?claims.sub, "forwarding authenticated request");
    }
    "OK"
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
