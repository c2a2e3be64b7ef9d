//! line-relay server entry point.
//!
//! Binds the given port and relays chat lines until interrupted.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use line_relay::config::{DEFAULT_HOST, RelayConfig};
use line_relay::domain::SessionRegistry;
use line_relay::server::Listener;

#[derive(Debug, Parser)]
#[command(name = "line-relay", about = "Line-oriented multi-client chat relay")]
struct Args {
    /// TCP port to listen on.
    port: u16,

    /// Host or IP address to bind.
    #[arg(long, env = "RELAY_HOST", default_value = DEFAULT_HOST)]
    host: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration
    let config = RelayConfig::from_env(args.host, args.port)?;
    let bind_addr = config.bind_addr();
    tracing::info!(addr = %bind_addr, "starting line-relay");

    // Registry lives for the whole process; every worker reaches it
    // through the listener's broadcast engine.
    let registry = Arc::new(SessionRegistry::new());

    let listener = Listener::bind(config, registry)
        .await
        .with_context(|| format!("cannot listen on {bind_addr}"))?;
    tracing::info!(addr = ?listener.local_addr().ok(), "server listening");

    listener
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("server stopped");
    Ok(())
}
