//! Proximity Voice Server
//!
//! Listens for the world feed on a loopback endpoint and for voice clients
//! on the public endpoint. Stops on Ctrl-C.

use std::sync::Arc;
use anyhow::Context;
use tracing::{info, error};
use tracing_subscriber::EnvFilter;

use proximity_voice::{ServerConfig, VoiceServer, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Proximity Voice Server v{}", VERSION);

    let config = ServerConfig::from_env().context("invalid configuration")?;
    info!("Ingest endpoint: {}", config.ingest_addr);
    info!("Client endpoint: {}", config.client_addr);

    let server = Arc::new(VoiceServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal_server.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await.context("server failed")?;
    info!("Server stopped");
    Ok(())
}
