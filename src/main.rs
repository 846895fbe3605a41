//! kvbridge - ordered key/value store served over a byte stream.
//!
//! Hosts an in-memory store on a TCP listener; remote guests attach and
//! operate on it as if it were local.

use kvbridge_host::{Config, Server};
use kvbridge_store::MemoryStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if KVBRIDGE_CONFIG is set, then env
    // overrides)
    let config = match Config::load() {
        Ok(config) => {
            if let Ok(path) = std::env::var("KVBRIDGE_CONFIG") {
                tracing::info!("loaded config from {path}");
            }
            config
        }
        Err(err) => {
            tracing::error!("failed to load config: {err}");
            return Err(err.into());
        }
    };

    tracing::info!("starting kvbridge host");
    tracing::info!("  bind address: {}", config.network.bind_addr);
    tracing::info!("  max connections: {}", config.network.max_connections);
    tracing::info!(
        "  iterator batch size: {}",
        config.session.iterator_batch_size
    );

    let store = Arc::new(MemoryStore::new());
    let server = Arc::new(Server::new(config.server_config(), store));

    let runner = {
        let server = server.clone();
        tokio::spawn(async move { server.run().await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    server.shutdown();
    runner.await??;
    Ok(())
}
