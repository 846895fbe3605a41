//! TCP server wrapping the per-connection session.

use crate::error::HostError;
use crate::session::{self, SessionConfig};
use kvbridge_store::Store;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-session tuning.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], kvbridge_protocol::DEFAULT_PORT)),
            max_connections: 1024,
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server hosting one store for many guests.
pub struct Server<S: Store> {
    config: ServerConfig,
    store: Arc<S>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl<S: Store> Server<S> {
    pub fn new(config: ServerConfig, store: Arc<S>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            store,
            stats: Arc::new(ServerStats::default()),
            shutdown,
            running: AtomicBool::new(false),
        }
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signals the accept loop and all live connections to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Runs the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), HostError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("host listening on {}", self.config.bind_addr);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("connection limit reached, rejecting {addr}");
                                continue;
                            }
                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            stream.set_nodelay(true).ok();
                            let session_id = Uuid::new_v4();
                            let store = self.store.clone();
                            let session_config = self.config.session.clone();
                            let stats = self.stats.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                tracing::info!(%session_id, "guest connected: {addr}");
                                tokio::select! {
                                    result = session::serve(store, stream, session_config) => {
                                        if let Err(err) = result {
                                            tracing::debug!(%session_id, "session error: {err}");
                                            stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                        }
                                    }
                                    _ = conn_shutdown.recv() => {
                                        tracing::debug!(%session_id, "closing on shutdown");
                                    }
                                }
                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!(%session_id, "guest disconnected: {addr}");
                            });
                        }
                        Err(err) => {
                            tracing::error!("accept error: {err}");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("host shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}
