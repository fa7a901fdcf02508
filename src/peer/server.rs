//! Cache node server

use crate::common::{normalize_peer_url, Config, Error, Result};
use crate::group::{Group, GroupRegistry};
use crate::peer::http::{api_router, create_router, PeerState};
use axum::Router;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Serves the peer protocol for every registered group, and optionally the
/// public API for one of them
pub struct CacheServer {
    registry: Arc<GroupRegistry>,
    self_url: String,
    base_path: String,
    bind_addr: SocketAddr,
    api: Option<(SocketAddr, Arc<Group>)>,
}

impl CacheServer {
    pub fn new(registry: Arc<GroupRegistry>, config: &Config) -> Self {
        Self {
            registry,
            self_url: normalize_peer_url(&config.node.self_url),
            base_path: config.node.base_path.clone(),
            bind_addr: config.node.bind_addr,
            api: None,
        }
    }

    /// Also serve `GET /api?key=` for `group` on `addr`
    pub fn with_api(mut self, addr: SocketAddr, group: Arc<Group>) -> Self {
        self.api = Some((addr, group));
        self
    }

    pub fn router(&self) -> Router {
        create_router(PeerState {
            registry: Arc::clone(&self.registry),
            self_url: self.self_url.clone(),
            base_path: self.base_path.clone(),
        })
    }

    /// Bind the configured addresses and serve until Ctrl-C
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let api_listener = match &self.api {
            Some((addr, _)) => Some(TcpListener::bind(addr).await?),
            None => None,
        };
        self.serve_with_listeners(listener, api_listener, shutdown_signal())
            .await
    }

    /// Serve on already-bound listeners until `shutdown` resolves
    pub async fn serve_with_listeners(
        self,
        listener: TcpListener,
        api_listener: Option<TcpListener>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(());
        tokio::spawn(async move {
            shutdown.await;
            let _ = stop_tx.send(());
        });

        let peer_addr = listener.local_addr()?;
        tracing::info!("Starting cache node: {}", self.self_url);
        tracing::info!("  Peer API: {}{}", peer_addr, self.base_path);
        tracing::info!("  Groups: {:?}", self.registry.names());

        let peer_server = axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(stopped(stop_rx.clone()))
        .into_future();

        let api_server = match (api_listener, self.api) {
            (Some(listener), Some((_, group))) => {
                tracing::info!("  Public API: {} (group {})", listener.local_addr()?, group.name());
                Some(
                    axum::serve(
                        listener,
                        api_router(group).into_make_service_with_connect_info::<SocketAddr>(),
                    )
                    .with_graceful_shutdown(stopped(stop_rx))
                    .into_future(),
                )
            }
            (Some(_), None) => {
                return Err(Error::InvalidConfig(
                    "API listener given but no API group configured".into(),
                ))
            }
            (None, _) => None,
        };

        tracing::info!("✓ Cache node ready");

        match api_server {
            Some(api_server) => {
                tokio::select! {
                    res = peer_server => {
                        if let Err(e) = res {
                            tracing::error!("Peer server error: {}", e);
                        }
                    }
                    res = api_server => {
                        if let Err(e) = res {
                            tracing::error!("API server error: {}", e);
                        }
                    }
                }
            }
            None => {
                if let Err(e) = peer_server.await {
                    tracing::error!("Peer server error: {}", e);
                }
            }
        }

        tracing::info!("Cache node stopped");
        Ok(())
    }
}

async fn stopped(mut rx: watch::Receiver<()>) {
    let _ = rx.changed().await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
