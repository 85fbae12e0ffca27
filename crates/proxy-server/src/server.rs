use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use tokio::net::TcpListener;

use crate::orchestrator::Orchestrator;
use crate::routes;

/// Listener and static-file settings for [`ProxyServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listening socket to.
    pub listen_addr: SocketAddr,
    /// Directory served for every non-proxy path.
    pub static_dir: PathBuf,
}

/// The inbound HTTP and WebSocket surface.
///
/// `/proxy/<target>` requests go through the [`Orchestrator`]; WebSocket
/// upgrades on the same prefix are bridged to the upstream socket; anything
/// else is a static file.
pub struct ProxyServer {
    config: ServerConfig,
    orchestrator: Orchestrator,
}

impl ProxyServer {
    pub fn new(config: ServerConfig, orchestrator: Orchestrator) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    pub fn router(&self) -> Router {
        routes::router(self.orchestrator.clone(), &self.config.static_dir)
    }

    /// Binds `listen_addr` and serves until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` resolves, then
    /// lets in-flight requests finish.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, static_dir = %self.config.static_dir.display(), "proxy listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!(%addr, "proxy stopped");
        Ok(())
    }
}
