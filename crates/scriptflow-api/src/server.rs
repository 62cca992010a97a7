use crate::{create_router, AppState};
use anyhow::{Context, Result};
use scriptflow_core::{QueueMode, Settings};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

pub struct Server {
    addr: SocketAddr,
    state: AppState,
}

impl Server {
    pub fn new(settings: Settings) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid listen address {}:{}",
                    settings.server.host, settings.server.port
                )
            })?;
        let state = AppState::new(settings)?;
        Ok(Self { addr, state })
    }

    pub fn with_state(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> Result<()> {
        let queue = self.state.queue().clone();
        if queue.settings().mode == QueueMode::Background && queue.spawn_worker() {
            info!(
                poll_interval_ms = queue.settings().poll_interval_ms,
                "Background job worker started"
            );
        }

        let app = create_router(self.state.clone());
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.addr))?;
        info!("Scriptflow API listening on http://{}", self.addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        queue.dispose().await;
        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
