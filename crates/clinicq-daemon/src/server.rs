//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::sweeper::Sweeper;
use clinicq_core::ClinicFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// ClinicQ daemon server
pub struct Server {
    config: DaemonConfig,
    flow: Arc<ClinicFlow>,
}

impl Server {
    /// Create a new server over a fresh in-memory store
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        if config.flow.cas_max_attempts == 0 {
            return Err(DaemonError::Config(
                "flow.cas_max_attempts must be at least 1".to_string(),
            ));
        }
        let flow = Arc::new(ClinicFlow::in_memory(config.flow.clone()));
        Ok(Self { config, flow })
    }

    pub fn flow(&self) -> &Arc<ClinicFlow> {
        &self.flow
    }

    /// Run the server until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        let state = AppState::new(Arc::clone(&self.flow));
        let app = create_router(state, &self.config.server);

        let listener = TcpListener::bind(addr).await?;
        tracing::info!("ClinicQ daemon listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = if self.config.sweeper.enabled {
            let sweeper = Sweeper::new(
                Arc::clone(&self.flow),
                Duration::from_secs(self.config.sweeper.interval_secs),
            );
            Some(tokio::spawn(sweeper.run(shutdown_rx)))
        } else {
            None
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("ClinicQ daemon shutting down");

        let _ = shutdown_tx.send(true);
        if let Some(handle) = sweeper {
            let _ = handle.await;
        }

        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
