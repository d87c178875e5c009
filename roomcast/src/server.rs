use roomcast_sfu::{Negotiator, SfuRegistry, WebRtcConnectionFactory};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::http::{create_router, AppState};

/// How long in-flight requests get to finish after shutdown starts
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Roomcast server - owns the SFU registry and the HTTP listener
pub struct RoomcastServer {
    state: AppState,
}

impl RoomcastServer {
    /// Wire the SFU core together from configuration
    #[must_use]
    pub fn new(config: Config) -> Self {
        let sfu_config = config.sfu_config();
        let factory = Arc::new(WebRtcConnectionFactory::new(&sfu_config));
        let registry = SfuRegistry::new(sfu_config);
        let negotiator = Arc::new(Negotiator::new(Arc::clone(&registry), factory));

        Self {
            state: AppState {
                registry,
                negotiator,
                config: Arc::new(config),
            },
        }
    }

    /// Start the HTTP server and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        info!("Starting Roomcast server...");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut http_handle = self.start_http_server(shutdown_rx).await?;

        let stopped_early = tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
                true
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
                false
            }
        };

        // Stop accepting requests before tearing rooms down
        let _ = shutdown_tx.send(true);
        if !stopped_early
            && tokio::time::timeout(HTTP_DRAIN_TIMEOUT, http_handle).await.is_err()
        {
            warn!("HTTP server did not drain in time, proceeding with shutdown");
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&self) {
        info!("Shutting down Roomcast server...");

        let rooms = self.state.registry.close_all().await;
        info!(rooms, "SFU registry closed");

        info!("Roomcast server shut down complete");
    }

    async fn start_http_server(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.state.config.http_address();
        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_address}: {e}"))?;
        let router = create_router(self.state.clone());

        info!("HTTP server listening on {}", http_address);

        let handle = tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
