//! Server setup and lifecycle management

use crate::api::{create_router, AppState};
use crate::config::{DaemonConfig, NotificationConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use approval_engine::{ApprovalOrchestrator, NotificationPort, TracingNotifier, WebhookNotifier};
use approval_store::{ApprovalStorage, InMemoryApprovalStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Approval daemon server
pub struct Server {
    config: DaemonConfig,
    orchestrator: ApprovalOrchestrator,
}

impl Server {
    /// Open storage and the notifier described by `config`.
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let store = open_store(&config.storage).await?;
        let notifier = open_notifier(&config.notifications)?;
        let orchestrator = ApprovalOrchestrator::new(store, notifier, config.engine.clone());

        Ok(Self {
            config,
            orchestrator,
        })
    }

    pub fn orchestrator(&self) -> &ApprovalOrchestrator {
        &self.orchestrator
    }

    /// Re-arm timers, then serve until Ctrl+C or SIGTERM.
    pub async fn run(self) -> DaemonResult<()> {
        // Refuse to take traffic with timers unaccounted for.
        let report = self
            .orchestrator
            .recover()
            .await
            .map_err(|e| DaemonError::Recovery(e.to_string()))?;
        tracing::info!(
            rearmed = report.rearmed,
            fired = report.fired,
            "Recovered in-flight approvals"
        );

        let addr = self.config.server.listen_addr;
        let state = AppState::new(self.orchestrator.clone());
        let app = create_router(state, &self.config.server);

        let listener = TcpListener::bind(addr).await?;
        tracing::info!("approvald listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("approvald shutting down");
        self.orchestrator.shutdown();

        Ok(())
    }
}

async fn open_store(config: &StorageConfig) -> DaemonResult<Arc<dyn ApprovalStorage>> {
    match config {
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory storage; approvals will not survive a restart");
            Ok(Arc::new(InMemoryApprovalStore::new()))
        }
        #[cfg(feature = "postgres")]
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let store = approval_store::PostgresApprovalStore::connect_with_options(
                url,
                *max_connections,
                *connect_timeout_secs,
            )
            .await
            .map_err(|e| DaemonError::Storage(e.to_string()))?;
            tracing::info!(max_connections, "Connected to PostgreSQL");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StorageConfig::Postgres { .. } => Err(DaemonError::Config(
            "postgres storage requires the `postgres` feature".to_string(),
        )),
    }
}

fn open_notifier(config: &NotificationConfig) -> DaemonResult<Arc<dyn NotificationPort>> {
    match config {
        NotificationConfig::Log => Ok(Arc::new(TracingNotifier)),
        NotificationConfig::Webhook { url, timeout_secs } => {
            let notifier = WebhookNotifier::new(url.clone(), Duration::from_secs(*timeout_secs))
                .map_err(|e| DaemonError::Config(format!("webhook notifier: {}", e)))?;
            tracing::info!(url = %notifier.url(), "Delivering notices by webhook");
            Ok(Arc::new(notifier))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
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
