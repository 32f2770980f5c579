//! approvald - durable, escalating approval service
//!
//! The daemon provides:
//! - REST API to create, decide, cancel and escalate approvals
//! - SLA timers that escalate unanswered requests along their chain
//! - Reply intake for mail/chat gateways
//! - Hash-linked audit history with replay and verification

use approval_daemon::config::DaemonConfig;
use approval_daemon::error::{DaemonError, DaemonResult};
use approval_daemon::Server;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// approvald CLI
#[derive(Parser)]
#[command(name = "approvald")]
#[command(about = "Durable, escalating approval service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "APPROVALD_CONFIG")]
    config: Option<String>,

    /// Listen address, overrides the config file
    #[arg(short, long, env = "APPROVALD_LISTEN_ADDR")]
    listen: Option<String>,

    /// PostgreSQL URL; selects postgres storage
    #[arg(long, env = "APPROVALD_DATABASE_URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(long, env = "APPROVALD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "APPROVALD_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(url) = cli.database_url {
        config.storage = approval_daemon::config::StorageConfig::Postgres {
            url,
            max_connections: 10,
            connect_timeout_secs: 5,
        };
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        "Starting approvald"
    );

    // Create and run server
    let server = Server::new(config).await?;
    server.run().await
}
