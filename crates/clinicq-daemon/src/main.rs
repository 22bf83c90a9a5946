//! ClinicQ Daemon - arrival authorization and patient flow service
//!
//! The daemon provides:
//! - REST API for staff terminals (requests, authorizations, queues)
//! - Arrival endpoints for RFID readers and PIN pads
//! - Per-counter event streams for waiting-room displays
//! - Background restoration of lapsed PIN windows

use clap::Parser;
use clinicq_daemon::{DaemonConfig, DaemonError, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ClinicQ Daemon CLI
#[derive(Parser)]
#[command(name = "clinicqd")]
#[command(about = "ClinicQ Daemon - patient arrival and queue service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CLINICQ_CONFIG")]
    config: Option<String>,

    /// Listen address, overrides the configuration file
    #[arg(short, long, env = "CLINICQ_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "CLINICQ_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "CLINICQ_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())?;

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

    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        pin_attempt_timeout_secs = config.flow.pin_attempt_timeout_secs,
        "Starting ClinicQ daemon"
    );

    let server = Server::new(config)?;
    server.run().await
}
