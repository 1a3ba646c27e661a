//! Meterlink Binary Entry Point
//!
//! Runs the discovery, polling and forwarding pipeline until SIGINT/SIGTERM.
//! Core functionality is provided by the `meterlink` library crate.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use meterlink::{
    AppConfig, Coordinator, StopSignal,
    config::{DEFAULT_CONFIG_PATH, parse_duration},
    coordinator::discovery_sources,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Meterlink - Energy Meter Telemetry Pipeline
#[derive(Parser, Debug)]
#[command(name = "meterlink", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "METERLINK_CONFIG")]
    config: PathBuf,

    /// Collection endpoint URL (overrides config file)
    #[arg(long, env = "METERLINK_ENDPOINT")]
    endpoint: Option<String>,

    /// User id attached to every reading (overrides config file)
    #[arg(long, env = "METERLINK_USER_ID")]
    user_id: Option<String>,

    /// Bearer token for the collection endpoint (overrides config file)
    #[arg(long, env = "METERLINK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Audit log path (overrides config file)
    #[arg(long, env = "METERLINK_AUDIT_LOG")]
    audit_log: Option<PathBuf>,

    /// Static device address; repeatable (added to the config file list)
    #[arg(short, long = "address")]
    addresses: Vec<String>,

    /// Discovery grace period, e.g. `5s` (overrides config file)
    #[arg(long, value_parser = parse_duration)]
    grace_period: Option<Duration>,
}

impl Cli {
    /// Apply CLI/env overrides (CLI > ENV > config file).
    fn apply(self, config: &mut AppConfig) {
        if let Some(endpoint) = self.endpoint {
            config.transport.url = endpoint;
        }
        if let Some(user_id) = self.user_id {
            config.transport.user_id = user_id;
        }
        if let Some(token) = self.token {
            config.transport.auth_token = Some(token);
        }
        if let Some(path) = self.audit_log {
            config.forwarder.audit_log = path;
        }
        if let Some(grace) = self.grace_period {
            config.discovery.grace_period = grace;
        }
        config.discovery.addresses.extend(self.addresses);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,meterlink=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Meterlink exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Meterlink - Energy Meter Telemetry Pipeline");

    // Load configuration from file
    tracing::info!(path = %cli.config.display(), "Loading configuration");
    let mut config = AppConfig::load_or_default(&cli.config)?;
    cli.apply(&mut config);
    config.validate()?;

    tracing::info!(
        endpoint = %config.transport.url,
        user_id = %config.transport.user_id,
        audit_log = %config.forwarder.audit_log.display(),
        static_devices = config.discovery.addresses.len(),
        "Configuration loaded"
    );

    let sources = discovery_sources(&config.discovery)?;
    let coordinator = Coordinator::from_config(&config)?;
    tokio::spawn(shutdown_signal(coordinator.stop_signal()));
    tracing::info!("Press Ctrl+C to shutdown");

    let summary = coordinator.run(sources).await?;

    tracing::info!(
        devices = summary.devices,
        delivered = summary.forwarder.delivered,
        "Shutdown complete"
    );
    Ok(())
}

/// Trigger `stop` on Ctrl+C or SIGTERM.
async fn shutdown_signal(stop: StopSignal) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
        _ = stop.wait() => return,
    }

    stop.trigger();
}
