//! Core application runner for `ble-mqtt`.
//!
//! This module is decoupled from process exit codes so the run loop can be
//! tested with an injected transport, publisher and shutdown signal.

use crate::alias::{Alias, parse_alias};
use crate::config::{Config, ConfigError, DEFAULT_CONFIG_PATH};
use crate::discovery::{Discovery, DiscoveryOptions, Outcome};
use crate::publisher::{PublishError, Publisher, mqtt};
use crate::scanner::{self, Backend, ScanError, Transport};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Command line options.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Path to the JSON5 configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH, value_name = "PATH")]
    pub config: PathBuf,

    /// Specify human-readable alias for a device, overriding `knownDevices`.
    /// Format: --alias DE:AD:BE:EF:00:00=Sauna
    #[arg(long = "alias", value_parser = parse_alias, value_name = "ALIAS")]
    pub aliases: Vec<Alias>,

    /// Verbose output, enable debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Log filter such as `debug` or `ble_mqtt=trace`; `RUST_LOG` takes precedence
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, default_value_t, value_enum)]
    pub log_format: LogFormat,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Default log filter when `RUST_LOG` is not set.
pub fn log_filter(options: &Options) -> String {
    match (&options.log_level, options.verbose) {
        (Some(level), _) => level.clone(),
        (None, true) => "debug".to_string(),
        (None, false) => "info".to_string(),
    }
}

/// Install the global tracing subscriber.
pub fn init_tracing(options: &Options) -> Result<(), RunError> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_filter(options)))
        .map_err(|e| RunError::Logging(e.to_string()))?;

    match options.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .try_init(),
    }
    .map_err(|e| RunError::Logging(e.to_string()))
}

/// Load the configuration, open the transport, connect to the broker and run
/// discovery until a termination signal or a fatal condition.
pub async fn run(options: Options) -> Result<Outcome, RunError> {
    let config = Config::load(&options.config)?;
    let discovery_options = DiscoveryOptions::from_config(&config, &options.aliases);
    info!(
        known_devices = discovery_options.known_devices.len(),
        only_known_devices = discovery_options.only_known_devices,
        "Loaded configuration"
    );

    let transport = scanner::open(options.backend).await?;
    let (publisher, connection) =
        mqtt::connect(&config.mqtt_broker_url, config.mqtt_options.as_ref()).await?;

    run_with(
        discovery_options,
        transport.as_ref(),
        Arc::new(publisher),
        connection.closed(),
        shutdown_signal(),
    )
    .await
}

/// Run discovery against injected collaborators.
///
/// `connection` resolves when the broker connection ends; an end that was not
/// caused by our own disconnect is an error. The publisher is always
/// disconnected before returning.
pub async fn run_with(
    options: DiscoveryOptions,
    transport: &dyn Transport,
    publisher: Arc<dyn Publisher>,
    connection: impl Future<Output = Result<(), PublishError>>,
    shutdown: impl Future<Output = ()>,
) -> Result<Outcome, RunError> {
    let mut discovery = Discovery::new(options, Arc::clone(&publisher));

    let result = tokio::select! {
        biased;

        outcome = discovery.run(transport, shutdown) => outcome.map_err(RunError::from),
        closed = connection => {
            let error = closed
                .err()
                .unwrap_or_else(|| PublishError::Connection("connection closed by broker".into()));
            error!(error = %error, "Lost connection to MQTT broker");
            Err(error.into())
        }
    };

    if let Err(e) = publisher.disconnect().await {
        warn!(error = %e, "Failed to disconnect from MQTT broker");
    }

    if let Ok(outcome) = &result {
        info!(?outcome, "Discovery finished");
    }
    result
}

/// Resolve on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("Received shutdown signal");
}
