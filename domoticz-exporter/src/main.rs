// Domoticz Exporter - Prometheus exporter for Domoticz devices
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Domoticz Exporter
//!
//! Polls a Domoticz hub and serves the latest device readings to Prometheus.
//!
//! ## Usage
//!
//! ```bash
//! # Poll a hub on the local network every 30 seconds
//! domoticz-exporter --hostip 192.168.1.20 --hostport 8080 --interval 30
//!
//! # Same thing through the environment
//! DOMOTICZ_HOSTIP=192.168.1.20 DOMOTICZ_INTERVAL=30 domoticz-exporter
//!
//! # Hub behind HTTPS, with process metrics
//! domoticz-exporter --hostip domoticz.example.org --hostssl --collectdefault
//! ```

mod server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::builder::FalseyValueParser;
use clap::Parser;
use domoticz::{ExporterConfig, HubClient, HubConfig, MetricSink, Poller};
use server::{create_router, AppState};
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// Domoticz Prometheus Exporter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "DOMOTICZ_PORT", default_value = "9486")]
    port: u16,

    /// Poll interval in seconds (minimum 2)
    #[arg(short, long, env = "DOMOTICZ_INTERVAL", default_value = "15")]
    interval: u64,

    /// Domoticz host name or IP address
    #[arg(long, env = "DOMOTICZ_HOSTIP", default_value = "127.0.0.1")]
    hostip: String,

    /// Domoticz HTTP port
    #[arg(long, env = "DOMOTICZ_HOSTPORT", default_value = "8080")]
    hostport: u16,

    /// Talk to Domoticz over HTTPS (forces port 443)
    #[arg(long, env = "DOMOTICZ_HOSTSSL", value_parser = FalseyValueParser::new())]
    hostssl: bool,

    /// Also expose process metrics
    #[arg(long, env = "DOMOTICZ_DEFAULTMETRICS", value_parser = FalseyValueParser::new())]
    collectdefault: bool,

    /// Hub request timeout in seconds
    #[arg(long, env = "DOMOTICZ_TIMEOUT", default_value = "10")]
    timeout: u64,

    /// Verbose logging (same as --log-level debug)
    #[arg(long, env = "DEBUG", value_parser = FalseyValueParser::new())]
    debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn exporter_config(&self) -> ExporterConfig {
        let hub = HubConfig::new(self.hostip.clone(), self.hostport)
            .with_tls(self.hostssl)
            .with_timeout(Duration::from_secs(self.timeout));

        ExporterConfig {
            debug: self.debug,
            ..ExporterConfig::default()
                .with_listen_port(self.port)
                .with_interval(Duration::from_secs(self.interval))
                .with_hub(hub)
                .with_default_metrics(self.collectdefault)
        }
    }

    fn log_level(&self) -> Level {
        if self.debug {
            return Level::DEBUG;
        }
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::from_default_env().add_directive(args.log_level().into()));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Domoticz Exporter v{}", domoticz::VERSION);

    let config = args.exporter_config();
    let interval = config.effective_interval();

    info!("Registering Prometheus metrics...");
    let sink = Arc::new(MetricSink::new(config.collect_default_metrics)?);
    let client = HubClient::new(config.hub.clone())?;
    let hub_url = config.hub.base_url();

    info!(hub = %hub_url, interval = ?interval, "Polling Domoticz");
    let poller = Arc::new(Poller::new(client, Arc::clone(&sink), interval));
    let polling = tokio::spawn(Arc::clone(&poller).run());

    let state = AppState::new(sink, poller, hub_url);
    let app = create_router(state, config.scrape_timeout);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Domoticz exporter listening on port {}", config.listen_port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    polling.abort();
    info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
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
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_flags_build_config() {
        let args = Args::try_parse_from([
            "domoticz-exporter",
            "--port",
            "9500",
            "--interval",
            "30",
            "--hostip",
            "192.168.1.20",
            "--hostport",
            "8081",
            "--collectdefault",
        ])
        .unwrap();

        let config = args.exporter_config();
        assert_eq!(config.listen_port, 9500);
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.hub.base_url(), "http://192.168.1.20:8081");
        assert!(config.collect_default_metrics);
    }

    #[test]
    fn test_hostssl_forces_https() {
        let args = Args::try_parse_from([
            "domoticz-exporter",
            "--hostip",
            "domoticz.example.org",
            "--hostssl",
        ])
        .unwrap();
        assert_eq!(
            args.exporter_config().hub.base_url(),
            "https://domoticz.example.org:443"
        );
    }

    #[test]
    fn test_short_interval_is_clamped() {
        let args = Args::try_parse_from(["domoticz-exporter", "-i", "1"]).unwrap();
        assert_eq!(args.exporter_config().effective_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_debug_raises_log_level() {
        let args = Args::try_parse_from(["domoticz-exporter", "--debug"]).unwrap();
        assert_eq!(args.log_level(), Level::DEBUG);
        assert!(args.exporter_config().debug);

        let args = Args::try_parse_from(["domoticz-exporter", "--log-level", "warn"]).unwrap();
        assert_eq!(args.log_level(), Level::WARN);
    }
}
