//! # Domoticz - poll a home-automation hub, publish Prometheus gauges
//!
//! The core of the Domoticz exporter: it periodically polls a Domoticz hub
//! for device state and republishes the latest readings as gauges.
//!
//! ## Pipeline
//!
//! ```text
//!   Poller ──tick──▶ HubClient ──(light, temp, weather, utility in parallel)
//!                        │
//!                        ▼
//!                  map_device  ──▶  DeviceMetrics (built on the side)
//!                                        │
//!                                        ▼ swap
//!                                   MetricSink ◀── scrape (render)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use domoticz::{ExporterConfig, HubClient, MetricSink, Poller};
//!
//! # async fn demo() -> domoticz::Result<()> {
//! let config = ExporterConfig::default();
//! let sink = Arc::new(MetricSink::new(config.collect_default_metrics)?);
//! let client = HubClient::new(config.hub.clone())?;
//! let poller = Arc::new(Poller::new(client, Arc::clone(&sink), config.effective_interval()));
//!
//! tokio::spawn(Arc::clone(&poller).run());
//! let exposition = sink.render().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Hub and exporter settings
//! - [`device`]: Device records and the device-to-metric mapper
//! - [`hub`]: Hub API client
//! - [`sink`]: Prometheus gauges and exposition
//! - [`poller`]: Poll scheduler

pub mod config;
pub mod device;
pub mod error;
pub mod hub;
pub mod poller;
pub mod sink;

// Re-exports for convenient access
pub use config::{ExporterConfig, HubConfig, MIN_INTERVAL};
pub use device::{
    map_device, map_devices, DeviceClass, DeviceLabels, DeviceRecord, MetricName, Observation,
    LABEL_NAMES,
};
pub use error::{ExporterError, HubError, Result, SinkError};
pub use hub::{fetch_all, ClassFetch, DeviceSource, HubClient};
pub use poller::{
    ClassReport, CycleOutcome, CycleReport, PollGuard, PollState, PollStatus, Poller,
};
pub use sink::{DeviceMetrics, MetricSink, NAMESPACE};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
