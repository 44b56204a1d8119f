//! Configuration types for the exporter
//!
//! These structs are populated by the binary's CLI layer; the core only
//! reads them.

use std::time::Duration;

/// Minimum poll interval. Shorter intervals overload the hub.
pub const MIN_INTERVAL: Duration = Duration::from_secs(2);

/// Port forced when TLS is enabled.
pub const TLS_PORT: u16 = 443;

/// Hub connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Hub host name or IP address
    pub host: String,

    /// Hub HTTP port (ignored when `tls` is set)
    pub port: u16,

    /// Talk to the hub over HTTPS
    pub tls: bool,

    /// Per-request transport timeout
    pub timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            tls: false,
            timeout: Duration::from_secs(10),
        }
    }
}

impl HubConfig {
    /// Create a configuration for a plain HTTP hub
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Enable or disable TLS
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// URL scheme for requests
    pub fn scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }

    /// Port actually used for requests
    pub fn effective_port(&self) -> u16 {
        if self.tls {
            TLS_PORT
        } else {
            self.port
        }
    }

    /// `scheme://host:port`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.host, self.effective_port())
    }
}

/// Exporter-level configuration
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Port the scrape endpoint listens on
    pub listen_port: u16,

    /// Requested poll interval (see [`ExporterConfig::effective_interval`])
    pub interval: Duration,

    /// Hub connection settings
    pub hub: HubConfig,

    /// Also expose process metrics (memory, CPU, file descriptors)
    pub collect_default_metrics: bool,

    /// Verbose cycle and fetch logging
    pub debug: bool,

    /// Timeout applied to each scrape request
    pub scrape_timeout: Duration,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen_port: 9486,
            interval: Duration::from_secs(15),
            hub: HubConfig::default(),
            collect_default_metrics: false,
            debug: false,
            scrape_timeout: Duration::from_secs(30),
        }
    }
}

impl ExporterConfig {
    /// Set the poll interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the hub settings
    pub fn with_hub(mut self, hub: HubConfig) -> Self {
        self.hub = hub;
        self
    }

    /// Set the scrape listen port
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// Enable process metrics
    pub fn with_default_metrics(mut self, enabled: bool) -> Self {
        self.collect_default_metrics = enabled;
        self
    }

    /// Poll interval clamped to [`MIN_INTERVAL`].
    pub fn effective_interval(&self) -> Duration {
        clamp_interval(self.interval)
    }
}

/// Clamp a poll interval to [`MIN_INTERVAL`].
pub fn clamp_interval(interval: Duration) -> Duration {
    if interval < MIN_INTERVAL {
        tracing::warn!(
            requested = ?interval,
            min_interval = ?MIN_INTERVAL,
            "Poll interval is below the minimum. Using minimum interval."
        );
        MIN_INTERVAL
    } else {
        interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_config_default() {
        let config = ExporterConfig::default();
        assert_eq!(config.listen_port, 9486);
        assert_eq!(config.interval, Duration::from_secs(15));
        assert_eq!(config.hub.host, "127.0.0.1");
        assert_eq!(config.hub.port, 8080);
        assert!(!config.hub.tls);
        assert!(!config.collect_default_metrics);
        assert_eq!(config.scrape_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_interval_floor() {
        let config = ExporterConfig::default().with_interval(Duration::from_secs(1));
        assert_eq!(config.effective_interval(), Duration::from_secs(2));

        let config = ExporterConfig::default().with_interval(Duration::ZERO);
        assert_eq!(config.effective_interval(), MIN_INTERVAL);
    }

    #[test]
    fn test_interval_above_floor() {
        let config = ExporterConfig::default().with_interval(Duration::from_secs(2));
        assert_eq!(config.effective_interval(), Duration::from_secs(2));

        let config = ExporterConfig::default().with_interval(Duration::from_secs(60));
        assert_eq!(config.effective_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_tls_forces_port() {
        let hub = HubConfig::new("domoticz.local", 8080).with_tls(true);
        assert_eq!(hub.effective_port(), 443);
        assert_eq!(hub.base_url(), "https://domoticz.local:443");
    }

    #[test]
    fn test_plain_base_url() {
        let hub = HubConfig::new("10.0.0.5", 8081);
        assert_eq!(hub.scheme(), "http");
        assert_eq!(hub.base_url(), "http://10.0.0.5:8081");
    }
}
