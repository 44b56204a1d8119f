//! Prometheus metric sink.
//!
//! Every poll cycle builds a complete [`DeviceMetrics`] set on the side and
//! hands it to [`MetricSink::publish`], which swaps it in under a short write
//! lock. Scrapes clone the current pointer under a read lock, so a reader
//! sees either the previous cycle's gauges or the new ones, never a
//! half-populated set.

use std::collections::HashMap;
use std::sync::Arc;

use prometheus::proto::MetricFamily;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tokio::sync::RwLock;

use crate::device::{DeviceLabels, MetricName, Observation, LABEL_NAMES};
use crate::error::SinkError;

/// Namespace prefixed to every exposed metric.
pub const NAMESPACE: &str = "domoticz";

/// One complete set of device gauges.
///
/// Each set owns its own registry, so building the next cycle's set never
/// touches the one being scraped.
pub struct DeviceMetrics {
    registry: Registry,
    gauges: HashMap<MetricName, GaugeVec>,
}

impl DeviceMetrics {
    /// Declare all device gauges with no label combinations set.
    pub fn new() -> Result<Self, SinkError> {
        let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None)?;
        let mut gauges = HashMap::with_capacity(MetricName::ALL.len());

        for metric in MetricName::ALL {
            let gauge = GaugeVec::new(Opts::new(metric.as_str(), metric.help()), &LABEL_NAMES)?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.insert(metric, gauge);
        }

        Ok(Self { registry, gauges })
    }

    /// Build a set holding exactly `observations`.
    pub fn from_observations<'a, I>(observations: I) -> Result<Self, SinkError>
    where
        I: IntoIterator<Item = &'a Observation>,
    {
        let metrics = Self::new()?;
        for observation in observations {
            metrics.record(observation)?;
        }
        Ok(metrics)
    }

    /// Overwrite the value of one label combination.
    pub fn set(&self, metric: MetricName, labels: &DeviceLabels, value: f64) -> Result<(), SinkError> {
        let gauge = self.gauges.get(&metric).ok_or_else(|| {
            prometheus::Error::Msg(format!("gauge {} is not declared", metric))
        })?;
        gauge
            .get_metric_with_label_values(&labels.values())?
            .set(value);
        Ok(())
    }

    /// Record one observation.
    pub fn record(&self, observation: &Observation) -> Result<(), SinkError> {
        self.set(observation.metric, &observation.labels, observation.value)
    }

    /// Drop every label combination of every gauge.
    pub fn reset(&self) {
        for gauge in self.gauges.values() {
            gauge.reset();
        }
    }

    /// Number of label combinations currently set, across all gauges.
    pub fn series_count(&self) -> usize {
        self.gather().iter().map(|mf| mf.get_metric().len()).sum()
    }

    fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }
}

impl std::fmt::Debug for DeviceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMetrics")
            .field("series", &self.series_count())
            .finish_non_exhaustive()
    }
}

/// The published device gauges plus optional process metrics.
pub struct MetricSink {
    current: RwLock<Arc<DeviceMetrics>>,
    process: Option<Registry>,
}

impl MetricSink {
    /// Create an empty sink.
    ///
    /// With `collect_default_metrics`, process metrics are registered once
    /// under the same namespace.
    pub fn new(collect_default_metrics: bool) -> Result<Self, SinkError> {
        let process = if collect_default_metrics {
            Some(process_registry()?)
        } else {
            None
        };

        Ok(Self {
            current: RwLock::new(Arc::new(DeviceMetrics::new()?)),
            process,
        })
    }

    /// Replace the published gauges with `next` in one step.
    pub async fn publish(&self, next: DeviceMetrics) {
        let next = Arc::new(next);
        *self.current.write().await = next;
    }

    /// Publish an empty set: no device is reporting anything.
    pub async fn reset(&self) -> Result<(), SinkError> {
        self.publish(DeviceMetrics::new()?).await;
        Ok(())
    }

    /// Currently published gauges.
    pub async fn snapshot(&self) -> Arc<DeviceMetrics> {
        Arc::clone(&*self.current.read().await)
    }

    /// Encode the current state in the Prometheus text format.
    pub async fn render(&self) -> Result<String, SinkError> {
        let current = self.snapshot().await;

        let mut families = current.gather();
        if let Some(ref process) = self.process {
            families.extend(process.gather());
        }

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Content type advertised for [`MetricSink::render`] output.
    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }

    /// Whether process metrics are exposed.
    pub fn collects_default_metrics(&self) -> bool {
        self.process.is_some()
    }
}

impl std::fmt::Debug for MetricSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSink")
            .field("process", &self.process.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(target_os = "linux")]
fn process_registry() -> Result<Registry, SinkError> {
    let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None)?;
    registry.register(Box::new(
        prometheus::process_collector::ProcessCollector::for_self(),
    ))?;
    Ok(registry)
}

#[cfg(not(target_os = "linux"))]
fn process_registry() -> Result<Registry, SinkError> {
    tracing::warn!("Process metrics are only available on Linux");
    Ok(Registry::new_custom(Some(NAMESPACE.to_string()), None)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn labels(name: &str) -> DeviceLabels {
        DeviceLabels {
            name: name.to_string(),
            idx: "1".to_string(),
            ..Default::default()
        }
    }

    fn observation(metric: MetricName, name: &str, value: f64) -> Observation {
        Observation {
            metric,
            labels: labels(name),
            value,
        }
    }

    /// Value of the sample of `metric` whose `name` label is `device`.
    fn sample(text: &str, metric: &str, device: &str) -> Option<f64> {
        let prefix = format!("{}_{}{{", NAMESPACE, metric);
        let name_label = format!("name=\"{}\"", device);
        text.lines()
            .filter(|line| line.starts_with(&prefix) && line.contains(&name_label))
            .find_map(|line| line.rsplit(' ').next()?.parse().ok())
    }

    #[test]
    fn test_set_overwrites() {
        let metrics = DeviceMetrics::new().unwrap();
        metrics.set(MetricName::TempTemp, &labels("Attic"), 20.0).unwrap();
        metrics.set(MetricName::TempTemp, &labels("Attic"), 21.0).unwrap();
        metrics.set(MetricName::TempHumidity, &labels("Attic"), 40.0).unwrap();

        assert_eq!(metrics.series_count(), 2);
    }

    #[test]
    fn test_reset_clears_everything() {
        let metrics = DeviceMetrics::from_observations(&[
            observation(MetricName::LightLevel, "A", 10.0),
            observation(MetricName::UtilityUsage, "B", 300.0),
        ])
        .unwrap();
        assert_eq!(metrics.series_count(), 2);

        metrics.reset();
        assert_eq!(metrics.series_count(), 0);
    }

    #[tokio::test]
    async fn test_render_contains_namespaced_samples() {
        let sink = MetricSink::new(false).unwrap();
        let next = DeviceMetrics::from_observations(&[
            observation(MetricName::LightLevel, "Kitchen", 50.0),
            observation(MetricName::LightStatus, "Kitchen", 1.0),
        ])
        .unwrap();
        sink.publish(next).await;

        let text = sink.render().await.unwrap();
        assert!(text.contains("# HELP domoticz_light_level Lighting device level"));
        assert!(text.contains("# TYPE domoticz_light_level gauge"));
        assert!(text.contains("hardwaretype=\"\""));
        assert_eq!(sample(&text, "light_level", "Kitchen"), Some(50.0));
        assert_eq!(sample(&text, "light_status", "Kitchen"), Some(1.0));
    }

    #[tokio::test]
    async fn test_publish_replaces_previous_devices() {
        let sink = MetricSink::new(false).unwrap();
        sink.publish(
            DeviceMetrics::from_observations(&[observation(MetricName::TempTemp, "Old", 5.0)])
                .unwrap(),
        )
        .await;
        sink.publish(
            DeviceMetrics::from_observations(&[observation(MetricName::TempTemp, "New", 6.0)])
                .unwrap(),
        )
        .await;

        let text = sink.render().await.unwrap();
        assert_eq!(sample(&text, "temp_temp", "Old"), None);
        assert_eq!(sample(&text, "temp_temp", "New"), Some(6.0));
    }

    #[tokio::test]
    async fn test_reset_publishes_empty_set() {
        let sink = MetricSink::new(false).unwrap();
        sink.publish(
            DeviceMetrics::from_observations(&[observation(MetricName::LightLevel, "A", 1.0)])
                .unwrap(),
        )
        .await;
        sink.reset().await.unwrap();

        assert_eq!(sink.snapshot().await.series_count(), 0);
        assert!(!sink.render().await.unwrap().contains("domoticz_light_level"));
    }

    #[tokio::test]
    async fn test_render_during_rebuild_sees_complete_snapshot() {
        let sink = Arc::new(MetricSink::new(false).unwrap());
        let before: Vec<Observation> = (0..20)
            .map(|i| observation(MetricName::WeatherTemp, &format!("dev{}", i), 1.0))
            .collect();
        sink.publish(DeviceMetrics::from_observations(&before).unwrap()).await;
        let old_text = sink.render().await.unwrap();

        // Next set is half built and then stalls before publishing.
        let next = DeviceMetrics::new().unwrap();
        for i in 0..10 {
            next.set(MetricName::WeatherTemp, &labels(&format!("dev{}", i)), 2.0).unwrap();
        }
        let reader = {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move { sink.render().await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(reader.await.unwrap(), old_text);

        for i in 10..20 {
            next.set(MetricName::WeatherTemp, &labels(&format!("dev{}", i)), 2.0).unwrap();
        }
        sink.publish(next).await;

        let new_text = sink.render().await.unwrap();
        for i in 0..20 {
            assert_eq!(sample(&new_text, "weather_temp", &format!("dev{}", i)), Some(2.0));
        }
    }

    #[tokio::test]
    async fn test_concurrent_readers_never_see_partial_state() {
        let sink = Arc::new(MetricSink::new(false).unwrap());
        let first: Vec<Observation> = (0..50)
            .map(|i| observation(MetricName::UtilityData, &format!("m{}", i), 1.0))
            .collect();
        let second: Vec<Observation> = (0..50)
            .map(|i| observation(MetricName::UtilityData, &format!("m{}", i), 2.0))
            .collect();

        sink.publish(DeviceMetrics::from_observations(&first).unwrap()).await;
        let first_text = sink.render().await.unwrap();
        let second_text = DeviceMetrics::from_observations(&second)
            .map(|m| {
                let encoder = TextEncoder::new();
                let mut buffer = Vec::new();
                encoder.encode(&m.gather(), &mut buffer).unwrap();
                String::from_utf8(buffer).unwrap()
            })
            .unwrap();

        let readers: Vec<_> = (0..16)
            .map(|_| {
                let sink = Arc::clone(&sink);
                tokio::spawn(async move { sink.render().await.unwrap() })
            })
            .collect();
        sink.publish(DeviceMetrics::from_observations(&second).unwrap()).await;

        for reader in readers {
            let text = reader.await.unwrap();
            assert!(text == first_text || text == second_text);
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_process_metrics_are_namespaced() {
        let sink = MetricSink::new(true).unwrap();
        assert!(sink.collects_default_metrics());

        let text = sink.render().await.unwrap();
        assert!(text.contains("domoticz_process_"));
    }

    #[test]
    fn test_content_type() {
        let sink = MetricSink::new(false).unwrap();
        assert!(sink.content_type().starts_with("text/plain"));
    }
}
