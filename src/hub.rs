//! Domoticz hub client.
//!
//! Fetches the device list of each [`DeviceClass`] over the hub's JSON API.
//! Every failure (transport, HTTP status, malformed body) comes back as a
//! [`HubError`] for that one class; [`fetch_all`] never lets one class's
//! failure affect the other three.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::config::HubConfig;
use crate::device::{DeviceClass, DeviceRecord};
use crate::error::HubError;

/// Source of device records, one class at a time.
#[async_trait]
pub trait DeviceSource: Send + Sync {
    /// Fetch every used device of `class`.
    async fn fetch(&self, class: DeviceClass) -> Result<Vec<DeviceRecord>, HubError>;
}

/// Outcome of fetching one device class.
#[derive(Debug)]
pub struct ClassFetch {
    pub class: DeviceClass,
    pub devices: Result<Vec<DeviceRecord>, HubError>,
}

/// HTTP client for the Domoticz JSON API.
#[derive(Debug, Clone)]
pub struct HubClient {
    config: HubConfig,
    client: Client,
}

impl HubClient {
    /// Build a client. The configured timeout bounds every request.
    ///
    /// # Errors
    /// Returns `HubError::Config` if the HTTP client cannot be built.
    pub fn new(config: HubConfig) -> Result<Self, HubError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| HubError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Hub settings in use.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Device list URL for one class.
    pub fn device_url(&self, class: DeviceClass) -> String {
        format!(
            "{}/json.htm?type=devices&filter={}&used=true&order=Name",
            self.config.base_url(),
            class.as_str()
        )
    }
}

#[async_trait]
impl DeviceSource for HubClient {
    async fn fetch(&self, class: DeviceClass) -> Result<Vec<DeviceRecord>, HubError> {
        let url = self.device_url(class);
        debug!("Devices of type {} requested", class);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HubError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.bytes().await?;
        let devices = parse_devices(&body)?;
        debug!("Devices of type {} received: {}", class, devices.len());
        Ok(devices)
    }
}

/// Parse a device list response.
///
/// A body that is not JSON is an error. A JSON body without a `result` array
/// is an empty device list, and array entries that are not objects are
/// skipped.
pub fn parse_devices(body: &[u8]) -> Result<Vec<DeviceRecord>, HubError> {
    let payload: Value = serde_json::from_slice(body)?;

    let Some(Value::Array(items)) = payload.get("result") else {
        debug!("Response has no result array, treating as no devices");
        return Ok(Vec::new());
    };

    Ok(items
        .iter()
        .filter_map(|item| match DeviceRecord::deserialize(item) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Skipping malformed device entry: {}", e);
                None
            }
        })
        .collect())
}

/// Fetch all four classes concurrently and wait for every outcome.
pub async fn fetch_all<S>(source: &S) -> Vec<ClassFetch>
where
    S: DeviceSource + ?Sized,
{
    let (light, temp, weather, utility) = tokio::join!(
        fetch_class(source, DeviceClass::Light),
        fetch_class(source, DeviceClass::Temp),
        fetch_class(source, DeviceClass::Weather),
        fetch_class(source, DeviceClass::Utility),
    );
    vec![light, temp, weather, utility]
}

async fn fetch_class<S>(source: &S, class: DeviceClass) -> ClassFetch
where
    S: DeviceSource + ?Sized,
{
    let devices = source.fetch(class).await;
    if let Err(ref e) = devices {
        error!(class = %class, "{}", e.hint());
        error!(class = %class, "Fetch failed: {}", e);
    }
    ClassFetch { class, devices }
}
