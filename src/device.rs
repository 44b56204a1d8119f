//! Device records and the device-to-metric mapper.
//!
//! The hub reports every device as a loosely typed JSON object: numbers may
//! arrive as JSON numbers or as strings, and utility readings embed their
//! unit (`"123.4 kWh"`). Records are therefore deserialized with every field
//! kept as an optional [`serde_json::Value`], and [`map_device`] applies the
//! validity rules for each field explicitly.
//!
//! A missing or invalid field only suppresses the observation for that one
//! metric; the record's other fields are still mapped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Label names shared by every device gauge, in declaration order.
pub const LABEL_NAMES: [&str; 6] = [
    "name",
    "idx",
    "type",
    "subtype",
    "hardwarename",
    "hardwaretype",
];

/// Device class, matching the hub's `filter` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Light,
    Temp,
    Weather,
    Utility,
}

impl DeviceClass {
    /// All classes, in polling order.
    pub const ALL: [DeviceClass; 4] = [
        DeviceClass::Light,
        DeviceClass::Temp,
        DeviceClass::Weather,
        DeviceClass::Utility,
    ];

    /// Filter value understood by the hub API.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Light => "light",
            DeviceClass::Temp => "temp",
            DeviceClass::Weather => "weather",
            DeviceClass::Utility => "utility",
        }
    }

    /// Metrics a device of this class can report.
    pub fn metrics(&self) -> &'static [MetricName] {
        match self {
            DeviceClass::Light => &[
                MetricName::LightLevel,
                MetricName::LightStatus,
                MetricName::LightBatteryLevel,
            ],
            DeviceClass::Temp => &[
                MetricName::TempTemp,
                MetricName::TempHumidity,
                MetricName::TempBatteryLevel,
            ],
            DeviceClass::Weather => &[
                MetricName::WeatherTemp,
                MetricName::WeatherHumidity,
                MetricName::WeatherBarometer,
                MetricName::WeatherBatteryLevel,
            ],
            DeviceClass::Utility => &[
                MetricName::UtilityData,
                MetricName::UtilityUsage,
                MetricName::UtilityBatteryLevel,
            ],
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed set of device gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricName {
    LightLevel,
    LightStatus,
    LightBatteryLevel,
    TempTemp,
    TempHumidity,
    TempBatteryLevel,
    WeatherTemp,
    WeatherHumidity,
    WeatherBarometer,
    WeatherBatteryLevel,
    UtilityData,
    UtilityUsage,
    UtilityBatteryLevel,
}

impl MetricName {
    /// Every metric, in declaration order.
    pub const ALL: [MetricName; 13] = [
        MetricName::LightLevel,
        MetricName::LightStatus,
        MetricName::LightBatteryLevel,
        MetricName::TempTemp,
        MetricName::TempHumidity,
        MetricName::TempBatteryLevel,
        MetricName::WeatherTemp,
        MetricName::WeatherHumidity,
        MetricName::WeatherBarometer,
        MetricName::WeatherBatteryLevel,
        MetricName::UtilityData,
        MetricName::UtilityUsage,
        MetricName::UtilityBatteryLevel,
    ];

    /// Metric name without the registry namespace.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::LightLevel => "light_level",
            MetricName::LightStatus => "light_status",
            MetricName::LightBatteryLevel => "light_battery_level",
            MetricName::TempTemp => "temp_temp",
            MetricName::TempHumidity => "temp_humidity",
            MetricName::TempBatteryLevel => "temp_battery_level",
            MetricName::WeatherTemp => "weather_temp",
            MetricName::WeatherHumidity => "weather_humidity",
            MetricName::WeatherBarometer => "weather_barometer",
            MetricName::WeatherBatteryLevel => "weather_battery_level",
            MetricName::UtilityData => "utility_data",
            MetricName::UtilityUsage => "utility_usage",
            MetricName::UtilityBatteryLevel => "utility_battery_level",
        }
    }

    /// HELP text for the exposition output.
    pub fn help(&self) -> &'static str {
        match self {
            MetricName::LightLevel => "Lighting device level 0-100 or 0-255",
            MetricName::LightStatus => "Lighting device status 0=off 1=on",
            MetricName::LightBatteryLevel => "Lighting device battery level 0-100 or 0-255",
            MetricName::TempTemp => "Temperature device temperature",
            MetricName::TempHumidity => "Temperature device humidity percentage 0-100",
            MetricName::TempBatteryLevel => "Temperature device battery level 0-100 or 0-255",
            MetricName::WeatherTemp => "Weather device temperature",
            MetricName::WeatherHumidity => "Weather device humidity percentage 0-100",
            MetricName::WeatherBarometer => "Weather device barometer",
            MetricName::WeatherBatteryLevel => "Weather device battery level 0-100 or 0-255",
            MetricName::UtilityData => "Utility device data",
            MetricName::UtilityUsage => "Utility device usage",
            MetricName::UtilityBatteryLevel => "Utility device battery level 0-100 or 0-255",
        }
    }
}

impl std::fmt::Display for MetricName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One device as reported by the hub.
///
/// Only the fields the mapper reads are kept; anything else in the payload
/// is ignored. JSON `null` deserializes as `None`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeviceRecord {
    #[serde(rename = "Name")]
    pub name: Option<Value>,
    pub idx: Option<Value>,
    #[serde(rename = "Type")]
    pub device_type: Option<Value>,
    #[serde(rename = "SubType")]
    pub sub_type: Option<Value>,
    #[serde(rename = "HardwareName")]
    pub hardware_name: Option<Value>,
    #[serde(rename = "HardwareType")]
    pub hardware_type: Option<Value>,

    #[serde(rename = "Level")]
    pub level: Option<Value>,
    #[serde(rename = "Status")]
    pub status: Option<Value>,
    #[serde(rename = "BatteryLevel")]
    pub battery_level: Option<Value>,
    #[serde(rename = "Temp")]
    pub temp: Option<Value>,
    #[serde(rename = "Humidity")]
    pub humidity: Option<Value>,
    #[serde(rename = "Barometer")]
    pub barometer: Option<Value>,
    #[serde(rename = "Data")]
    pub data: Option<Value>,
    #[serde(rename = "Usage")]
    pub usage: Option<Value>,
}

/// Identity labels of a device.
///
/// Absent identity fields are rendered as the empty string, since the label
/// schema has a fixed arity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceLabels {
    pub name: String,
    pub idx: String,
    pub device_type: String,
    pub sub_type: String,
    pub hardware_name: String,
    pub hardware_type: String,
}

impl DeviceLabels {
    /// Extract the identity tuple from a record.
    pub fn from_record(record: &DeviceRecord) -> Self {
        Self {
            name: label_text(&record.name),
            idx: label_text(&record.idx),
            device_type: label_text(&record.device_type),
            sub_type: label_text(&record.sub_type),
            hardware_name: label_text(&record.hardware_name),
            hardware_type: label_text(&record.hardware_type),
        }
    }

    /// Label values in [`LABEL_NAMES`] order.
    pub fn values(&self) -> [&str; 6] {
        [
            &self.name,
            &self.idx,
            &self.device_type,
            &self.sub_type,
            &self.hardware_name,
            &self.hardware_type,
        ]
    }
}

/// One gauge sample derived from a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub metric: MetricName,
    pub labels: DeviceLabels,
    pub value: f64,
}

/// Convert one device record into its observations.
///
/// Returns between zero and `class.metrics().len()` observations, all sharing
/// the same label tuple.
pub fn map_device(class: DeviceClass, record: &DeviceRecord) -> Vec<Observation> {
    let readings: Vec<(MetricName, Option<f64>)> = match class {
        DeviceClass::Light => vec![
            (MetricName::LightLevel, numeric(&record.level)),
            (MetricName::LightStatus, switch_status(&record.status)),
            (MetricName::LightBatteryLevel, numeric(&record.battery_level)),
        ],
        DeviceClass::Temp => vec![
            (MetricName::TempTemp, numeric(&record.temp)),
            (MetricName::TempHumidity, numeric(&record.humidity)),
            (MetricName::TempBatteryLevel, numeric(&record.battery_level)),
        ],
        DeviceClass::Weather => vec![
            (MetricName::WeatherTemp, numeric(&record.temp)),
            (MetricName::WeatherHumidity, numeric(&record.humidity)),
            (MetricName::WeatherBarometer, numeric(&record.barometer)),
            (MetricName::WeatherBatteryLevel, numeric(&record.battery_level)),
        ],
        DeviceClass::Utility => vec![
            (MetricName::UtilityData, free_text_numeric(&record.data)),
            (MetricName::UtilityUsage, free_text_numeric(&record.usage)),
            (MetricName::UtilityBatteryLevel, numeric(&record.battery_level)),
        ],
    };

    let labels = DeviceLabels::from_record(record);
    readings
        .into_iter()
        .filter_map(|(metric, value)| {
            value.map(|value| Observation {
                metric,
                labels: labels.clone(),
                value,
            })
        })
        .collect()
}

/// Map every record of one class.
pub fn map_devices(class: DeviceClass, records: &[DeviceRecord]) -> Vec<Observation> {
    records
        .iter()
        .flat_map(|record| map_device(class, record))
        .collect()
}

fn label_text(value: &Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// A finite JSON number, or a string holding one.
fn numeric(value: &Option<Value>) -> Option<f64> {
    match value.as_ref()? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// `1` for `ON`/`OPEN` in any case, `0` for any other string.
fn switch_status(value: &Option<Value>) -> Option<f64> {
    match value.as_ref()? {
        Value::String(s) => {
            let on = s.eq_ignore_ascii_case("ON") || s.eq_ignore_ascii_case("OPEN");
            Some(if on { 1.0 } else { 0.0 })
        }
        other => {
            tracing::debug!(status = %other, "Ignoring non-string device status");
            None
        }
    }
}

/// Numeric reading with an embedded unit, e.g. `"123.4 kWh"`.
fn free_text_numeric(value: &Option<Value>) -> Option<f64> {
    match value.as_ref()? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_free_text(s),
        _ => None,
    }
}

/// Keep only digits, `.` and `-`, then read the longest leading float.
pub fn parse_free_text(text: &str) -> Option<f64> {
    let stripped: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    leading_float(&stripped)
}

fn leading_float(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut end = usize::from(bytes.first() == Some(&b'-'));

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        end = frac_end;
    }

    if digits == 0 {
        return None;
    }
    s[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}
