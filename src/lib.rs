pub mod collectors;
pub mod config;
pub mod inventory;
pub mod orchestrator;
pub mod sink;
pub mod status;
pub mod util;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag carrying the inventory identifier of the device a sample belongs to
pub const DEVICE_ID_TAG: &str = "device_id";

/// Tag carrying the inventory hostname of the device a sample belongs to
pub const HOSTNAME_TAG: &str = "hostname";

/// Measurement name of the per-check reachability sample
pub const DEVICE_STATUS_MEASUREMENT: &str = "device_status";

/// A monitored endpoint as listed by the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub mac_address: Option<String>,
    /// Free-form classifier driving strategy selection ("router", "linux", ...)
    #[serde(default)]
    pub device_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Online,
    Offline,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Online => "online",
            DeviceState::Offline => "offline",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known reachability of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub state: DeviceState,
    pub last_seen: DateTime<Utc>,
    /// Empty when the device is online
    pub error: String,
}

impl DeviceStatus {
    pub fn is_online(&self) -> bool {
        self.state == DeviceState::Online
    }
}

/// A single field value of a metric sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// One timestamped, tagged data point destined for the metrics sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            timestamp,
            tags: BTreeMap::new(),
        }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Stamp the sample with the identity of the device it was collected from
    pub fn with_device(mut self, device: &Device) -> Self {
        self.tags.insert(DEVICE_ID_TAG.to_string(), device.id.clone());
        self.tags
            .insert(HOSTNAME_TAG.to_string(), device.hostname.clone());
        self
    }
}
