use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::{trace, warn};

use crate::Device;
use crate::orchestrator::OrchestratorSettings;
use crate::util;

/// Metrics sink configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum SinkConfig {
    /// InfluxDB v2 HTTP write API (default)
    Influxdb {
        #[serde(default)]
        url: String,
        #[serde(default)]
        token: String,
        #[serde(default)]
        org: String,
        #[serde(default)]
        bucket: String,
        /// Timeout of a single write request
        #[serde(default = "default_request_timeout", with = "humantime_serde")]
        request_timeout: Duration,
    },

    /// Keep samples in memory only (no persistence)
    Memory {
        #[serde(default = "default_memory_capacity")]
        capacity: usize,
    },
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::Influxdb {
            url: String::new(),
            token: String::new(),
            org: String::new(),
            bucket: String::new(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Device inventory configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum InventoryConfig {
    /// `devices` table of the PostgreSQL inventory database (default)
    Postgres {
        #[serde(default)]
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },

    /// Devices listed directly in the configuration file
    Static {
        #[serde(default)]
        devices: Vec<Device>,
    },
}

impl Default for InventoryConfig {
    fn default() -> Self {
        InventoryConfig::Postgres {
            url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SnmpConfig {
    #[serde(default = "default_snmp_community")]
    pub community: String,
    #[serde(default = "default_snmp_port")]
    pub port: u16,
    #[serde(default = "default_snmp_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_snmp_retries")]
    pub retries: u32,
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            community: default_snmp_community(),
            port: default_snmp_port(),
            timeout: default_snmp_timeout(),
            retries: default_snmp_retries(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SshConfig {
    #[serde(default)]
    pub username: String,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_remote_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: None,
            key_file: None,
            port: default_ssh_port(),
            timeout: default_remote_timeout(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct WmiConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub domain: Option<String>,
    #[serde(default = "default_remote_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for WmiConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            domain: None,
            timeout: default_remote_timeout(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default = "default_status_poll_interval", with = "humantime_serde")]
    pub status_poll_interval: Duration,

    #[serde(default = "default_metrics_poll_interval", with = "humantime_serde")]
    pub metrics_poll_interval: Duration,

    /// Bound of a single reachability check
    #[serde(default = "default_device_timeout", with = "humantime_serde")]
    pub device_timeout: Duration,

    /// Bound of a single metrics collection
    #[serde(default = "default_collection_timeout", with = "humantime_serde")]
    pub collection_timeout: Duration,

    /// Upper bound of device tasks in flight at once, across both loops
    #[serde(default = "default_max_concurrent_devices")]
    pub max_concurrent_devices: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub sink: SinkConfig,

    #[serde(default)]
    pub inventory: InventoryConfig,

    #[serde(default)]
    pub snmp: SnmpConfig,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub wmi: WmiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            status_poll_interval: default_status_poll_interval(),
            metrics_poll_interval: default_metrics_poll_interval(),
            device_timeout: default_device_timeout(),
            collection_timeout: default_collection_timeout(),
            max_concurrent_devices: default_max_concurrent_devices(),
            log_level: default_log_level(),
            sink: SinkConfig::default(),
            inventory: InventoryConfig::default(),
            snmp: SnmpConfig::default(),
            ssh: SshConfig::default(),
            wmi: WmiConfig::default(),
        }
    }
}

fn default_status_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_metrics_poll_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_device_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_collection_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_concurrent_devices() -> usize {
    256
}

fn default_log_level() -> String {
    String::from("info")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_memory_capacity() -> usize {
    10_000
}

fn default_max_connections() -> u32 {
    5
}

fn default_snmp_community() -> String {
    String::from("public")
}

fn default_snmp_port() -> u16 {
    161
}

fn default_snmp_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_snmp_retries() -> u32 {
    3
}

fn default_ssh_port() -> u16 {
    22
}

fn default_remote_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Config {
    /// Patch connection settings from the environment. Influx variables only
    /// apply to an influxdb sink and `DATABASE_URL` only to a postgres
    /// inventory.
    pub fn apply_env_overrides(&mut self) {
        if let SinkConfig::Influxdb {
            url,
            token,
            org,
            bucket,
            ..
        } = &mut self.sink
        {
            if let Some(value) = util::get_influx_url() {
                *url = value;
            }
            if let Some(value) = util::get_influx_token() {
                *token = value;
            }
            if let Some(value) = util::get_influx_org() {
                *org = value;
            }
            if let Some(value) = util::get_influx_bucket() {
                *bucket = value;
            }
        }

        if let InventoryConfig::Postgres { url, .. } = &mut self.inventory
            && let Some(value) = util::get_database_url()
        {
            *url = value;
        }

        if let Some(level) = util::get_log_level() {
            self.log_level = level;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let SinkConfig::Influxdb {
            url, token, bucket, ..
        } = &self.sink
        {
            if url.is_empty() {
                bail!("InfluxDB URL is required");
            }
            if token.is_empty() {
                bail!("InfluxDB token is required");
            }
            if bucket.is_empty() {
                bail!("InfluxDB bucket is required");
            }
        }

        if let SinkConfig::Memory { capacity } = &self.sink
            && *capacity == 0
        {
            bail!("memory sink capacity must be greater than zero");
        }

        if let InventoryConfig::Postgres { url, .. } = &self.inventory
            && url.is_empty()
        {
            bail!("PostgreSQL URL is required");
        }

        if self.status_poll_interval.is_zero() {
            bail!("status poll interval must be greater than zero");
        }
        if self.metrics_poll_interval.is_zero() {
            bail!("metrics poll interval must be greater than zero");
        }
        if self.device_timeout.is_zero() {
            bail!("device timeout must be greater than zero");
        }
        if self.collection_timeout.is_zero() {
            bail!("collection timeout must be greater than zero");
        }
        if self.max_concurrent_devices == 0 {
            bail!("max concurrent devices must be at least 1");
        }

        if self.ssh.key_file.is_none() && self.ssh.password.is_none() {
            warn!("no SSH key file or password configured, linux/unix devices will fail collection");
        }

        Ok(())
    }

    /// The validated subset consumed by the orchestrator
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            status_poll_interval: self.status_poll_interval,
            metrics_poll_interval: self.metrics_poll_interval,
            device_timeout: self.device_timeout,
            collection_timeout: self.collection_timeout,
            max_concurrent_devices: self.max_concurrent_devices,
        }
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {path}"))?;
    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {path}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
