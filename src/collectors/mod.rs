//! Collector strategies
//!
//! A strategy gathers metric samples from one device address using one
//! protocol. Strategies are stateless across calls (they hold only static
//! configuration) and are shared by every device task, so they must be safe
//! to call concurrently for different addresses.
//!
//! ## Dispatch
//!
//! ```text
//! router | switch | network  → SNMP
//! linux | unix               → SSH
//! windows                    → WMI
//! anything else              → SNMP
//! ```
//!
//! Reachability checks always use the ping strategy.
//!
//! Deadlines are enforced by the caller: the orchestrator drops the future
//! returned by `collect` when the device timeout or shutdown fires.

pub mod aggregate;
pub mod ping;
pub mod snmp;
pub mod ssh;
pub mod wmi;

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::Config;
use crate::{Device, MetricSample};

pub use aggregate::PartialCollection;
pub use ping::PingCollector;
pub use snmp::SnmpCollector;
pub use ssh::{OpenSshShell, RemoteShell, SshCollector};
pub use wmi::{WmiCollector, WmiQuery, WmicClient};

/// Tag naming the metric family of a sample (cpu, memory, disk, ...)
pub const METRIC_TYPE_TAG: &str = "metric_type";

/// Tag naming the protocol a sample was collected with
pub const SOURCE_TAG: &str = "source";

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("failed to resolve {address}: {reason}")]
    Resolve { address: String, reason: String },

    #[error("{address} is unreachable: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Transport or protocol level failure (agent not responding, session refused)
    #[error("{0}")]
    Protocol(String),

    /// The device answered, but not in the expected shape
    #[error("unexpected output: {0}")]
    Parse(String),

    #[error("collector not configured: {0}")]
    Config(String),

    /// Every sub-collection of a multi-metric strategy failed
    #[error("failed to collect any metrics from {address}: {}", causes.join("; "))]
    NothingCollected { address: String, causes: Vec<String> },
}

pub type CollectResult<T> = Result<T, CollectError>;

/// A protocol-specific way of gathering samples from a device
#[async_trait]
pub trait CollectorStrategy: Send + Sync {
    /// Collect samples from `address`.
    ///
    /// Multi-metric strategies return whatever succeeded and fail only
    /// when nothing did (see [`PartialCollection`]).
    async fn collect(&self, address: &str) -> CollectResult<Vec<MetricSample>>;
}

/// The protocol families a device can be polled with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Ping,
    Snmp,
    Ssh,
    Wmi,
}

impl StrategyKind {
    /// Metrics strategy for a device-type classifier (exact match).
    ///
    /// Unknown and empty classifiers fall back to SNMP.
    pub fn for_device_type(device_type: &str) -> Self {
        match device_type {
            "router" | "switch" | "network" => StrategyKind::Snmp,
            "linux" | "unix" => StrategyKind::Ssh,
            "windows" => StrategyKind::Wmi,
            _ => StrategyKind::Snmp,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Ping => "ping",
            StrategyKind::Snmp => "snmp",
            StrategyKind::Ssh => "ssh",
            StrategyKind::Wmi => "wmi",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry holding one strategy per protocol family
#[derive(Clone)]
pub struct StrategySet {
    ping: Arc<dyn CollectorStrategy>,
    snmp: Arc<dyn CollectorStrategy>,
    ssh: Arc<dyn CollectorStrategy>,
    wmi: Arc<dyn CollectorStrategy>,
}

impl StrategySet {
    pub fn new(
        ping: Arc<dyn CollectorStrategy>,
        snmp: Arc<dyn CollectorStrategy>,
        ssh: Arc<dyn CollectorStrategy>,
        wmi: Arc<dyn CollectorStrategy>,
    ) -> Self {
        Self {
            ping,
            snmp,
            ssh,
            wmi,
        }
    }

    /// Build the protocol strategies from configuration
    pub fn from_config(config: &Config) -> Self {
        let ssh_shell = OpenSshShell::new(config.ssh.clone());
        let wmi_client = WmicClient::new(config.wmi.clone());

        Self::new(
            Arc::new(PingCollector::new(config.device_timeout)),
            Arc::new(SnmpCollector::new(config.snmp.clone()).with_budget(config.collection_timeout)),
            Arc::new(SshCollector::new(Arc::new(ssh_shell))),
            Arc::new(WmiCollector::new(Arc::new(wmi_client))),
        )
    }

    pub fn get(&self, kind: StrategyKind) -> &Arc<dyn CollectorStrategy> {
        match kind {
            StrategyKind::Ping => &self.ping,
            StrategyKind::Snmp => &self.snmp,
            StrategyKind::Ssh => &self.ssh,
            StrategyKind::Wmi => &self.wmi,
        }
    }

    /// Strategy used by the status loop
    pub fn reachability(&self) -> &Arc<dyn CollectorStrategy> {
        &self.ping
    }

    /// Strategy used by the metrics loop for `device`
    pub fn for_device(&self, device: &Device) -> (StrategyKind, &Arc<dyn CollectorStrategy>) {
        let kind = StrategyKind::for_device_type(&device.device_type);
        (kind, self.get(kind))
    }
}

impl fmt::Debug for StrategySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategySet").finish_non_exhaustive()
    }
}

/// New sample carrying the `metric_type` and `source` tags
pub(crate) fn tagged_sample(
    name: &str,
    timestamp: DateTime<Utc>,
    metric_type: &str,
    source: &str,
) -> MetricSample {
    MetricSample::new(name, timestamp)
        .tag(METRIC_TYPE_TAG, metric_type)
        .tag(SOURCE_TAG, source)
}

/// Resolve an IP literal or host name to the first address found
pub(crate) async fn resolve_host(host: &str) -> CollectResult<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let mut addrs = tokio::net::lookup_host(format!("{host}:0"))
        .await
        .map_err(|e| CollectError::Resolve {
            address: host.to_string(),
            reason: e.to_string(),
        })?;

    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| CollectError::Resolve {
            address: host.to_string(),
            reason: "no addresses found".to_string(),
        })
}
