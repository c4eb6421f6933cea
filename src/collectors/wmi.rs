//! WMI collector for Windows hosts
//!
//! WQL queries are sent with the `wmic` command-line client, which prints
//! one result set per query:
//!
//! ```text
//! CLASS: Win32_Processor
//! DeviceID|LoadPercentage
//! CPU0|12
//! CPU1|20
//! ```

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::trace;

use crate::MetricSample;
use crate::config::WmiConfig;

use super::{CollectError, CollectResult, CollectorStrategy, PartialCollection, tagged_sample};

const SOURCE: &str = "wmi";

pub const CPU_QUERY: &str = "SELECT LoadPercentage FROM Win32_Processor";
pub const TOTAL_MEMORY_QUERY: &str = "SELECT TotalPhysicalMemory FROM Win32_ComputerSystem";
pub const FREE_MEMORY_QUERY: &str = "SELECT FreePhysicalMemory FROM Win32_OperatingSystem";
pub const DISK_QUERY: &str =
    "SELECT DeviceID, Size, FreeSpace FROM Win32_LogicalDisk WHERE DriveType = 3";
pub const NETWORK_QUERY: &str = "SELECT Name, BytesReceivedPersec, BytesSentPersec FROM Win32_PerfRawData_Tcpip_NetworkInterface";
pub const UPTIME_QUERY: &str = "SELECT SystemUpTime FROM Win32_PerfFormattedData_PerfOS_System";

/// One result row, property name to raw value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WmiRow(HashMap<String, String>);

impl WmiRow {
    /// Property value by case-insensitive name; `(null)` counts as absent
    pub fn get(&self, property: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(property))
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty() && *value != "(null)")
    }

    fn number(&self, property: &str) -> Option<f64> {
        self.get(property).and_then(|v| v.trim().parse().ok())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for WmiRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        WmiRow(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Runs a WQL query against a remote host
#[async_trait]
pub trait WmiQuery: Send + Sync {
    async fn query(&self, address: &str, wql: &str) -> CollectResult<Vec<WmiRow>>;
}

/// Parse the `CLASS:` / header / rows layout printed by `wmic`
pub fn parse_wmic_output(output: &str) -> CollectResult<Vec<WmiRow>> {
    let mut lines = output.lines().map(str::trim_end).filter(|l| !l.is_empty());

    let Some(first) = lines.next() else {
        return Ok(Vec::new());
    };
    if !first.starts_with("CLASS:") {
        return Err(CollectError::Parse(format!("unexpected wmic output: {first:?}")));
    }

    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<&str> = header.split('|').collect();

    Ok(lines
        .map(|line| {
            columns
                .iter()
                .copied()
                .zip(line.splitn(columns.len(), '|'))
                .collect()
        })
        .collect())
}

/// `WmiQuery` using the Samba `wmic` client
///
/// The password is handed over in the `PASSWD` environment variable so it
/// never appears on a command line.
#[derive(Debug, Clone)]
pub struct WmicClient {
    config: WmiConfig,
}

impl WmicClient {
    pub fn new(config: WmiConfig) -> Self {
        Self { config }
    }

    fn user(&self) -> CollectResult<String> {
        if self.config.username.is_empty() {
            return Err(CollectError::Config("no WMI username configured".to_string()));
        }

        Ok(match &self.config.domain {
            Some(domain) if !domain.is_empty() => format!("{domain}/{}", self.config.username),
            _ => self.config.username.clone(),
        })
    }
}

#[async_trait]
impl WmiQuery for WmicClient {
    async fn query(&self, address: &str, wql: &str) -> CollectResult<Vec<WmiRow>> {
        let mut cmd = Command::new("wmic");
        cmd.arg("-U")
            .arg(self.user()?)
            .arg(format!("//{address}"))
            .arg(wql)
            .env("PASSWD", &self.config.password)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.config.timeout, cmd.output())
            .await
            .map_err(|_| CollectError::Timeout(self.config.timeout))?
            .map_err(|e| CollectError::Protocol(format!("failed to run wmic: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollectError::Protocol(format!(
                "WMI query '{wql}' failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_wmic_output(&String::from_utf8_lossy(&output.stdout))
    }
}

async fn cpu_samples(
    client: &dyn WmiQuery,
    address: &str,
    ts: DateTime<Utc>,
) -> CollectResult<Vec<MetricSample>> {
    let loads: Vec<f64> = client
        .query(address, CPU_QUERY)
        .await?
        .iter()
        .filter_map(|row| row.number("LoadPercentage"))
        .collect();

    if loads.is_empty() {
        return Ok(Vec::new());
    }

    let average = loads.iter().sum::<f64>() / loads.len() as f64;
    Ok(vec![
        tagged_sample("cpu_utilization", ts, "cpu", SOURCE).field("cpu_percent", average),
    ])
}

async fn memory_samples(
    client: &dyn WmiQuery,
    address: &str,
    ts: DateTime<Utc>,
) -> CollectResult<Vec<MetricSample>> {
    let total = client
        .query(address, TOTAL_MEMORY_QUERY)
        .await?
        .first()
        .and_then(|row| row.number("TotalPhysicalMemory"))
        .ok_or_else(|| CollectError::Parse("no TotalPhysicalMemory value".to_string()))?;

    // reported in KiB
    let free = client
        .query(address, FREE_MEMORY_QUERY)
        .await?
        .first()
        .and_then(|row| row.number("FreePhysicalMemory"))
        .ok_or_else(|| CollectError::Parse("no FreePhysicalMemory value".to_string()))?
        * 1024.0;

    if total <= 0.0 {
        return Err(CollectError::Parse("total memory is zero".to_string()));
    }

    let used = (total - free).max(0.0);
    Ok(vec![
        tagged_sample("memory_utilization", ts, "memory", SOURCE)
            .field("memory_percent", used / total * 100.0)
            .field("memory_total", total)
            .field("memory_used", used),
    ])
}

async fn disk_samples(
    client: &dyn WmiQuery,
    address: &str,
    ts: DateTime<Utc>,
) -> CollectResult<Vec<MetricSample>> {
    let rows = client.query(address, DISK_QUERY).await?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let size = row.number("Size").filter(|s| *s > 0.0)?;
            let free = row.number("FreeSpace").unwrap_or(0.0);
            let used = size - free;

            Some(
                tagged_sample("disk_utilization", ts, "disk", SOURCE)
                    .field("disk_percent", used / size * 100.0)
                    .field("disk_total", size)
                    .field("disk_used", used)
                    .field("disk_free", free)
                    .tag("drive", row.get("DeviceID").unwrap_or_default()),
            )
        })
        .collect())
}

async fn network_samples(
    client: &dyn WmiQuery,
    address: &str,
    ts: DateTime<Utc>,
) -> CollectResult<Vec<MetricSample>> {
    let rows = client.query(address, NETWORK_QUERY).await?;

    Ok(rows
        .iter()
        .filter(|row| {
            !row.get("Name")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .contains("loopback")
        })
        .map(|row| {
            tagged_sample("network_traffic", ts, "network", SOURCE)
                .field("bytes_in", row.number("BytesReceivedPersec").unwrap_or(0.0))
                .field("bytes_out", row.number("BytesSentPersec").unwrap_or(0.0))
                .tag("interface", row.get("Name").unwrap_or_default())
        })
        .collect())
}

async fn uptime_samples(
    client: &dyn WmiQuery,
    address: &str,
    ts: DateTime<Utc>,
) -> CollectResult<Vec<MetricSample>> {
    let seconds = client
        .query(address, UPTIME_QUERY)
        .await?
        .first()
        .and_then(|row| row.number("SystemUpTime"))
        .ok_or_else(|| CollectError::Parse("no SystemUpTime value".to_string()))?;

    Ok(vec![
        tagged_sample("system_uptime", ts, "system", SOURCE).field("uptime_seconds", seconds),
    ])
}

pub struct WmiCollector {
    client: Arc<dyn WmiQuery>,
}

impl WmiCollector {
    pub fn new(client: Arc<dyn WmiQuery>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CollectorStrategy for WmiCollector {
    async fn collect(&self, address: &str) -> CollectResult<Vec<MetricSample>> {
        let ts = Utc::now();
        let client = self.client.as_ref();

        let (cpu, memory, disk, network, uptime) = tokio::join!(
            cpu_samples(client, address, ts),
            memory_samples(client, address, ts),
            disk_samples(client, address, ts),
            network_samples(client, address, ts),
            uptime_samples(client, address, ts)
        );

        let mut collection = PartialCollection::new();
        collection.record("cpu", cpu);
        collection.record("memory", memory);
        collection.record("disk", disk);
        collection.record("network", network);
        collection.record("uptime", uptime);

        trace!(
            "wmi collection from {address}: {} samples",
            collection.samples().len()
        );
        collection.finish(address)
    }
}
