//! SSH collector for Linux/Unix hosts
//!
//! Runs a handful of standard commands on the host and parses their output.
//! Commands run concurrently; each one is an independent sub-collection.
//!
//! ```text
//! cpu      top -bn1           100 - idle
//! memory   free -m            Mem: total/used (MiB)
//! disk     df -h /            size/used/avail/use% of the root filesystem
//! network  cat /proc/net/dev  rx/tx bytes of the first eth0/ens/enp interface
//! uptime   cat /proc/uptime   seconds since boot
//! ```

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::process::Command;
use tracing::trace;

use crate::MetricSample;
use crate::config::SshConfig;

use super::{CollectError, CollectResult, CollectorStrategy, PartialCollection, tagged_sample};

const SOURCE: &str = "ssh";

/// Interface name prefixes considered the primary interface
const PRIMARY_INTERFACES: &[&str] = &["eth0", "ens", "enp"];

type Parser = fn(&str, DateTime<Utc>) -> CollectResult<Vec<MetricSample>>;

const COMMANDS: &[(&str, &str, Parser)] = &[
    ("cpu", "top -bn1", parse_cpu),
    ("memory", "free -m", parse_memory),
    ("disk", "df -h /", parse_disk),
    ("network", "cat /proc/net/dev", parse_network),
    ("uptime", "cat /proc/uptime", parse_uptime),
];

/// Executes a command on a remote host and returns its trimmed stdout
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn run(&self, address: &str, command: &str) -> CollectResult<String>;
}

/// `RemoteShell` using the system OpenSSH client
///
/// Key authentication runs `ssh` in batch mode; password authentication goes
/// through `sshpass -e` with the password passed in the environment.
#[derive(Debug, Clone)]
pub struct OpenSshShell {
    config: SshConfig,
}

impl OpenSshShell {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    fn command(&self, address: &str, remote: &str) -> CollectResult<Command> {
        let mut cmd = match (&self.config.key_file, &self.config.password) {
            (Some(key_file), _) => {
                let mut cmd = Command::new("ssh");
                cmd.arg("-i")
                    .arg(key_file)
                    .args(["-o", "BatchMode=yes"]);
                cmd
            }
            (None, Some(password)) => {
                let mut cmd = Command::new("sshpass");
                cmd.args(["-e", "ssh"])
                    .env("SSHPASS", password)
                    .args(["-o", "PubkeyAuthentication=no"]);
                cmd
            }
            (None, None) => {
                return Err(CollectError::Config(
                    "no SSH authentication method configured".to_string(),
                ));
            }
        };

        let destination = if self.config.username.is_empty() {
            address.to_string()
        } else {
            format!("{}@{address}", self.config.username)
        };

        cmd.args(["-o", "StrictHostKeyChecking=accept-new"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.config.timeout.as_secs().max(1)))
            .arg("-p")
            .arg(self.config.port.to_string())
            .arg(destination)
            .arg(remote)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        Ok(cmd)
    }
}

#[async_trait]
impl RemoteShell for OpenSshShell {
    async fn run(&self, address: &str, command: &str) -> CollectResult<String> {
        let mut cmd = self.command(address, command)?;

        let output = tokio::time::timeout(self.config.timeout, cmd.output())
            .await
            .map_err(|_| CollectError::Timeout(self.config.timeout))?
            .map_err(|e| CollectError::Protocol(format!("failed to run ssh: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollectError::Protocol(format!(
                "command '{command}' failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn parse_f64(value: &str, what: &str) -> CollectResult<f64> {
    value
        .trim()
        .parse()
        .map_err(|_| CollectError::Parse(format!("invalid {what}: {value:?}")))
}

/// CPU utilization from the `Cpu(s)` line of `top -bn1`
pub fn parse_cpu(output: &str, ts: DateTime<Utc>) -> CollectResult<Vec<MetricSample>> {
    let line = output
        .lines()
        .find(|line| line.contains("Cpu(s)"))
        .ok_or_else(|| CollectError::Parse("no Cpu(s) line in top output".to_string()))?;

    let (_, values) = line
        .split_once(':')
        .ok_or_else(|| CollectError::Parse(format!("malformed cpu line: {line:?}")))?;

    // "3.1 us, 95.6 id" (procps 3.3) or "3.1%us, 95.6%id" (procps 3.2)
    let idle = values
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            let (value, label) = part
                .split_once('%')
                .or_else(|| part.split_once(char::is_whitespace))?;
            (label.trim() == "id").then_some(value.trim())
        })
        .next()
        .ok_or_else(|| CollectError::Parse(format!("no idle value in {line:?}")))?;

    let idle = parse_f64(idle, "idle percentage")?;

    Ok(vec![
        tagged_sample("cpu_utilization", ts, "cpu", SOURCE).field("cpu_percent", 100.0 - idle),
    ])
}

/// Memory utilization from the `Mem:` row of `free -m`
pub fn parse_memory(output: &str, ts: DateTime<Utc>) -> CollectResult<Vec<MetricSample>> {
    let fields: Vec<&str> = output
        .lines()
        .find(|line| line.starts_with("Mem:"))
        .ok_or_else(|| CollectError::Parse(format!("no Mem: row in {output:?}")))?
        .split_whitespace()
        .collect();

    if fields.len() < 4 {
        return Err(CollectError::Parse(format!(
            "unexpected memory output format: {}",
            fields.join(" ")
        )));
    }

    let total = parse_f64(fields[1], "total memory")?;
    let used = parse_f64(fields[2], "used memory")?;
    if total <= 0.0 {
        return Err(CollectError::Parse("total memory is zero".to_string()));
    }

    Ok(vec![
        tagged_sample("memory_utilization", ts, "memory", SOURCE)
            .field("memory_percent", used / total * 100.0)
            .field("memory_total", total)
            .field("memory_used", used),
    ])
}

/// Root filesystem usage from `df -h /`
pub fn parse_disk(output: &str, ts: DateTime<Utc>) -> CollectResult<Vec<MetricSample>> {
    // long device names wrap onto their own line, so read the row from the end
    let fields: Vec<&str> = output.lines().skip(1).flat_map(str::split_whitespace).collect();

    if fields.len() < 5 {
        return Err(CollectError::Parse(format!(
            "unexpected disk output format: {output:?}"
        )));
    }

    let n = fields.len();
    let (size, used, avail, percent) = (fields[n - 5], fields[n - 4], fields[n - 3], fields[n - 2]);
    let percent = parse_f64(percent.trim_end_matches('%'), "disk usage percentage")?;

    Ok(vec![
        tagged_sample("disk_utilization", ts, "disk", SOURCE)
            .field("disk_percent", percent)
            .field("disk_total", size)
            .field("disk_used", used)
            .field("disk_free", avail)
            .tag("filesystem", "/"),
    ])
}

/// Byte counters of the primary interface from `/proc/net/dev`.
///
/// A host without a matching interface yields no sample.
pub fn parse_network(output: &str, ts: DateTime<Utc>) -> CollectResult<Vec<MetricSample>> {
    let Some((name, counters)) = output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, counters)| (name.trim(), counters))
        .find(|(name, _)| PRIMARY_INTERFACES.iter().any(|p| name.starts_with(p)))
    else {
        return Ok(Vec::new());
    };

    let fields: Vec<&str> = counters.split_whitespace().collect();
    if fields.len() < 9 {
        return Err(CollectError::Parse(format!(
            "unexpected network output format for {name}: {counters:?}"
        )));
    }

    let bytes_in = parse_f64(fields[0], "received bytes")?;
    let bytes_out = parse_f64(fields[8], "transmitted bytes")?;

    Ok(vec![
        tagged_sample("network_traffic", ts, "network", SOURCE)
            .field("bytes_in", bytes_in)
            .field("bytes_out", bytes_out)
            .tag("interface", name),
    ])
}

/// Seconds since boot from `/proc/uptime`
pub fn parse_uptime(output: &str, ts: DateTime<Utc>) -> CollectResult<Vec<MetricSample>> {
    let seconds = output
        .split_whitespace()
        .next()
        .ok_or_else(|| CollectError::Parse("empty uptime output".to_string()))?;

    Ok(vec![
        tagged_sample("system_uptime", ts, "system", SOURCE)
            .field("uptime_seconds", parse_f64(seconds, "uptime")?),
    ])
}

pub struct SshCollector {
    shell: Arc<dyn RemoteShell>,
}

impl SshCollector {
    pub fn new(shell: Arc<dyn RemoteShell>) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl CollectorStrategy for SshCollector {
    async fn collect(&self, address: &str) -> CollectResult<Vec<MetricSample>> {
        let ts = Utc::now();

        let outputs = join_all(
            COMMANDS
                .iter()
                .map(|(_, command, _)| self.shell.run(address, command)),
        )
        .await;

        let mut collection = PartialCollection::new();
        for ((label, _, parse), output) in COMMANDS.iter().zip(outputs) {
            trace!("{label} output from {address}: {output:?}");
            collection.record(label, output.and_then(|text| parse(&text, ts)));
        }

        collection.finish(address)
    }
}
