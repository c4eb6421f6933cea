//! SNMP v2c collector for network-class devices
//!
//! The agent is probed with a sysDescr GET first; if that fails the device
//! is treated as unreachable. The remaining sub-collections are best effort:
//! OIDs the agent does not implement (vendor tables, HOST-RESOURCES on
//! routers) yield no samples, transport errors count as failures. The `snmp`
//! crate cannot decode noSuchObject/noSuchInstance/endOfMibView bindings and
//! returns a response without varbinds for them, which reads as
//! `SnmpValue::Missing`.
//!
//! The `snmp` crate session is blocking, so a whole collection runs on the
//! blocking pool. The worker stops issuing requests as soon as the calling
//! future is dropped or the collection budget runs out, and no single
//! request waits longer than the budget left.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snmp::{SyncSession, Value};
use tracing::debug;

use crate::MetricSample;
use crate::config::SnmpConfig;

use super::{
    CollectError, CollectResult, CollectorStrategy, PartialCollection, resolve_host, tagged_sample,
};

const SOURCE: &str = "snmp";

const SYS_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
const SYS_UPTIME: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 3, 0];

/// cpmCPUTotal5minRev.1 (Cisco)
const CISCO_CPU: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 109, 1, 1, 1, 1, 7, 1];
/// ciscoEnvMonTemperatureStatusValue (Cisco)
const CISCO_TEMPERATURE: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 13, 1, 3, 1, 3];

const HR_MEMORY_SIZE: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 2, 2, 0];
const HR_MEMORY_USED: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 2, 3, 1, 6, 1];

const IF_IN_OCTETS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 10];
const IF_OUT_OCTETS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 16];
const IF_OPER_STATUS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 8];

const HR_STORAGE_TYPE: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 2, 3, 1, 2];
const HR_STORAGE_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 2, 3, 1, 3];
const HR_STORAGE_UNITS: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 2, 3, 1, 4];
const HR_STORAGE_SIZE: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 2, 3, 1, 5];
const HR_STORAGE_USED: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 2, 3, 1, 6];
const HR_STORAGE_FIXED_DISK: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 2, 1, 4];

/// Interfaces, sensors and disks reported per device
const MAX_TABLE_ENTRIES: usize = 5;

/// Upper bound of rows read by a single table walk
const MAX_WALK_ROWS: usize = 256;

const IF_OPER_UP: i64 = 1;

/// Owned copy of a varbind value
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Integer(i64),
    Unsigned(u64),
    Text(String),
    Oid(Vec<u32>),
    /// Null binding, or no binding at all
    Missing,
    Other,
}

impl SnmpValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            SnmpValue::Integer(v) => Some(*v as f64),
            SnmpValue::Unsigned(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl From<&Value<'_>> for SnmpValue {
    fn from(value: &Value<'_>) -> Self {
        match value {
            Value::Integer(v) => SnmpValue::Integer(*v),
            Value::Counter32(v) | Value::Unsigned32(v) | Value::Timeticks(v) => {
                SnmpValue::Unsigned(u64::from(*v))
            }
            Value::Counter64(v) => SnmpValue::Unsigned(*v),
            Value::OctetString(bytes) => SnmpValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            Value::ObjectIdentifier(oid) => SnmpValue::Oid(parse_oid(&oid.to_string())),
            Value::Null => SnmpValue::Missing,
            _ => SnmpValue::Other,
        }
    }
}

fn parse_oid(dotted: &str) -> Vec<u32> {
    dotted
        .trim_start_matches('.')
        .split('.')
        .filter_map(|part| part.parse().ok())
        .collect()
}

fn format_oid(oid: &[u32]) -> String {
    oid.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

fn child(prefix: &[u32], index: &[u32]) -> Vec<u32> {
    let mut oid = prefix.to_vec();
    oid.extend_from_slice(index);
    oid
}

/// Minimal blocking SNMP operations the collector needs
pub trait SnmpAgent {
    /// Value bound to `oid`; absent objects are `SnmpValue::Missing`
    fn get(&mut self, oid: &[u32]) -> CollectResult<SnmpValue>;

    /// First binding lexicographically after `oid`, `None` at the end of the MIB
    fn get_next(&mut self, oid: &[u32]) -> CollectResult<Option<(Vec<u32>, SnmpValue)>>;
}

/// Set when the future awaiting a blocking collection is dropped
#[derive(Debug, Clone, Default)]
struct AbandonFlag(Arc<AtomicBool>);

impl AbandonFlag {
    fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Raises its flag on drop, whether the collection finished or not
struct AbandonOnDrop(AbandonFlag);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.0.store(true, Ordering::Release);
    }
}

/// `SnmpAgent` over a `snmp::SyncSession`
struct SessionAgent {
    target: SocketAddr,
    community: Vec<u8>,
    timeout: Duration,
    retries: u32,
    deadline: Instant,
    abandoned: AbandonFlag,
    /// Open session and the read timeout it was opened with
    session: Option<(SyncSession, Duration)>,
}

impl SessionAgent {
    fn new(
        target: SocketAddr,
        config: &SnmpConfig,
        deadline: Instant,
        abandoned: AbandonFlag,
    ) -> Self {
        Self {
            target,
            community: config.community.as_bytes().to_vec(),
            timeout: config.timeout,
            retries: config.retries,
            deadline,
            abandoned,
            session: None,
        }
    }

    /// Session whose read timeout does not outlast the deadline
    fn session(&mut self) -> CollectResult<&mut SyncSession> {
        if self.abandoned.is_set() {
            return Err(CollectError::Protocol("SNMP collection abandoned".to_string()));
        }

        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CollectError::Timeout(self.timeout));
        }

        let timeout = self.timeout.min(remaining);
        let reusable = matches!(&self.session, Some((_, opened)) if *opened <= timeout);
        if !reusable {
            let session = SyncSession::new(
                self.target,
                &self.community,
                Some(timeout),
                rand::random::<u16>().into(),
            )
            .map_err(|e| CollectError::Protocol(format!("failed to open SNMP session: {e}")))?;
            self.session = Some((session, timeout));
        }

        match self.session.as_mut() {
            Some((session, _)) => Ok(session),
            None => Err(CollectError::Protocol("no SNMP session".to_string())),
        }
    }

    fn request(
        &mut self,
        oid: &[u32],
        next: bool,
    ) -> CollectResult<Option<(Vec<u32>, SnmpValue)>> {
        let mut last_error = String::new();

        for _ in 0..=self.retries {
            let session = self.session()?;
            let response = if next {
                session.getnext(oid)
            } else {
                session.get(oid)
            };

            match response {
                Ok(mut pdu) => {
                    if pdu.error_status != 0 {
                        return Err(CollectError::Protocol(format!(
                            "SNMP error status {} for {}",
                            pdu.error_status,
                            format_oid(oid)
                        )));
                    }
                    return Ok(pdu
                        .varbinds
                        .next()
                        .map(|(name, value)| (parse_oid(&name.to_string()), SnmpValue::from(&value))));
                }
                Err(e) => last_error = format!("{e:?}"),
            }
        }

        Err(CollectError::Protocol(format!(
            "SNMP request for {} failed: {last_error}",
            format_oid(oid)
        )))
    }
}

impl SnmpAgent for SessionAgent {
    fn get(&mut self, oid: &[u32]) -> CollectResult<SnmpValue> {
        Ok(self
            .request(oid, false)?
            .map(|(_, value)| value)
            .unwrap_or(SnmpValue::Missing))
    }

    fn get_next(&mut self, oid: &[u32]) -> CollectResult<Option<(Vec<u32>, SnmpValue)>> {
        self.request(oid, true)
    }
}

/// Rows of the table under `prefix`, in OID order
fn walk(
    agent: &mut dyn SnmpAgent,
    prefix: &[u32],
    limit: usize,
) -> CollectResult<Vec<(Vec<u32>, SnmpValue)>> {
    let mut rows = Vec::new();
    let mut current = prefix.to_vec();

    while rows.len() < limit {
        match agent.get_next(&current)? {
            Some((oid, value))
                if oid.starts_with(prefix) && oid > current && value != SnmpValue::Missing =>
            {
                current = oid.clone();
                rows.push((oid, value));
            }
            _ => break,
        }
    }

    Ok(rows)
}

fn system_samples(agent: &mut dyn SnmpAgent, ts: DateTime<Utc>) -> CollectResult<Vec<MetricSample>> {
    let Some(ticks) = agent.get(SYS_UPTIME)?.as_f64() else {
        return Ok(Vec::new());
    };

    Ok(vec![
        tagged_sample("system_uptime", ts, "system", SOURCE).field("uptime_seconds", ticks / 100.0),
    ])
}

fn cpu_samples(agent: &mut dyn SnmpAgent, ts: DateTime<Utc>) -> CollectResult<Vec<MetricSample>> {
    let Some(percent) = agent.get(CISCO_CPU)?.as_f64() else {
        return Ok(Vec::new());
    };

    Ok(vec![
        tagged_sample("cpu_utilization", ts, "cpu", SOURCE).field("cpu_percent", percent),
    ])
}

fn memory_samples(agent: &mut dyn SnmpAgent, ts: DateTime<Utc>) -> CollectResult<Vec<MetricSample>> {
    let total = agent.get(HR_MEMORY_SIZE)?.as_f64().unwrap_or(0.0);
    let used = agent.get(HR_MEMORY_USED)?.as_f64().unwrap_or(0.0);

    if total <= 0.0 {
        return Ok(Vec::new());
    }

    Ok(vec![
        tagged_sample("memory_utilization", ts, "memory", SOURCE)
            .field("memory_percent", used / total * 100.0)
            .field("memory_total", total)
            .field("memory_used", used),
    ])
}

fn interface_samples(
    agent: &mut dyn SnmpAgent,
    ts: DateTime<Utc>,
) -> CollectResult<Vec<MetricSample>> {
    let statuses = walk(agent, IF_OPER_STATUS, MAX_WALK_ROWS)?;

    let mut samples = Vec::new();
    for (oid, status) in statuses {
        if samples.len() >= MAX_TABLE_ENTRIES {
            break;
        }
        if status != SnmpValue::Integer(IF_OPER_UP) {
            continue;
        }

        let index = &oid[IF_OPER_STATUS.len()..];
        match interface_counters(agent, index) {
            Ok((bytes_in, bytes_out)) => samples.push(
                tagged_sample("network_traffic", ts, "network", SOURCE)
                    .field("bytes_in", bytes_in.as_f64().unwrap_or(0.0))
                    .field("bytes_out", bytes_out.as_f64().unwrap_or(0.0))
                    .tag("interface_index", format_oid(index)),
            ),
            Err(e) => debug!("skipping interface {}: {e}", format_oid(index)),
        }
    }

    Ok(samples)
}

fn interface_counters(
    agent: &mut dyn SnmpAgent,
    index: &[u32],
) -> CollectResult<(SnmpValue, SnmpValue)> {
    let bytes_in = agent.get(&child(IF_IN_OCTETS, index))?;
    let bytes_out = agent.get(&child(IF_OUT_OCTETS, index))?;
    Ok((bytes_in, bytes_out))
}

fn temperature_samples(
    agent: &mut dyn SnmpAgent,
    ts: DateTime<Utc>,
) -> CollectResult<Vec<MetricSample>> {
    let sensors = walk(agent, CISCO_TEMPERATURE, MAX_TABLE_ENTRIES)?;

    Ok(sensors
        .iter()
        .enumerate()
        .filter_map(|(i, (_, value))| {
            value.as_f64().map(|celsius| {
                tagged_sample("temperature", ts, "temperature", SOURCE)
                    .field("temperature_celsius", celsius)
                    .tag("sensor_id", (i + 1).to_string())
            })
        })
        .collect())
}

fn storage_samples(
    agent: &mut dyn SnmpAgent,
    ts: DateTime<Utc>,
) -> CollectResult<Vec<MetricSample>> {
    let types = walk(agent, HR_STORAGE_TYPE, MAX_WALK_ROWS)?;

    let mut samples = Vec::new();
    for (oid, storage_type) in types {
        if samples.len() >= MAX_TABLE_ENTRIES {
            break;
        }
        if storage_type != SnmpValue::Oid(HR_STORAGE_FIXED_DISK.to_vec()) {
            continue;
        }

        let index = &oid[HR_STORAGE_TYPE.len()..];
        match storage_entry(agent, index, ts) {
            Ok(Some(sample)) => samples.push(sample),
            Ok(None) => {}
            Err(e) => debug!("skipping storage {}: {e}", format_oid(index)),
        }
    }

    Ok(samples)
}

fn storage_entry(
    agent: &mut dyn SnmpAgent,
    index: &[u32],
    ts: DateTime<Utc>,
) -> CollectResult<Option<MetricSample>> {
    let units = agent
        .get(&child(HR_STORAGE_UNITS, index))?
        .as_f64()
        .filter(|u| *u > 0.0)
        .unwrap_or(1.0);
    let size = agent.get(&child(HR_STORAGE_SIZE, index))?.as_f64().unwrap_or(0.0) * units;
    let used = agent.get(&child(HR_STORAGE_USED, index))?.as_f64().unwrap_or(0.0) * units;
    let description = match agent.get(&child(HR_STORAGE_DESCR, index))? {
        SnmpValue::Text(text) => text,
        _ => String::new(),
    };

    if size <= 0.0 {
        return Ok(None);
    }

    Ok(Some(
        tagged_sample("disk_utilization", ts, "disk", SOURCE)
            .field("disk_percent", used / size * 100.0)
            .field("disk_total", size)
            .field("disk_used", used)
            .field("disk_free", size - used)
            .tag("storage_index", format_oid(index))
            .tag("description", description),
    ))
}

/// Probe the agent, then gather every sub-collection best effort
pub fn collect_from_agent(
    agent: &mut dyn SnmpAgent,
    address: &str,
    ts: DateTime<Utc>,
) -> CollectResult<Vec<MetricSample>> {
    agent
        .get(SYS_DESCR)
        .map_err(|e| CollectError::Unreachable {
            address: address.to_string(),
            reason: format!("SNMP agent not responding: {e}"),
        })?;

    let mut collection = PartialCollection::new();
    collection.record("system", system_samples(agent, ts));
    collection.record("cpu", cpu_samples(agent, ts));
    collection.record("memory", memory_samples(agent, ts));
    collection.record("interfaces", interface_samples(agent, ts));
    collection.record("temperature", temperature_samples(agent, ts));
    collection.record("storage", storage_samples(agent, ts));
    collection.finish(address)
}

/// Default upper bound of a whole collection when none is configured
const DEFAULT_BUDGET: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SnmpCollector {
    config: SnmpConfig,
    budget: Duration,
}

impl SnmpCollector {
    pub fn new(config: SnmpConfig) -> Self {
        Self {
            config,
            budget: DEFAULT_BUDGET,
        }
    }

    /// Stop issuing requests once `budget` has elapsed since `collect` started
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }
}

#[async_trait]
impl CollectorStrategy for SnmpCollector {
    async fn collect(&self, address: &str) -> CollectResult<Vec<MetricSample>> {
        let ip = resolve_host(address).await?;
        let target = SocketAddr::new(ip, self.config.port);
        let deadline = Instant::now() + self.budget;
        let abandoned = AbandonFlag::default();
        let _guard = AbandonOnDrop(abandoned.clone());

        let mut agent = SessionAgent::new(target, &self.config, deadline, abandoned);
        let address = address.to_string();

        tokio::task::spawn_blocking(move || collect_from_agent(&mut agent, &address, Utc::now()))
            .await
            .map_err(|e| CollectError::Protocol(format!("SNMP worker failed: {e}")))?
    }
}
