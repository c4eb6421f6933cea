//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fleet_collector::collectors::{CollectError, CollectResult, CollectorStrategy, StrategySet};
use fleet_collector::inventory::{Inventory, InventoryError, StaticInventory};
use fleet_collector::orchestrator::{Orchestrator, OrchestratorSettings};
use fleet_collector::sink::{MemorySink, RetryPolicy, SinkWriter};
use fleet_collector::{Device, MetricSample};
use tokio::sync::Mutex;

pub fn create_device(id: &str, address: &str, device_type: &str) -> Device {
    Device {
        id: id.to_string(),
        address: address.to_string(),
        hostname: format!("{id}.example.net"),
        mac_address: None,
        device_type: device_type.to_string(),
    }
}

pub fn create_test_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        status_poll_interval: Duration::from_millis(100),
        metrics_poll_interval: Duration::from_millis(100),
        device_timeout: Duration::from_millis(500),
        collection_timeout: Duration::from_millis(500),
        max_concurrent_devices: 16,
    }
}

/// Writer over `sink` with millisecond backoff
pub fn create_test_writer(sink: Arc<MemorySink>) -> SinkWriter {
    SinkWriter::with_policy(
        sink,
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
    )
}

/// Strategy answering from a fixed set of reachable addresses
pub struct MockStrategy {
    name: &'static str,
    reachable: Mutex<HashSet<String>>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockStrategy {
    pub fn new(name: &'static str, reachable: &[&str]) -> Arc<Self> {
        Self::with_delay(name, reachable, Duration::ZERO)
    }

    pub fn with_delay(name: &'static str, reachable: &[&str], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            reachable: Mutex::new(reachable.iter().map(|a| a.to_string()).collect()),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub async fn set_reachable(&self, address: &str, reachable: bool) {
        let mut set = self.reachable.lock().await;
        if reachable {
            set.insert(address.to_string());
        } else {
            set.remove(address);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CollectorStrategy for MockStrategy {
    async fn collect(&self, address: &str) -> CollectResult<Vec<MetricSample>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        let reachable = self.reachable.lock().await.contains(address);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if reachable {
            Ok(vec![
                MetricSample::new(format!("{}_probe", self.name), Utc::now())
                    .field("value", 1i64)
                    .tag("source", self.name),
            ])
        } else {
            Err(CollectError::Unreachable {
                address: address.to_string(),
                reason: "host did not answer".to_string(),
            })
        }
    }
}

/// Inventory that fails until `recover` is called
pub struct FlakyInventory {
    devices: Vec<Device>,
    healthy: Mutex<bool>,
}

impl FlakyInventory {
    pub fn new(devices: Vec<Device>) -> Arc<Self> {
        Arc::new(Self {
            devices,
            healthy: Mutex::new(false),
        })
    }

    pub async fn recover(&self) {
        *self.healthy.lock().await = true;
    }
}

#[async_trait]
impl Inventory for FlakyInventory {
    async fn list_devices(&self) -> Result<Vec<Device>, InventoryError> {
        if *self.healthy.lock().await {
            Ok(self.devices.clone())
        } else {
            Err(InventoryError::Connection("database is starting up".to_string()))
        }
    }
}

pub struct Mocks {
    pub ping: Arc<MockStrategy>,
    pub snmp: Arc<MockStrategy>,
    pub ssh: Arc<MockStrategy>,
    pub wmi: Arc<MockStrategy>,
}

impl Mocks {
    pub fn all_reachable(addresses: &[&str]) -> Self {
        Self {
            ping: MockStrategy::new("ping", addresses),
            snmp: MockStrategy::new("snmp", addresses),
            ssh: MockStrategy::new("ssh", addresses),
            wmi: MockStrategy::new("wmi", addresses),
        }
    }

    pub fn strategies(&self) -> StrategySet {
        StrategySet::new(
            self.ping.clone(),
            self.snmp.clone(),
            self.ssh.clone(),
            self.wmi.clone(),
        )
    }
}

pub fn create_orchestrator(
    devices: Vec<Device>,
    mocks: &Mocks,
    sink: Arc<MemorySink>,
) -> Orchestrator {
    Orchestrator::new(
        create_test_settings(),
        Arc::new(StaticInventory::new(devices)),
        mocks.strategies(),
        create_test_writer(sink),
    )
}
