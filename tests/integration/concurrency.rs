//! Concurrency tests
//!
//! - The device concurrency cap holds within and across loops
//! - Concurrent readers of the status gate see consistent entries

use std::sync::Arc;
use std::time::Duration;

use fleet_collector::DeviceState;
use fleet_collector::orchestrator::Orchestrator;
use fleet_collector::inventory::StaticInventory;
use fleet_collector::sink::MemorySink;
use fleet_collector::status::StatusGate;
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

fn many_devices(count: usize, device_type: &str) -> (Vec<fleet_collector::Device>, Vec<String>) {
    let devices: Vec<_> = (0..count)
        .map(|i| create_device(&format!("dev-{i}"), &format!("10.2.{}.{}", i / 250, i % 250 + 1), device_type))
        .collect();
    let addresses = devices.iter().map(|d| d.address.clone()).collect();
    (devices, addresses)
}

#[tokio::test]
async fn test_concurrency_cap_is_respected() {
    let (devices, addresses) = many_devices(20, "router");
    let addresses: Vec<&str> = addresses.iter().map(String::as_str).collect();
    let mocks = Mocks {
        ping: MockStrategy::with_delay("ping", &addresses, Duration::from_millis(20)),
        snmp: MockStrategy::new("snmp", &addresses),
        ssh: MockStrategy::new("ssh", &[]),
        wmi: MockStrategy::new("wmi", &[]),
    };
    let mut settings = create_test_settings();
    settings.max_concurrent_devices = 3;
    let orchestrator = Orchestrator::new(
        settings,
        Arc::new(StaticInventory::new(devices)),
        mocks.strategies(),
        create_test_writer(Arc::new(MemorySink::new(1024))),
    );

    let summary = orchestrator.run_status_tick(&CancellationToken::new()).await;

    assert_eq!(summary.succeeded, 20);
    assert_eq!(mocks.ping.calls(), 20);
    assert!(mocks.ping.max_in_flight() <= 3);
    assert!(mocks.ping.max_in_flight() >= 2);
}

#[tokio::test]
async fn test_cap_is_shared_between_loops() {
    let (devices, addresses) = many_devices(12, "linux");
    let addresses: Vec<&str> = addresses.iter().map(String::as_str).collect();
    let mocks = Mocks {
        ping: MockStrategy::with_delay("ping", &addresses, Duration::from_millis(20)),
        snmp: MockStrategy::new("snmp", &[]),
        ssh: MockStrategy::with_delay("ssh", &addresses, Duration::from_millis(20)),
        wmi: MockStrategy::new("wmi", &[]),
    };
    let mut settings = create_test_settings();
    settings.max_concurrent_devices = 4;
    let orchestrator = Arc::new(Orchestrator::new(
        settings,
        Arc::new(StaticInventory::new(devices)),
        mocks.strategies(),
        create_test_writer(Arc::new(MemorySink::new(1024))),
    ));
    let cancel = CancellationToken::new();

    orchestrator.run_status_tick(&cancel).await;

    let (status, metrics) = tokio::join!(
        orchestrator.run_status_tick(&cancel),
        orchestrator.run_metrics_tick(&cancel)
    );

    assert_eq!(status.succeeded, 12);
    assert_eq!(metrics.succeeded, 12);
    assert!(mocks.ping.max_in_flight() + mocks.ssh.max_in_flight() <= 8);
    assert!(mocks.ssh.max_in_flight() <= 4);
}

#[tokio::test]
async fn test_concurrent_gate_readers_and_writers() {
    let gate = StatusGate::new();
    let mut handles = vec![];

    for i in 0..10 {
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("dev-{}", i % 3);
            for round in 0..50 {
                if round % 2 == 0 {
                    gate.mark_online(&id).await;
                } else {
                    gate.mark_offline(&id, "probe failed").await;
                }
                if let Some(status) = gate.get(&id).await {
                    // an entry is never half-updated
                    match status.state {
                        DeviceState::Online => assert!(status.error.is_empty()),
                        DeviceState::Offline => assert_eq!(status.error, "probe failed"),
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(gate.len().await, 3);
    let (online, offline) = gate.counts().await;
    assert_eq!(online + offline, 3);
}
