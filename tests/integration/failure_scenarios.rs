//! Failure handling: inventory outages, sink outages, slow devices, shutdown

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fleet_collector::MetricSample;
use fleet_collector::orchestrator::Orchestrator;
use fleet_collector::sink::{MemorySink, MetricsSink, RetryPolicy, SinkError, SinkResult, SinkWriter};
use fleet_collector::inventory::StaticInventory;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

/// Sink that rejects every write
struct DownSink;

#[async_trait]
impl MetricsSink for DownSink {
    async fn write_points(&self, _samples: &[MetricSample]) -> SinkResult<()> {
        Err(SinkError::Request("connection refused".to_string()))
    }

    async fn health_check(&self) -> SinkResult<()> {
        Err(SinkError::Unhealthy("down".to_string()))
    }

    async fn close(&self) -> SinkResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_inventory_outage_skips_tick_and_recovers() {
    let inventory = FlakyInventory::new(vec![create_device("r1", "10.1.0.1", "router")]);
    let mocks = Mocks::all_reachable(&["10.1.0.1"]);
    let sink = Arc::new(MemorySink::new(64));
    let orchestrator = Orchestrator::new(
        create_test_settings(),
        inventory.clone(),
        mocks.strategies(),
        create_test_writer(sink.clone()),
    );
    let cancel = CancellationToken::new();

    let summary = orchestrator.run_status_tick(&cancel).await;
    assert!(summary.inventory_failed);
    assert_eq!(mocks.ping.calls(), 0);
    assert!(orchestrator.status_gate().is_empty().await);
    assert_eq!(sink.write_calls(), 0);

    inventory.recover().await;

    let summary = orchestrator.run_status_tick(&cancel).await;
    assert!(!summary.inventory_failed);
    assert_eq!(summary.succeeded, 1);
    assert!(orchestrator.status_gate().is_online("r1").await);
}

#[tokio::test]
async fn test_sink_outage_does_not_affect_status_tracking() {
    let mocks = Mocks::all_reachable(&["10.1.1.1"]);
    let orchestrator = Orchestrator::new(
        create_test_settings(),
        Arc::new(StaticInventory::new(vec![create_device("r1", "10.1.1.1", "router")])),
        mocks.strategies(),
        SinkWriter::with_policy(
            Arc::new(DownSink),
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
        ),
    );
    let cancel = CancellationToken::new();

    let status = orchestrator.run_status_tick(&cancel).await;
    assert_eq!(status.succeeded, 1);
    assert_eq!(status.write_failures, 1);
    assert!(orchestrator.status_gate().is_online("r1").await);

    // write failures never demote a device
    let metrics = orchestrator.run_metrics_tick(&cancel).await;
    assert_eq!(metrics.succeeded, 1);
    assert_eq!(metrics.write_failures, 1);
    assert!(orchestrator.status_gate().is_online("r1").await);
}

#[tokio::test]
async fn test_slow_device_does_not_hold_back_others() {
    let mocks = Mocks {
        ping: MockStrategy::with_delay("ping", &["10.1.2.1", "10.1.2.2"], Duration::from_millis(50)),
        snmp: MockStrategy::new("snmp", &[]),
        ssh: MockStrategy::new("ssh", &[]),
        wmi: MockStrategy::new("wmi", &[]),
    };
    let devices = (1..=10)
        .map(|i| create_device(&format!("d{i}"), &format!("10.1.2.{i}"), "router"))
        .collect();
    let sink = Arc::new(MemorySink::new(256));
    let orchestrator = create_orchestrator(devices, &mocks, sink);

    let start = Instant::now();
    let summary = orchestrator.run_status_tick(&CancellationToken::new()).await;

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 8);
    // checks ran in parallel rather than back to back
    assert!(start.elapsed() < Duration::from_millis(450));
}

#[tokio::test]
async fn test_hung_device_is_bounded_by_timeout() {
    let mocks = Mocks {
        ping: MockStrategy::with_delay("ping", &["10.1.3.1"], Duration::from_secs(30)),
        snmp: MockStrategy::new("snmp", &[]),
        ssh: MockStrategy::new("ssh", &[]),
        wmi: MockStrategy::new("wmi", &[]),
    };
    let sink = Arc::new(MemorySink::new(64));
    let orchestrator = create_orchestrator(
        vec![create_device("hung", "10.1.3.1", "router")],
        &mocks,
        sink,
    );

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run_status_tick(&CancellationToken::new()),
    )
    .await
    .expect("tick was not bounded by the device timeout");

    assert_eq!(summary.failed, 1);
    let status = orchestrator.status_gate().get("hung").await.unwrap();
    assert!(!status.is_online());
}

#[tokio::test]
async fn test_shutdown_abandons_in_flight_devices() {
    let mocks = Mocks {
        ping: MockStrategy::with_delay("ping", &["10.1.4.1"], Duration::from_secs(30)),
        snmp: MockStrategy::new("snmp", &[]),
        ssh: MockStrategy::new("ssh", &[]),
        wmi: MockStrategy::new("wmi", &[]),
    };
    let sink = Arc::new(MemorySink::new(64));
    let mut settings = create_test_settings();
    settings.device_timeout = Duration::from_secs(60);
    let orchestrator = Orchestrator::new(
        settings,
        Arc::new(StaticInventory::new(vec![create_device("slow", "10.1.4.1", "router")])),
        mocks.strategies(),
        create_test_writer(sink.clone()),
    );

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let summary = orchestrator.run_status_tick(&cancel).await;

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(summary.abandoned, 1);
    // abandoned checks leave no trace
    assert!(orchestrator.status_gate().get("slow").await.is_none());
    assert_eq!(sink.write_calls(), 0);
}

#[tokio::test]
async fn test_start_drains_and_returns_on_shutdown() {
    let mocks = Mocks::all_reachable(&["10.1.5.1"]);
    let sink = Arc::new(MemorySink::new(1024));
    let orchestrator = create_orchestrator(
        vec![create_device("r1", "10.1.5.1", "router")],
        &mocks,
        sink.clone(),
    );

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(350)).await;
        canceller.cancel();
    });

    tokio::time::timeout(Duration::from_secs(5), orchestrator.start(cancel))
        .await
        .expect("orchestrator did not stop after shutdown");

    assert!(mocks.ping.calls() >= 2);
    assert!(orchestrator.status_gate().is_online("r1").await);
    assert!(!sink.samples_named("device_status").await.is_empty());
}
