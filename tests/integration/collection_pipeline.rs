//! End-to-end tick behavior: status gating, strategy dispatch, sample tagging

use std::sync::Arc;

use fleet_collector::sink::MemorySink;
use fleet_collector::{DEVICE_ID_TAG, DEVICE_STATUS_MEASUREMENT, DeviceState, FieldValue, HOSTNAME_TAG};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

#[tokio::test]
async fn test_status_then_metrics_dispatches_by_device_type() {
    let devices = vec![
        create_device("r1", "10.0.0.1", "router"),
        create_device("l1", "10.0.0.2", "linux"),
        create_device("w1", "10.0.0.3", "windows"),
    ];
    let mocks = Mocks::all_reachable(&["10.0.0.1", "10.0.0.2"]);
    let sink = Arc::new(MemorySink::new(1024));
    let orchestrator = create_orchestrator(devices, &mocks, sink.clone());
    let cancel = CancellationToken::new();

    let status = orchestrator.run_status_tick(&cancel).await;
    assert_eq!(status.devices, 3);
    assert_eq!(status.succeeded, 2);
    assert_eq!(status.failed, 1);
    assert_eq!(mocks.ping.calls(), 3);

    let gate = orchestrator.status_gate();
    assert!(gate.is_online("r1").await);
    assert!(gate.is_online("l1").await);
    assert!(!gate.is_online("w1").await);
    assert_eq!(gate.counts().await, (2, 1));

    let metrics = orchestrator.run_metrics_tick(&cancel).await;
    assert_eq!(metrics.succeeded, 2);
    assert_eq!(metrics.skipped, 1);
    assert_eq!(mocks.snmp.calls(), 1);
    assert_eq!(mocks.ssh.calls(), 1);
    assert_eq!(mocks.wmi.calls(), 0);

    let snmp = sink.samples_named("snmp_probe").await;
    assert_eq!(snmp.len(), 1);
    assert_eq!(snmp[0].tags[DEVICE_ID_TAG], "r1");
    assert_eq!(snmp[0].tags[HOSTNAME_TAG], "r1.example.net");
    assert_eq!(snmp[0].tags["source"], "snmp");

    let ssh = sink.samples_named("ssh_probe").await;
    assert_eq!(ssh.len(), 1);
    assert_eq!(ssh[0].tags[DEVICE_ID_TAG], "l1");
}

#[tokio::test]
async fn test_status_samples_written_for_every_check() {
    let devices = vec![
        create_device("up", "10.0.1.1", "switch"),
        create_device("down", "10.0.1.2", "switch"),
    ];
    let mocks = Mocks::all_reachable(&["10.0.1.1"]);
    let sink = Arc::new(MemorySink::new(1024));
    let orchestrator = create_orchestrator(devices, &mocks, sink.clone());

    let summary = orchestrator.run_status_tick(&CancellationToken::new()).await;
    assert_eq!(summary.samples_written, 2);

    let mut written = sink.samples_named(DEVICE_STATUS_MEASUREMENT).await;
    written.sort_by(|a, b| a.tags[DEVICE_ID_TAG].cmp(&b.tags[DEVICE_ID_TAG]));

    assert_eq!(written.len(), 2);
    assert_eq!(written[0].tags[DEVICE_ID_TAG], "down");
    assert_eq!(written[0].fields["status"], FieldValue::Text("offline".to_string()));
    assert_eq!(written[1].tags[DEVICE_ID_TAG], "up");
    assert_eq!(written[1].fields["status"], FieldValue::Text("online".to_string()));
}

#[tokio::test]
async fn test_unknown_device_type_uses_snmp() {
    let devices = vec![create_device("p1", "10.0.2.1", "printer")];
    let mocks = Mocks::all_reachable(&["10.0.2.1"]);
    let sink = Arc::new(MemorySink::new(64));
    let orchestrator = create_orchestrator(devices, &mocks, sink);
    let cancel = CancellationToken::new();

    orchestrator.run_status_tick(&cancel).await;
    orchestrator.run_metrics_tick(&cancel).await;

    assert_eq!(mocks.snmp.calls(), 1);
    assert_eq!(mocks.ssh.calls() + mocks.wmi.calls(), 0);
}

#[tokio::test]
async fn test_metrics_failure_demotes_until_next_status_check() {
    let devices = vec![create_device("l1", "10.0.3.1", "linux")];
    let mocks = Mocks::all_reachable(&["10.0.3.1"]);
    let sink = Arc::new(MemorySink::new(64));
    let orchestrator = create_orchestrator(devices, &mocks, sink);
    let cancel = CancellationToken::new();

    orchestrator.run_status_tick(&cancel).await;
    mocks.ssh.set_reachable("10.0.3.1", false).await;

    let summary = orchestrator.run_metrics_tick(&cancel).await;
    assert_eq!(summary.failed, 1);

    let status = orchestrator.status_gate().get("l1").await.unwrap();
    assert_eq!(status.state, DeviceState::Offline);
    assert!(status.error.contains("10.0.3.1"));

    // demoted devices are not collected from
    let summary = orchestrator.run_metrics_tick(&cancel).await;
    assert_eq!(summary.skipped, 1);
    assert_eq!(mocks.ssh.calls(), 1);

    // the next reachability check restores eligibility
    mocks.ssh.set_reachable("10.0.3.1", true).await;
    orchestrator.run_status_tick(&cancel).await;
    let summary = orchestrator.run_metrics_tick(&cancel).await;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(mocks.ssh.calls(), 2);
}
