//! Orchestrator writing through a real InfluxDB HTTP sink against a mock server

use std::sync::Arc;
use std::time::Duration;

use fleet_collector::inventory::StaticInventory;
use fleet_collector::orchestrator::Orchestrator;
use fleet_collector::sink::{InfluxSink, RetryPolicy, SinkWriter};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn create_influx_writer(server: &MockServer) -> SinkWriter {
    let sink = InfluxSink::new(
        &server.uri(),
        "test-token",
        "test-org",
        "telemetry",
        Duration::from_secs(2),
    )
    .unwrap();

    SinkWriter::with_policy(
        Arc::new(sink),
        RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(20)),
    )
}

#[tokio::test]
async fn test_status_sample_reaches_influx() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .and(query_param("org", "test-org"))
        .and(query_param("bucket", "telemetry"))
        .and(header("Authorization", "Token test-token"))
        .and(body_string_contains("device_status,device_id=r1"))
        .and(body_string_contains("status=\"online\""))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mocks = Mocks::all_reachable(&["10.3.0.1"]);
    let orchestrator = Orchestrator::new(
        create_test_settings(),
        Arc::new(StaticInventory::new(vec![create_device("r1", "10.3.0.1", "router")])),
        mocks.strategies(),
        create_influx_writer(&server),
    );

    let summary = orchestrator.run_status_tick(&CancellationToken::new()).await;

    assert_eq!(summary.samples_written, 1);
    assert_eq!(summary.write_failures, 0);
}

#[tokio::test]
async fn test_transient_sink_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(204))
        .with_priority(2)
        .mount(&server)
        .await;

    let mocks = Mocks::all_reachable(&["10.3.1.1"]);
    let orchestrator = Orchestrator::new(
        create_test_settings(),
        Arc::new(StaticInventory::new(vec![create_device("r1", "10.3.1.1", "router")])),
        mocks.strategies(),
        create_influx_writer(&server),
    );

    let summary = orchestrator.run_status_tick(&CancellationToken::new()).await;

    assert_eq!(summary.samples_written, 1);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn test_persistent_sink_errors_are_dropped_after_retries() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let mocks = Mocks::all_reachable(&["10.3.2.1"]);
    let orchestrator = Orchestrator::new(
        create_test_settings(),
        Arc::new(StaticInventory::new(vec![create_device("r1", "10.3.2.1", "router")])),
        mocks.strategies(),
        create_influx_writer(&server),
    );

    let summary = orchestrator.run_status_tick(&CancellationToken::new()).await;

    assert_eq!(summary.samples_written, 0);
    assert_eq!(summary.write_failures, 1);
    assert!(orchestrator.status_gate().is_online("r1").await);
    // one initial attempt plus three retries
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}
