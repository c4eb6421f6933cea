//! ICMP echo reachability check

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};
use tracing::trace;

use crate::MetricSample;

use super::{CollectError, CollectResult, CollectorStrategy, resolve_host};

const IP_ADDRESS_TAG: &str = "ip_address";

/// Sends a single echo request and reports the round trip time
#[derive(Debug, Clone)]
pub struct PingCollector {
    timeout: Duration,
}

impl PingCollector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn echo(&self, ip: IpAddr) -> CollectResult<Duration> {
        let config = match ip {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };

        let client = Client::new(&config)
            .map_err(|e| CollectError::Protocol(format!("failed to create ICMP client: {e}")))?;

        let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
        pinger.timeout(self.timeout);

        match pinger.ping(PingSequence(0), &[]).await {
            Ok((_, rtt)) => Ok(rtt),
            Err(SurgeError::Timeout { .. }) => Err(CollectError::Timeout(self.timeout)),
            Err(e) => Err(CollectError::Unreachable {
                address: ip.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// `ping_status` and `ping_rtt_ms` samples for a successful echo
pub fn echo_samples(address: &str, rtt: Duration, timestamp: DateTime<Utc>) -> Vec<MetricSample> {
    vec![
        MetricSample::new("ping_status", timestamp)
            .field("status", "online")
            .tag(IP_ADDRESS_TAG, address),
        MetricSample::new("ping_rtt_ms", timestamp)
            .field("rtt_ms", rtt.as_nanos() as f64 / 1e6)
            .tag(IP_ADDRESS_TAG, address),
    ]
}

#[async_trait]
impl CollectorStrategy for PingCollector {
    async fn collect(&self, address: &str) -> CollectResult<Vec<MetricSample>> {
        let ip = resolve_host(address).await?;
        let rtt = self.echo(ip).await?;

        trace!("echo reply from {address} in {rtt:?}");

        Ok(echo_samples(address, rtt, Utc::now()))
    }
}
