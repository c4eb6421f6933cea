//! InfluxDB v2 sink
//!
//! Writes line protocol to `/api/v2/write` with nanosecond precision and
//! token authentication. One `write_points` call is one HTTP request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};
use tracing::{debug, info, instrument};

use crate::MetricSample;

use super::MetricsSink;
use super::error::{SinkError, SinkResult};
use super::line_protocol::encode_batch;

/// Response bodies longer than this are cut in error messages
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: Client,
    base_url: String,
    token: String,
    org: String,
    bucket: String,
}

#[derive(Debug, serde::Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

impl InfluxSink {
    pub fn new(
        url: &str,
        token: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
        request_timeout: Duration,
    ) -> SinkResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SinkError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            token: token.into(),
            org: org.into(),
            bucket: bucket.into(),
        })
    }

    fn write_url(&self) -> String {
        format!("{}/api/v2/write", self.base_url)
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.token)
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

#[async_trait]
impl MetricsSink for InfluxSink {
    #[instrument(skip(self, samples), fields(count = samples.len()))]
    async fn write_points(&self, samples: &[MetricSample]) -> SinkResult<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let body = encode_batch(samples)?;

        let response = self
            .client
            .post(self.write_url())
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header(header::AUTHORIZATION, self.auth_header())
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                message: truncate(message),
            });
        }

        debug!("wrote {} points to {}", samples.len(), self.bucket);
        Ok(())
    }

    async fn health_check(&self) -> SinkResult<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;

        let status = response.status();
        let health: HealthResponse = response
            .json()
            .await
            .map_err(|e| SinkError::Unhealthy(format!("unreadable health response ({status}): {e}")))?;

        if health.status != "pass" {
            return Err(SinkError::Unhealthy(format!(
                "status={}, message={}",
                health.status,
                health.message.unwrap_or_default()
            )));
        }

        Ok(())
    }

    async fn close(&self) -> SinkResult<()> {
        info!("closing InfluxDB sink");
        Ok(())
    }
}
