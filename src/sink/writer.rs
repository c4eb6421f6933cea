//! Retrying front of a `MetricsSink`

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace};

use crate::MetricSample;

use super::MetricsSink;
use super::error::SinkResult;
use super::retry::RetryPolicy;

/// Shared, cloneable writer used by every device task
#[derive(Clone)]
pub struct SinkWriter {
    sink: Arc<dyn MetricsSink>,
    policy: RetryPolicy,
}

impl SinkWriter {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self::with_policy(sink, RetryPolicy::default())
    }

    pub fn with_policy(sink: Arc<dyn MetricsSink>, policy: RetryPolicy) -> Self {
        Self { sink, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Write one sample, retrying per policy
    pub async fn write(&self, sample: &MetricSample, cancel: &CancellationToken) -> SinkResult<()> {
        self.write_batch(std::slice::from_ref(sample), cancel).await
    }

    /// Write several samples as one request, retrying per policy.
    /// An empty batch succeeds without touching the sink.
    #[instrument(skip_all, fields(count = samples.len()))]
    pub async fn write_batch(
        &self,
        samples: &[MetricSample],
        cancel: &CancellationToken,
    ) -> SinkResult<()> {
        if samples.is_empty() {
            return Ok(());
        }

        trace!("writing {} samples", samples.len());

        self.policy
            .run(cancel, || self.sink.write_points(samples))
            .await
    }

    pub async fn health_check(&self) -> SinkResult<()> {
        self.sink.health_check().await
    }

    pub async fn close(&self) -> SinkResult<()> {
        self.sink.close().await
    }
}

impl std::fmt::Debug for SinkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkWriter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
