//! Metrics sink: the write side of the time-series store
//!
//! ## Design
//!
//! - **Trait-based**: `MetricsSink` hides the concrete store (InfluxDB, in-memory)
//! - **Retrying**: `SinkWriter` routes every write through a shared `RetryPolicy`
//! - **Cancellable**: backoff waits abort as soon as shutdown is signalled
//!
//! Delivery is at-most-once. A sample whose write exhausts its retries is
//! logged by the caller and dropped.

pub mod error;
pub mod influx;
pub mod line_protocol;
pub mod memory;
pub mod retry;
pub mod writer;

use async_trait::async_trait;

use crate::MetricSample;

pub use error::{SinkError, SinkResult};
pub use influx::InfluxSink;
pub use memory::MemorySink;
pub use retry::RetryPolicy;
pub use writer::SinkWriter;

/// Trait for time-series stores the collector writes to
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// device task. A single call either stores the whole slice or fails; the
/// caller decides whether to retry.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Write a batch of samples in one request
    async fn write_points(&self, samples: &[MetricSample]) -> SinkResult<()>;

    /// Lightweight check that the store is reachable and healthy
    async fn health_check(&self) -> SinkResult<()>;

    /// Release held connections. Called once, after all writers have drained.
    async fn close(&self) -> SinkResult<()>;
}
