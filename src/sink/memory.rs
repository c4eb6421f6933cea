//! In-memory sink (no persistence)
//!
//! Samples are kept in a ring buffer with a fixed capacity; when it is full
//! the oldest samples are evicted. Useful for dry runs and for tests that
//! need to inspect what was written.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::MetricSample;

use super::MetricsSink;
use super::error::SinkResult;

pub struct MemorySink {
    samples: Mutex<VecDeque<MetricSample>>,
    capacity: usize,
    write_calls: AtomicU64,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            write_calls: AtomicU64::new(0),
        }
    }

    /// Copy of every retained sample, oldest first
    pub async fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().await.iter().cloned().collect()
    }

    /// Retained samples with the given measurement name
    pub async fn samples_named(&self, name: &str) -> Vec<MetricSample> {
        self.samples
            .lock()
            .await
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }

    /// Number of `write_points` calls received
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl MetricsSink for MemorySink {
    async fn write_points(&self, samples: &[MetricSample]) -> SinkResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        let mut buffer = self.samples.lock().await;
        for sample in samples {
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(sample.clone());
        }

        Ok(())
    }

    async fn health_check(&self) -> SinkResult<()> {
        Ok(())
    }

    async fn close(&self) -> SinkResult<()> {
        debug!("closing in-memory sink (no-op)");
        Ok(())
    }
}
