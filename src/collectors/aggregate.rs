//! Best-effort aggregation of sub-collections
//!
//! A multi-metric strategy runs several independent sub-collections (cpu,
//! memory, disk, ...). One failing must not discard the others: results and
//! errors are gathered side by side, and the whole collection fails only if
//! it produced no samples at all.

use tracing::{debug, warn};

use crate::MetricSample;

use super::{CollectError, CollectResult};

#[derive(Debug, Default)]
pub struct PartialCollection {
    samples: Vec<MetricSample>,
    failures: Vec<String>,
}

impl PartialCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one labelled sub-collection
    pub fn record(&mut self, label: &str, result: CollectResult<Vec<MetricSample>>) {
        match result {
            Ok(samples) => self.samples.extend(samples),
            Err(e) => {
                debug!("{label} collection failed: {e}");
                self.failures.push(format!("{label}: {e}"));
            }
        }
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    /// Successful samples, or an error listing every cause when nothing succeeded.
    ///
    /// A collection with neither samples nor failures succeeds empty.
    pub fn finish(self, address: &str) -> CollectResult<Vec<MetricSample>> {
        if self.failures.is_empty() {
            return Ok(self.samples);
        }

        if self.samples.is_empty() {
            return Err(CollectError::NothingCollected {
                address: address.to_string(),
                causes: self.failures,
            });
        }

        warn!(
            "collection from {address} completed with {} errors: {}",
            self.failures.len(),
            self.failures.join("; ")
        );
        Ok(self.samples)
    }
}
