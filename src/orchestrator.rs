//! Collection orchestrator
//!
//! Two independent periodic loops share one `StatusGate`:
//!
//! ```text
//! status loop   (status_poll_interval)   inventory → ping each device → gate + device_status sample
//! metrics loop  (metrics_poll_interval)  inventory → online devices only → strategy → tagged samples → sink
//! ```
//!
//! Every tick fans out one task per device into a `JoinSet` and joins them
//! all before the tick ends. A shared semaphore bounds how many device tasks
//! are in flight at once across both loops. A failing or slow device only
//! ever affects its own task.
//!
//! Shutdown is driven by a single `CancellationToken`: loops stop ticking,
//! in-flight device tasks abandon their work, and `start` returns only after
//! everything has been joined and the sink and inventory have been closed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::collectors::{CollectError, CollectorStrategy, StrategyKind, StrategySet};
use crate::inventory::Inventory;
use crate::sink::SinkWriter;
use crate::status::StatusGate;
use crate::{DEVICE_STATUS_MEASUREMENT, Device, DeviceState, MetricSample};

/// Validated timing and concurrency parameters of the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub status_poll_interval: Duration,
    pub metrics_poll_interval: Duration,
    /// Bound of a single reachability check
    pub device_timeout: Duration,
    /// Bound of a single metrics collection
    pub collection_timeout: Duration,
    /// Device tasks in flight at once, across both loops
    pub max_concurrent_devices: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            status_poll_interval: Duration::from_secs(30),
            metrics_poll_interval: Duration::from_secs(5 * 60),
            device_timeout: Duration::from_secs(10),
            collection_timeout: Duration::from_secs(30),
            max_concurrent_devices: 256,
        }
    }
}

/// What happened during one tick of either loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Devices listed by the inventory
    pub devices: usize,
    /// Status tick: marked online. Metrics tick: collected successfully.
    pub succeeded: usize,
    /// Status tick: marked offline. Metrics tick: demoted to offline.
    pub failed: usize,
    /// Metrics tick only: not eligible because not known to be online
    pub skipped: usize,
    pub samples_written: usize,
    pub write_failures: usize,
    /// Device tasks cut short by shutdown or a panic
    pub abandoned: usize,
    /// The inventory could not be listed, so nothing was dispatched
    pub inventory_failed: bool,
}

enum DeviceOutcome {
    Checked {
        state: DeviceState,
        written: bool,
    },
    Collected {
        written: usize,
        write_failures: usize,
    },
    Demoted,
    Abandoned,
}

impl TickSummary {
    fn record(&mut self, outcome: DeviceOutcome) {
        match outcome {
            DeviceOutcome::Checked { state, written } => {
                match state {
                    DeviceState::Online => self.succeeded += 1,
                    DeviceState::Offline => self.failed += 1,
                }
                if written {
                    self.samples_written += 1;
                } else {
                    self.write_failures += 1;
                }
            }
            DeviceOutcome::Collected {
                written,
                write_failures,
            } => {
                self.succeeded += 1;
                self.samples_written += written;
                self.write_failures += write_failures;
            }
            DeviceOutcome::Demoted => self.failed += 1,
            DeviceOutcome::Abandoned => self.abandoned += 1,
        }
    }
}

/// Shared handles a device task needs
#[derive(Clone)]
struct DeviceTask {
    gate: StatusGate,
    writer: SinkWriter,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl DeviceTask {
    /// Wait for a concurrency permit and run `strategy` under `limit`.
    ///
    /// `None` means shutdown was signalled first.
    async fn invoke(
        &self,
        strategy: &Arc<dyn CollectorStrategy>,
        address: &str,
        limit: Duration,
    ) -> Option<Result<Vec<MetricSample>, CollectError>> {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            permit = self.permits.clone().acquire_owned() => permit.ok()?,
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = tokio::time::timeout(limit, strategy.collect(address)) => {
                Some(result.unwrap_or(Err(CollectError::Timeout(limit))))
            }
        }
    }

    #[instrument(skip_all, fields(device_id = %device.id))]
    async fn check_status(
        self,
        device: Device,
        strategy: Arc<dyn CollectorStrategy>,
        limit: Duration,
    ) -> DeviceOutcome {
        let Some(result) = self.invoke(&strategy, &device.address, limit).await else {
            return DeviceOutcome::Abandoned;
        };

        let (state, error) = match result {
            Ok(_) => {
                debug!("{} is online", device.address);
                (DeviceState::Online, String::new())
            }
            Err(e) => {
                debug!("{} is offline: {e}", device.address);
                (DeviceState::Offline, e.to_string())
            }
        };

        self.gate.update(&device.id, state, error).await;

        let sample = MetricSample::new(DEVICE_STATUS_MEASUREMENT, Utc::now())
            .field("status", state.as_str())
            .with_device(&device);

        let written = match self.writer.write(&sample, &self.cancel).await {
            Ok(()) => true,
            Err(e) if e.is_cancelled() => {
                debug!("device status write abandoned on shutdown");
                false
            }
            Err(e) => {
                error!("failed to write device status: {e}");
                false
            }
        };

        DeviceOutcome::Checked { state, written }
    }

    #[instrument(skip_all, fields(device_id = %device.id, strategy = %kind))]
    async fn collect_metrics(
        self,
        device: Device,
        kind: StrategyKind,
        strategy: Arc<dyn CollectorStrategy>,
        limit: Duration,
    ) -> DeviceOutcome {
        let Some(result) = self.invoke(&strategy, &device.address, limit).await else {
            return DeviceOutcome::Abandoned;
        };

        let samples = match result {
            Ok(samples) => samples,
            Err(e) => {
                warn!("failed to collect metrics from {}: {e}", device.address);
                self.gate.mark_offline(&device.id, e.to_string()).await;
                return DeviceOutcome::Demoted;
            }
        };

        trace!("collected {} samples from {}", samples.len(), device.address);

        let mut written = 0;
        let mut write_failures = 0;
        for sample in samples {
            let sample = sample.with_device(&device);
            match self.writer.write(&sample, &self.cancel).await {
                Ok(()) => written += 1,
                Err(e) if e.is_cancelled() => {
                    debug!("metric writes abandoned on shutdown");
                    write_failures += 1;
                    break;
                }
                Err(e) => {
                    error!("failed to write {} sample: {e}", sample.name);
                    write_failures += 1;
                }
            }
        }

        DeviceOutcome::Collected {
            written,
            write_failures,
        }
    }
}

pub struct Orchestrator {
    settings: OrchestratorSettings,
    inventory: Arc<dyn Inventory>,
    strategies: StrategySet,
    writer: SinkWriter,
    gate: StatusGate,
    permits: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        inventory: Arc<dyn Inventory>,
        strategies: StrategySet,
        writer: SinkWriter,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_devices.max(1)));

        Self {
            settings,
            inventory,
            strategies,
            writer,
            gate: StatusGate::new(),
            permits,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Read access to the last known status of every device
    pub fn status_gate(&self) -> &StatusGate {
        &self.gate
    }

    fn device_task(&self, cancel: &CancellationToken) -> DeviceTask {
        DeviceTask {
            gate: self.gate.clone(),
            writer: self.writer.clone(),
            permits: self.permits.clone(),
            cancel: cancel.clone(),
        }
    }

    /// Run both loops until `cancel` fires, then drain and close connections
    pub async fn start(&self, cancel: CancellationToken) {
        info!(
            "starting collection: status every {:?}, metrics every {:?}",
            self.settings.status_poll_interval, self.settings.metrics_poll_interval
        );

        tokio::join!(self.status_loop(&cancel), self.metrics_loop(&cancel));

        info!("collection loops stopped, closing connections");

        if let Err(e) = self.writer.close().await {
            warn!("failed to close metrics sink: {e}");
        }
        self.inventory.close().await;

        info!("collection stopped");
    }

    async fn status_loop(&self, cancel: &CancellationToken) {
        let mut ticker = interval(self.settings.status_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let summary = self.run_status_tick(cancel).await;
                    let (online, offline) = self.gate.counts().await;
                    debug!(
                        "status tick: {} devices, {} checked online, {} offline ({online} online / {offline} offline known)",
                        summary.devices, summary.succeeded, summary.failed
                    );
                }
            }
        }

        debug!("status loop stopped");
    }

    async fn metrics_loop(&self, cancel: &CancellationToken) {
        let mut ticker = interval(self.settings.metrics_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let summary = self.run_metrics_tick(cancel).await;
                    debug!(
                        "metrics tick: {} devices, {} collected, {} demoted, {} skipped, {} samples written",
                        summary.devices, summary.succeeded, summary.failed, summary.skipped, summary.samples_written
                    );
                }
            }
        }

        debug!("metrics loop stopped");
    }

    async fn list_devices(&self, cancel: &CancellationToken) -> Option<Vec<Device>> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = self.inventory.list_devices() => result,
        };

        match result {
            Ok(devices) => Some(devices),
            Err(e) => {
                error!("failed to list devices: {e}");
                None
            }
        }
    }

    /// Run one status tick now and wait for every device task to finish
    #[instrument(skip_all)]
    pub async fn run_status_tick(&self, cancel: &CancellationToken) -> TickSummary {
        let Some(devices) = self.list_devices(cancel).await else {
            return TickSummary {
                inventory_failed: true,
                ..TickSummary::default()
            };
        };

        let mut summary = TickSummary {
            devices: devices.len(),
            ..TickSummary::default()
        };

        debug!("checking status of {} devices", devices.len());

        let mut tasks = JoinSet::new();
        for device in devices {
            let task = self.device_task(cancel);
            let strategy = self.strategies.reachability().clone();
            tasks.spawn(task.check_status(device, strategy, self.settings.device_timeout));
        }

        join_all(tasks, &mut summary).await;
        summary
    }

    /// Run one metrics tick now and wait for every device task to finish
    #[instrument(skip_all)]
    pub async fn run_metrics_tick(&self, cancel: &CancellationToken) -> TickSummary {
        let Some(devices) = self.list_devices(cancel).await else {
            return TickSummary {
                inventory_failed: true,
                ..TickSummary::default()
            };
        };

        let mut summary = TickSummary {
            devices: devices.len(),
            ..TickSummary::default()
        };

        let mut tasks = JoinSet::new();
        for device in devices {
            if !self.gate.is_online(&device.id).await {
                trace!("skipping {} (not online)", device.id);
                summary.skipped += 1;
                continue;
            }

            let (kind, strategy) = self.strategies.for_device(&device);
            let task = self.device_task(cancel);
            tasks.spawn(task.collect_metrics(
                device,
                kind,
                strategy.clone(),
                self.settings.collection_timeout,
            ));
        }

        debug!(
            "collecting metrics from {} devices ({} skipped)",
            tasks.len(),
            summary.skipped
        );

        join_all(tasks, &mut summary).await;
        summary
    }
}

async fn join_all(mut tasks: JoinSet<DeviceOutcome>, summary: &mut TickSummary) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => summary.record(outcome),
            Err(e) => {
                error!("device task failed: {e}");
                summary.abandoned += 1;
            }
        }
    }
}
