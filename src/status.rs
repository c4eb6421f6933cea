//! Shared store of each device's last known reachability
//!
//! Written by the status loop (and demoted by the metrics loop on collection
//! failure), read by the metrics loop to decide which devices are eligible
//! for metric collection. Every update replaces the whole entry; no history
//! is kept.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::{DeviceState, DeviceStatus};

#[derive(Debug, Default, Clone)]
pub struct StatusGate {
    statuses: Arc<RwLock<HashMap<String, Arc<DeviceStatus>>>>,
}

impl StatusGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the status of a device
    pub async fn update(&self, device_id: &str, state: DeviceState, error: impl Into<String>) {
        let status = Arc::new(DeviceStatus {
            device_id: device_id.to_string(),
            state,
            last_seen: Utc::now(),
            error: error.into(),
        });

        let mut statuses = self.statuses.write().await;
        statuses.insert(device_id.to_string(), status);
    }

    pub async fn mark_online(&self, device_id: &str) {
        self.update(device_id, DeviceState::Online, String::new()).await;
    }

    pub async fn mark_offline(&self, device_id: &str, error: impl Into<String>) {
        self.update(device_id, DeviceState::Offline, error).await;
    }

    /// Get the latest status of a device, if it has ever been checked
    pub async fn get(&self, device_id: &str) -> Option<Arc<DeviceStatus>> {
        let statuses = self.statuses.read().await;
        statuses.get(device_id).cloned()
    }

    /// A device is eligible for metric collection only when its latest
    /// recorded status is online. Unknown devices are not eligible.
    pub async fn is_online(&self, device_id: &str) -> bool {
        self.get(device_id)
            .await
            .is_some_and(|status| status.is_online())
    }

    /// Copy of every entry currently held
    pub async fn snapshot(&self) -> Vec<Arc<DeviceStatus>> {
        let statuses = self.statuses.read().await;
        statuses.values().cloned().collect()
    }

    /// Count of (online, offline) entries
    pub async fn counts(&self) -> (usize, usize) {
        let statuses = self.statuses.read().await;
        let online = statuses.values().filter(|s| s.is_online()).count();
        (online, statuses.len() - online)
    }

    pub async fn len(&self) -> usize {
        self.statuses.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.statuses.read().await.is_empty()
    }
}
