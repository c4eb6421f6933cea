//! Device inventory
//!
//! The orchestrator refreshes the device list wholesale at the start of
//! every tick. Sources:
//!
//! - **PostgreSQL** (default): the `devices` table, ordered by address
//! - **Static**: devices listed in the configuration file

#[cfg(feature = "inventory-postgres")]
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::Device;

#[cfg(feature = "inventory-postgres")]
pub use postgres::PostgresInventory;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to connect to inventory: {0}")]
    Connection(String),

    #[error("failed to query devices: {0}")]
    Query(String),
}

/// Read-only source of the monitored device list
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Current list of devices
    async fn list_devices(&self) -> Result<Vec<Device>, InventoryError>;

    /// Release held connections. Called once, after all loops have drained.
    async fn close(&self) {}
}

/// Fixed device list
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    devices: Vec<Device>,
}

impl StaticInventory {
    pub fn new(mut devices: Vec<Device>) -> Self {
        devices.sort_by(|a, b| a.address.cmp(&b.address));
        Self { devices }
    }
}

#[async_trait]
impl Inventory for StaticInventory {
    async fn list_devices(&self) -> Result<Vec<Device>, InventoryError> {
        debug!("listing {} static devices", self.devices.len());
        Ok(self.devices.clone())
    }
}
