//! PostgreSQL device inventory
//!
//! Reads the `devices` table shared with the rest of the platform. Rows that
//! fail to decode are logged and skipped; they never fail the listing.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, error, info, instrument};

use crate::Device;

use super::{Inventory, InventoryError};

const LIST_DEVICES: &str = r#"
    SELECT id::text AS id,
           ip_address::text AS address,
           COALESCE(hostname, '') AS hostname,
           mac_address::text AS mac_address,
           COALESCE(device_type, 'unknown') AS device_type
    FROM devices
    ORDER BY ip_address
"#;

pub struct PostgresInventory {
    pool: PgPool,
}

impl PostgresInventory {
    /// Connect a pool to the inventory database
    #[instrument(skip_all)]
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, InventoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await
            .map_err(|e| InventoryError::Connection(e.to_string()))?;

        info!("connected to inventory database");

        Ok(Self { pool })
    }

    fn decode(row: &PgRow) -> Result<Device, sqlx::Error> {
        Ok(Device {
            id: row.try_get("id")?,
            address: row.try_get("address")?,
            hostname: row.try_get("hostname")?,
            mac_address: row.try_get("mac_address")?,
            device_type: row.try_get("device_type")?,
        })
    }
}

#[async_trait]
impl Inventory for PostgresInventory {
    async fn list_devices(&self) -> Result<Vec<Device>, InventoryError> {
        let rows = sqlx::query(LIST_DEVICES)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| InventoryError::Query(e.to_string()))?;

        let mut devices = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::decode(row) {
                Ok(device) => devices.push(device),
                Err(e) => error!("failed to decode device row: {e}"),
            }
        }

        debug!("inventory returned {} devices", devices.len());
        Ok(devices)
    }

    async fn close(&self) {
        info!("closing inventory database pool");
        self.pool.close().await;
    }
}
