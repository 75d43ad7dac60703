//! Device catalog reader
//!
//! The `devices` table is maintained by the management front-end. Rows are
//! parsed one by one; a bad row becomes an error entry instead of failing the
//! whole read.

use crate::db;
use crate::errors::{from_rusqlite, lock_poisoned, Result};
use crate::migrations::apply_migrations;
use cfgvault_core::catalog::{CatalogEntry, DeviceCatalog};
use cfgvault_core::errors::{CvError, VaultError};
use cfgvault_core::{Cadence, Device, Transport, VendorVariant};
use cfgvault_core_types::DeviceId;
use rusqlite::{Connection, Row};
use std::path::Path;
use std::sync::Mutex;

struct DeviceRow {
    device_id: String,
    name: String,
    vendor: String,
    address: String,
    port: Option<i64>,
    transport: Option<String>,
    credential_ref: String,
    cadence: Option<String>,
    cadence_at: Option<String>,
    cadence_day: Option<String>,
    enabled: bool,
}

fn row_to_device_row(row: &Row<'_>) -> rusqlite::Result<DeviceRow> {
    Ok(DeviceRow {
        device_id: row.get(0)?,
        name: row.get(1)?,
        vendor: row.get(2)?,
        address: row.get(3)?,
        port: row.get(4)?,
        transport: row.get(5)?,
        credential_ref: row.get(6)?,
        cadence: row.get(7)?,
        cadence_at: row.get(8)?,
        enabled: row.get(9)?,
        cadence_day: row.get(10)?,
    })
}

impl DeviceRow {
    fn into_device(self) -> std::result::Result<Device, VaultError> {
        let invalid = |reason: String| VaultError::InvalidDevice {
            device_id: self.device_id.clone(),
            reason,
        };

        let variant: VendorVariant = self.vendor.parse()?;
        let transport = match self.transport.as_deref().map(str::trim) {
            None | Some("") => variant.profile().default_transport(),
            Some(t) => t.parse::<Transport>()?,
        };
        let port = match self.port {
            None => None,
            Some(p) => Some(
                u16::try_from(p).map_err(|_| invalid(format!("port {} out of range", p)))?,
            ),
        };
        let cadence = match (self.cadence.as_deref(), self.cadence_at.as_deref()) {
            (None, _) | (Some(""), _) => None,
            (Some(kind), Some(at)) => {
                Some(Cadence::parse_with_day(kind, at, self.cadence_day.as_deref())?)
            }
            (Some(kind), None) => {
                return Err(invalid(format!("cadence '{}' without time of day", kind)))
            }
        };

        Ok(Device {
            id: DeviceId::new(self.device_id),
            name: self.name,
            variant,
            address: self.address,
            port,
            transport,
            credential_ref: self.credential_ref,
            cadence,
            enabled: self.enabled,
        })
    }
}

/// Load every catalog row, ordered by device id
pub fn load_devices(conn: &Connection) -> Result<Vec<CatalogEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT device_id, name, vendor, address, port, transport, credential_ref,
                    cadence, cadence_at, enabled, cadence_day
             FROM devices
             ORDER BY device_id",
        )
        .map_err(from_rusqlite)?;
    let rows = stmt
        .query_map([], row_to_device_row)
        .map_err(from_rusqlite)?;

    rows.map(|row| Ok(row.map_err(from_rusqlite)?.into_device()))
        .collect()
}

/// Catalog backed by the `devices` table of an index database
pub struct SqliteDeviceCatalog {
    conn: Mutex<Connection>,
}

impl SqliteDeviceCatalog {
    /// Open the catalog on its own connection to the index database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = db::open(path)?;
        db::configure(&conn)?;
        apply_migrations(&mut conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

impl DeviceCatalog for SqliteDeviceCatalog {
    fn devices(&self) -> cfgvault_core::Result<Vec<CatalogEntry>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| lock_poisoned("load_devices"))
            .map_err(to_vault_error)?;
        load_devices(&conn).map_err(to_vault_error)
    }
}

fn to_vault_error(err: CvError) -> VaultError {
    VaultError::CatalogUnavailable {
        reason: err.to_string(),
    }
}
