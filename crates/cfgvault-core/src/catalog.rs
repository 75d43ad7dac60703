use crate::errors::{Result, VaultError};
use crate::model::Device;

/// One catalog row: a parsed device, or the reason the row could not be parsed
pub type CatalogEntry = std::result::Result<Device, VaultError>;

/// Source of managed devices
///
/// Owned by an external collaborator; the engine only reads it. Rows are
/// returned individually so the scheduler can report bad records per tick
/// without losing the good ones.
pub trait DeviceCatalog: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read at all.
    fn devices(&self) -> Result<Vec<CatalogEntry>>;
}
