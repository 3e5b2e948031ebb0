//! SQLite access for the video library
//!
//! Functions are generic over `SqliteExecutor` so the engine can run them on
//! the pool for reads and on an open transaction for read-modify-write.

pub mod catalog;
pub mod entitlements;
pub mod receipts;

pub use catalog::{get_content_item, import_catalog_file, import_content_items, CatalogFile};
pub use entitlements::{
    fetch_entitlement, insert_entitlement, list_entitlements_for_user, update_entitlement,
};
pub use receipts::{find_receipt, insert_receipt, PaymentReceipt};

use uuid::Uuid;

use crate::error::{Error, Result};

/// Parse a UUID column, reporting the column on failure
pub(crate) fn parse_uuid(column: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::InvalidState(format!("Stored {} '{}' is not a UUID: {}", column, value, e)))
}
