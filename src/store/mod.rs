//! `SQLite`-backed persistence for quota profiles, manifests and the publish ledger.
//!
//! # Overview
//!
//! One [`Store`] over a [`Database`] implements three narrow seams:
//! - [`QuotaStore`] - load/save quota profiles, crash-recovery slot reset
//! - [`ManifestStore`] - cache-first manifest lookup, insert-once persistence
//! - [`PublishStore`] - announcement claims and per-selector comment flags
//!
//! Orchestration code depends on the traits, so tests can swap in fakes.
//! Every natural key (`identity`, `resource_id`, `(resource_id, selector)`)
//! carries a uniqueness constraint; concurrent writers are ordered by the
//! database, not by application locks.
//!
//! # Example
//!
//! ```ignore
//! use magnet_relay::{Database, Store};
//! use magnet_relay::store::ManifestStore;
//!
//! let db = Database::new(Path::new("magnet-relay.db")).await?;
//! let store = Store::new(db);
//! let cached = store.get_manifest(&resource_id).await?;
//! ```

mod error;
mod manifest;
mod publish;
mod quota;

pub use error::{StoreError, StoreErrorKind};
pub use manifest::ManifestStore;
pub use publish::{AnnouncementRecord, PublishStore};
pub use quota::QuotaStore;

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Returns `Ok(())` if at least one row was affected; otherwise [`StoreError::NotFound`].
fn check_affected(table: &'static str, key: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::NotFound {
            table,
            key: key.to_string(),
        })
    } else {
        Ok(())
    }
}

/// Converts a non-negative column value, reporting a corrupt row otherwise.
fn column_u64(table: &'static str, column: &str, value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| StoreError::corrupt(table, format!("negative {column}: {value}")))
}

fn column_u32(table: &'static str, column: &str, value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::corrupt(table, format!("{column} out of range: {value}")))
}

/// Converts an in-memory count to an `SQLite` integer, saturating at `i64::MAX`.
fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Persistence facade implementing every store seam.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    /// Creates a store over an opened (and migrated) database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying database.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }
}
