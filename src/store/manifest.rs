//! Resolved manifest persistence.

use async_trait::async_trait;
use sqlx::Row;
use tracing::{debug, instrument};

use super::{Result, Store, StoreError, column_u64, to_sql_int};
use crate::locator::ResourceId;
use crate::manifest::{FileEntry, ResourceManifest};

const TABLE: &str = "manifests";

/// Data-access contract for the manifest cache.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Reads a persisted manifest by resource id.
    async fn get_manifest(&self, resource_id: &ResourceId) -> Result<Option<ResourceManifest>>;

    /// Persists a manifest unless one already exists for its resource id.
    ///
    /// Returns true when this call wrote the row.
    async fn insert_manifest(&self, manifest: &ResourceManifest) -> Result<bool>;
}

impl Store {
    /// Reads a manifest and its files in manifest order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a query fails or
    /// [`StoreError::CorruptRow`] if stored values cannot be decoded.
    #[instrument(skip(self), fields(resource_id = %resource_id))]
    pub async fn get_manifest(&self, resource_id: &ResourceId) -> Result<Option<ResourceManifest>> {
        let Some(row) = sqlx::query(
            r"SELECT resource_id, display_name, total_bytes, is_container, locator
              FROM manifests WHERE resource_id = ?",
        )
        .bind(resource_id.as_str())
        .fetch_optional(self.db.pool())
        .await?
        else {
            return Ok(None);
        };

        let file_rows = sqlx::query(
            r"SELECT file_index, path, bytes FROM manifest_files
              WHERE resource_id = ? ORDER BY file_index ASC",
        )
        .bind(resource_id.as_str())
        .fetch_all(self.db.pool())
        .await?;

        let mut files = Vec::with_capacity(file_rows.len());
        for (position, file_row) in file_rows.iter().enumerate() {
            let index = usize::try_from(file_row.try_get::<i64, _>("file_index")?)
                .map_err(|_| StoreError::corrupt(TABLE, "negative file index"))?;
            if index != position {
                return Err(StoreError::corrupt(
                    TABLE,
                    format!("file indices of {resource_id} are not contiguous at {position}"),
                ));
            }
            files.push(FileEntry {
                index,
                path: file_row.try_get("path")?,
                bytes: column_u64(TABLE, "bytes", file_row.try_get("bytes")?)?,
            });
        }
        if files.is_empty() {
            return Err(StoreError::corrupt(
                TABLE,
                format!("manifest {resource_id} has no files"),
            ));
        }

        let stored_id: String = row.try_get("resource_id")?;
        Ok(Some(ResourceManifest {
            resource_id: ResourceId::parse(&stored_id)
                .map_err(|e| StoreError::corrupt(TABLE, e.to_string()))?,
            display_name: row.try_get("display_name")?,
            total_bytes: column_u64(TABLE, "total_bytes", row.try_get("total_bytes")?)?,
            is_container: row.try_get::<i64, _>("is_container")? != 0,
            locator: row.try_get("locator")?,
            files,
        }))
    }

    /// Writes the manifest and its files in one transaction, once per resource.
    ///
    /// A second insert for the same resource id is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the transaction fails.
    #[instrument(skip(self, manifest), fields(resource_id = %manifest.resource_id, files = manifest.files.len()))]
    pub async fn insert_manifest(&self, manifest: &ResourceManifest) -> Result<bool> {
        let mut tx = self.db.pool().begin().await?;

        let inserted = sqlx::query(
            r"INSERT INTO manifests (resource_id, display_name, total_bytes, is_container, locator)
              VALUES (?, ?, ?, ?, ?)
              ON CONFLICT(resource_id) DO NOTHING",
        )
        .bind(manifest.resource_id.as_str())
        .bind(&manifest.display_name)
        .bind(to_sql_int(manifest.total_bytes))
        .bind(i64::from(manifest.is_container))
        .bind(&manifest.locator)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            tx.rollback().await?;
            debug!("manifest already persisted");
            return Ok(false);
        }

        for file in &manifest.files {
            sqlx::query(
                "INSERT INTO manifest_files (resource_id, file_index, path, bytes) VALUES (?, ?, ?, ?)",
            )
            .bind(manifest.resource_id.as_str())
            .bind(i64::try_from(file.index).unwrap_or(i64::MAX))
            .bind(&file.path)
            .bind(to_sql_int(file.bytes))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("manifest persisted");
        Ok(true)
    }
}

#[async_trait]
impl ManifestStore for Store {
    async fn get_manifest(&self, resource_id: &ResourceId) -> Result<Option<ResourceManifest>> {
        Store::get_manifest(self, resource_id).await
    }

    async fn insert_manifest(&self, manifest: &ResourceManifest) -> Result<bool> {
        Store::insert_manifest(self, manifest).await
    }
}
