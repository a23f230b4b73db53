//! Metadata side-table repository.
//!
//! The side-table is the authoritative per-bundle file list; bundle
//! documents never embed their files.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use super::{immediate, Result, StoreError};
use crate::models::{unique_id, MetadataRecord};

/// Maximum number of uuids handed to a single DELETE during bulk_delete.
const DELETE_CHUNK_SIZE: usize = 1000;

/// SQLite-backed repository for metadata records.
pub struct MetadataRepository {
    db_path: PathBuf,
}

impl MetadataRepository {
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                uuid TEXT PRIMARY KEY,
                bundle_uuid TEXT NOT NULL,
                file_catalog_uuid TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_metadata_bundle
                ON metadata(bundle_uuid);
        "#,
        )?;
        Ok(())
    }

    /// Associate a batch of File Catalog files with a bundle. Returns the
    /// assigned record uuids.
    pub fn bulk_create(&self, bundle_uuid: &str, files: &[String]) -> Result<Vec<String>> {
        if bundle_uuid.is_empty() {
            return Err(StoreError::Invalid(
                "bundle_uuid must not be empty".to_string(),
            ));
        }
        if files.is_empty() {
            return Err(StoreError::Invalid("files must not be empty".to_string()));
        }
        let conn = self.connect()?;
        immediate(&conn, |conn| {
            let mut uuids = Vec::with_capacity(files.len());
            for file_catalog_uuid in files {
                let uuid = unique_id();
                conn.execute(
                    "INSERT INTO metadata (uuid, bundle_uuid, file_catalog_uuid) VALUES (?, ?, ?)",
                    params![uuid, bundle_uuid, file_catalog_uuid],
                )?;
                uuids.push(uuid);
            }
            Ok(uuids)
        })
    }

    /// Delete records by uuid, chunked to keep statements bounded.
    /// Returns the number deleted.
    pub fn bulk_delete(&self, uuids: &[String]) -> Result<usize> {
        if uuids.is_empty() {
            return Err(StoreError::Invalid(
                "metadata must not be empty".to_string(),
            ));
        }
        let conn = self.connect()?;
        let mut count = 0;
        for chunk in uuids.chunks(DELETE_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("DELETE FROM metadata WHERE uuid IN ({placeholders})");
            let mut stmt = conn.prepare(&sql)?;
            count += stmt.execute(rusqlite::params_from_iter(chunk.iter()))?;
        }
        Ok(count)
    }

    /// List a bundle's records with limit/skip pagination.
    pub fn for_bundle(
        &self,
        bundle_uuid: &str,
        limit: u32,
        skip: u32,
    ) -> Result<Vec<MetadataRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT uuid, bundle_uuid, file_catalog_uuid FROM metadata
            WHERE bundle_uuid = ?
            ORDER BY uuid ASC
            LIMIT ? OFFSET ?
            "#,
        )?;
        let records = stmt
            .query_map(params![bundle_uuid, limit, skip], |row| {
                Ok(MetadataRecord {
                    uuid: row.get(0)?,
                    bundle_uuid: row.get(1)?,
                    file_catalog_uuid: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn get(&self, uuid: &str) -> Result<MetadataRecord> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT uuid, bundle_uuid, file_catalog_uuid FROM metadata WHERE uuid = ?",
            params![uuid],
            |row| {
                Ok(MetadataRecord {
                    uuid: row.get(0)?,
                    bundle_uuid: row.get(1)?,
                    file_catalog_uuid: row.get(2)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("Metadata {uuid}")))
    }

    pub fn delete(&self, uuid: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM metadata WHERE uuid = ?", params![uuid])?;
        Ok(())
    }

    /// Drop a bundle's entire side-table, used when the bundle becomes
    /// terminal.
    pub fn delete_for_bundle(&self, bundle_uuid: &str) -> Result<usize> {
        let conn = self.connect()?;
        let count = conn.execute(
            "DELETE FROM metadata WHERE bundle_uuid = ?",
            params![bundle_uuid],
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_bulk_create_and_pagination() {
        let dir = tempdir().unwrap();
        let repo = MetadataRepository::new(&dir.path().join("test.db")).unwrap();
        let files: Vec<String> = (0..5).map(|i| format!("fc-{i}")).collect();
        let uuids = repo.bulk_create("bundle-1", &files).unwrap();
        assert_eq!(uuids.len(), 5);

        let first = repo.for_bundle("bundle-1", 3, 0).unwrap();
        let rest = repo.for_bundle("bundle-1", 3, 3).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(rest.len(), 2);
        assert!(repo.for_bundle("bundle-1", 3, 5).unwrap().is_empty());
        assert!(repo.for_bundle("bundle-2", 10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_bulk_create_validation() {
        let dir = tempdir().unwrap();
        let repo = MetadataRepository::new(&dir.path().join("test.db")).unwrap();
        assert!(repo.bulk_create("bundle-1", &[]).is_err());
        assert!(repo.bulk_create("", &["fc-1".to_string()]).is_err());
    }

    #[test]
    fn test_bulk_delete_counts() {
        let dir = tempdir().unwrap();
        let repo = MetadataRepository::new(&dir.path().join("test.db")).unwrap();
        let files: Vec<String> = (0..4).map(|i| format!("fc-{i}")).collect();
        let uuids = repo.bulk_create("bundle-1", &files).unwrap();

        let deleted = repo.bulk_delete(&uuids[..2].to_vec()).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(repo.for_bundle("bundle-1", 100, 0).unwrap().len(), 2);

        // deleting already-deleted uuids is a no-op
        let deleted = repo.bulk_delete(&uuids[..2].to_vec()).unwrap();
        assert_eq!(deleted, 0);
    }

    #[test]
    fn test_delete_for_bundle() {
        let dir = tempdir().unwrap();
        let repo = MetadataRepository::new(&dir.path().join("test.db")).unwrap();
        repo.bulk_create("bundle-1", &["a".to_string(), "b".to_string()])
            .unwrap();
        repo.bulk_create("bundle-2", &["c".to_string()]).unwrap();

        assert_eq!(repo.delete_for_bundle("bundle-1").unwrap(), 2);
        assert!(repo.for_bundle("bundle-1", 10, 0).unwrap().is_empty());
        assert_eq!(repo.for_bundle("bundle-2", 10, 0).unwrap().len(), 1);
    }
}
