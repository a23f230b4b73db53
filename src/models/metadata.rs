//! Metadata side-table records.
//!
//! Each record associates one File Catalog file with the bundle that
//! carries it. The side-table is the only per-bundle file list; records
//! are created when a bundle is specified and bulk-deleted when the bundle
//! becomes terminal.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub uuid: String,
    pub bundle_uuid: String,
    pub file_catalog_uuid: String,
}
