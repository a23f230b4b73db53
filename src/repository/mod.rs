//! Repository layer for the coordinator's document store.
//!
//! SQLite-backed. Each repository holds the database path and opens a
//! connection per operation; claims use `BEGIN IMMEDIATE` transactions so
//! the select-and-mark is atomic across processes.

mod bundles;
mod metadata;
mod requests;
mod status;

pub use bundles::{BundleFilter, BundleRepository};
pub use metadata::MetadataRepository;
pub use requests::RequestRepository;
pub use status::StatusRepository;

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Open a connection to the store with the settings every repository uses.
pub(crate) fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    // journal_mode returns a row, so it cannot go through pragma_update
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Run `body` inside a write transaction, committing on success.
pub(crate) fn immediate<T>(
    conn: &Connection,
    body: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute("BEGIN IMMEDIATE", [])?;
    let result = body(conn);
    if result.is_ok() {
        conn.execute("COMMIT", [])?;
    } else {
        let _ = conn.execute("ROLLBACK", []);
    }
    result
}
