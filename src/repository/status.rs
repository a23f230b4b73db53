//! Component heartbeat repository.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection};

use super::Result;
use crate::models::{format_timestamp, ComponentStatus};

/// SQLite-backed repository for component heartbeats.
pub struct StatusRepository {
    db_path: PathBuf,
}

impl StatusRepository {
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
            CREATE TABLE IF NOT EXISTS component_status (
                component_type TEXT NOT NULL,
                component_name TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (component_type, component_name)
            );
        "#,
        )?;
        Ok(())
    }

    /// Upsert one instance's heartbeat.
    pub fn upsert(
        &self,
        component_type: &str,
        component_name: &str,
        timestamp: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO component_status (component_type, component_name, timestamp, payload)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (component_type, component_name)
            DO UPDATE SET timestamp = excluded.timestamp, payload = excluded.payload
            "#,
            params![
                component_type,
                component_name,
                timestamp,
                serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string()),
            ],
        )?;
        Ok(())
    }

    /// All heartbeats for one component type.
    pub fn for_type(&self, component_type: &str) -> Result<Vec<ComponentStatus>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT component_type, component_name, timestamp, payload
            FROM component_status
            WHERE component_type = ?
            ORDER BY component_name ASC
            "#,
        )?;
        let statuses = stmt
            .query_map(params![component_type], row_to_status)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(statuses)
    }

    /// Distinct component types with their most recent heartbeat.
    pub fn latest_per_type(&self) -> Result<Vec<(String, String)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT component_type, MAX(timestamp)
            FROM component_status
            GROUP BY component_type
            ORDER BY component_type ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_for_type(&self, component_type: &str) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM component_status WHERE component_type = ?",
            params![component_type],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Delete heartbeat records older than the given number of days.
    /// Returns the number removed.
    pub fn cull(&self, older_than_days: i64) -> Result<usize> {
        let cutoff = format_timestamp(Utc::now() - chrono::Duration::days(older_than_days));
        let conn = self.connect()?;
        let count = conn.execute(
            "DELETE FROM component_status WHERE timestamp < ?",
            params![cutoff],
        )?;
        Ok(count)
    }
}

fn row_to_status(row: &rusqlite::Row) -> rusqlite::Result<ComponentStatus> {
    let payload: String = row.get(3)?;
    Ok(ComponentStatus {
        component_type: row.get(0)?,
        component_name: row.get(1)?,
        timestamp: row.get(2)?,
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now;
    use tempfile::tempdir;

    #[test]
    fn test_upsert_replaces() {
        let dir = tempdir().unwrap();
        let repo = StatusRepository::new(&dir.path().join("test.db")).unwrap();
        repo.upsert("bundler", "node1-bundler", &now(), &serde_json::json!({"a": 1}))
            .unwrap();
        repo.upsert("bundler", "node1-bundler", &now(), &serde_json::json!({"a": 2}))
            .unwrap();

        let statuses = repo.for_type("bundler").unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].payload["a"], 2);
        assert_eq!(repo.count_for_type("bundler").unwrap(), 1);
        assert_eq!(repo.count_for_type("picker").unwrap(), 0);
    }

    #[test]
    fn test_latest_per_type() {
        let dir = tempdir().unwrap();
        let repo = StatusRepository::new(&dir.path().join("test.db")).unwrap();
        repo.upsert("bundler", "n1", &now(), &serde_json::json!({}))
            .unwrap();
        repo.upsert("picker", "n2", &now(), &serde_json::json!({}))
            .unwrap();

        let latest = repo.latest_per_type().unwrap();
        let types: Vec<&str> = latest.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(types, vec!["bundler", "picker"]);
    }

    #[test]
    fn test_cull_removes_old_records() {
        let dir = tempdir().unwrap();
        let repo = StatusRepository::new(&dir.path().join("test.db")).unwrap();
        let old = format_timestamp(Utc::now() - chrono::Duration::days(30));
        repo.upsert("bundler", "stale", &old, &serde_json::json!({}))
            .unwrap();
        repo.upsert("bundler", "fresh", &now(), &serde_json::json!({}))
            .unwrap();

        assert_eq!(repo.cull(14).unwrap(), 1);
        let names: Vec<String> = repo
            .for_type("bundler")
            .unwrap()
            .into_iter()
            .map(|s| s.component_name)
            .collect();
        assert_eq!(names, vec!["fresh"]);
    }
}
