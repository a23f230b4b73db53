//! TransferRequest repository.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{immediate, Result, StoreError};
use crate::models::{
    format_timestamp, now, unique_id, NewTransferRequest, RequestPatch, RequestStatus,
    TransferRequest,
};

/// SQLite-backed repository for transfer requests.
pub struct RequestRepository {
    db_path: PathBuf,
}

impl RequestRepository {
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS transfer_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                dest TEXT NOT NULL,
                path TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'unclaimed',
                reason TEXT NOT NULL DEFAULT '',
                original_status TEXT,
                claimed INTEGER NOT NULL DEFAULT 0,
                claimant TEXT,
                claim_timestamp TEXT,
                create_timestamp TEXT NOT NULL,
                update_timestamp TEXT NOT NULL,
                work_priority_timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_requests_pop
                ON transfer_requests(status, claimed, work_priority_timestamp);
        "#,
        )?;
        Ok(())
    }

    pub fn create(&self, new: &NewTransferRequest) -> Result<TransferRequest> {
        if new.source.is_empty() || new.dest.is_empty() || new.path.is_empty() {
            return Err(StoreError::Invalid(
                "source, dest and path must not be empty".to_string(),
            ));
        }
        let conn = self.connect()?;
        let request = TransferRequest {
            uuid: unique_id(),
            source: new.source.clone(),
            dest: new.dest.clone(),
            path: new.path.clone(),
            status: RequestStatus::Unclaimed,
            reason: String::new(),
            claimed: false,
            claimant: None,
            claim_timestamp: None,
            original_status: None,
            create_timestamp: now(),
            update_timestamp: now(),
            work_priority_timestamp: now(),
        };
        conn.execute(
            r#"
            INSERT INTO transfer_requests (
                uuid, source, dest, path, status,
                create_timestamp, update_timestamp, work_priority_timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                request.uuid,
                request.source,
                request.dest,
                request.path,
                request.status.as_str(),
                request.create_timestamp,
                request.update_timestamp,
                request.work_priority_timestamp,
            ],
        )?;
        Ok(request)
    }

    pub fn get(&self, uuid: &str) -> Result<TransferRequest> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT * FROM transfer_requests WHERE uuid = ?",
            params![uuid],
            row_to_request,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("TransferRequest {uuid}")))
    }

    pub fn list(&self) -> Result<Vec<TransferRequest>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT * FROM transfer_requests ORDER BY create_timestamp ASC, id ASC")?;
        let requests = stmt
            .query_map([], row_to_request)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(requests)
    }

    /// Claim the next unclaimed request for a source site, oldest work
    /// priority first. The claim also moves the request to `processing`.
    pub fn pop(
        &self,
        source: Option<&str>,
        dest: Option<&str>,
        claimant: &str,
    ) -> Result<Option<TransferRequest>> {
        let conn = self.connect()?;
        immediate(&conn, |conn| {
            let candidate = conn
                .query_row(
                    r#"
                    SELECT * FROM transfer_requests
                    WHERE status = 'unclaimed' AND claimed = 0
                    AND (?1 IS NULL OR source = ?1)
                    AND (?2 IS NULL OR dest = ?2)
                    ORDER BY work_priority_timestamp ASC, id ASC
                    LIMIT 1
                    "#,
                    params![source, dest],
                    row_to_request,
                )
                .optional()?;

            let Some(mut request) = candidate else {
                return Ok(None);
            };

            let right_now = now();
            let updated = conn.execute(
                r#"
                UPDATE transfer_requests
                SET status = 'processing', claimed = 1, claimant = ?,
                    claim_timestamp = ?, update_timestamp = ?
                WHERE uuid = ? AND claimed = 0
                "#,
                params![claimant, right_now, right_now, request.uuid],
            )?;
            if updated != 1 {
                return Ok(None);
            }
            request.status = RequestStatus::Processing;
            request.claimed = true;
            request.claimant = Some(claimant.to_string());
            request.claim_timestamp = Some(right_now.clone());
            request.update_timestamp = right_now;
            Ok(Some(request))
        })
    }

    /// Apply a partial update with the same fencing and transition rules
    /// as bundles.
    pub fn patch(&self, uuid: &str, patch: &RequestPatch) -> Result<TransferRequest> {
        let conn = self.connect()?;
        immediate(&conn, |conn| {
            let current = conn
                .query_row(
                    "SELECT * FROM transfer_requests WHERE uuid = ?",
                    params![uuid],
                    row_to_request,
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("TransferRequest {uuid}")))?;

            if current.claimed && patch.claimant.as_deref() != current.claimant.as_deref() {
                return Err(StoreError::Conflict(format!(
                    "TransferRequest {uuid} is claimed by {}",
                    current.claimant.as_deref().unwrap_or("(unknown)")
                )));
            }
            if patch.claimed == Some(true) {
                return Err(StoreError::Invalid(
                    "claims can only be taken via actions/pop".to_string(),
                ));
            }

            let mut next = current.clone();
            if let Some(status) = patch.status {
                validate_transition(&current, status, patch)?;
                if status == RequestStatus::Quarantined {
                    if current.status != RequestStatus::Quarantined {
                        next.original_status =
                            Some(patch.original_status.unwrap_or(current.status));
                    }
                    next.claimed = false;
                } else if current.status == RequestStatus::Quarantined {
                    next.original_status = None;
                    next.reason = String::new();
                }
                next.status = status;
            }
            if let Some(reason) = &patch.reason {
                next.reason = reason.clone();
            }
            if patch.claimed == Some(false) {
                next.claimed = false;
            }
            if let Some(wpt) = &patch.work_priority_timestamp {
                next.work_priority_timestamp = wpt.clone();
            }
            if !next.claimed {
                next.claimant = None;
                next.claim_timestamp = None;
            }
            next.update_timestamp = now();

            conn.execute(
                r#"
                UPDATE transfer_requests SET
                    status = ?, reason = ?, original_status = ?,
                    claimed = ?, claimant = ?, claim_timestamp = ?,
                    update_timestamp = ?, work_priority_timestamp = ?
                WHERE uuid = ?
                "#,
                params![
                    next.status.as_str(),
                    next.reason,
                    next.original_status.map(|s| s.as_str()),
                    next.claimed as i64,
                    next.claimant,
                    next.claim_timestamp,
                    next.update_timestamp,
                    next.work_priority_timestamp,
                    uuid,
                ],
            )?;
            Ok(next)
        })
    }

    pub fn delete(&self, uuid: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "DELETE FROM transfer_requests WHERE uuid = ?",
            params![uuid],
        )?;
        Ok(())
    }

    /// Release claims older than `max_claim_age`. A reaped request also
    /// returns to `unclaimed` so a picker can take it over.
    pub fn release_stale_claims(&self, max_claim_age: Duration) -> Result<Vec<String>> {
        let cutoff = format_timestamp(
            Utc::now() - chrono::Duration::seconds(max_claim_age.as_secs() as i64),
        );
        let conn = self.connect()?;
        immediate(&conn, |conn| {
            let mut stmt = conn.prepare(
                "SELECT uuid FROM transfer_requests WHERE claimed = 1 AND claim_timestamp < ?",
            )?;
            let stale: Vec<String> = stmt
                .query_map(params![cutoff], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for uuid in &stale {
                conn.execute(
                    r#"
                    UPDATE transfer_requests
                    SET claimed = 0, claimant = NULL, claim_timestamp = NULL,
                        status = CASE WHEN status = 'processing' THEN 'unclaimed' ELSE status END,
                        update_timestamp = ?
                    WHERE uuid = ?
                    "#,
                    params![now(), uuid],
                )?;
            }
            Ok(stale)
        })
    }
}

fn validate_transition(
    current: &TransferRequest,
    next: RequestStatus,
    patch: &RequestPatch,
) -> Result<()> {
    if next == current.status || next == RequestStatus::Quarantined {
        return Ok(());
    }
    if current.status == RequestStatus::Quarantined {
        let original = patch.original_status.or(current.original_status);
        if original == Some(next) {
            return Ok(());
        }
        return Err(StoreError::Conflict(format!(
            "TransferRequest {} may only be restored to {}",
            current.uuid,
            current
                .original_status
                .map(|s| s.as_str())
                .unwrap_or("(unset)")
        )));
    }
    if current.status.can_advance_to(next) {
        return Ok(());
    }
    Err(StoreError::Conflict(format!(
        "TransferRequest {} cannot move from {} to {}",
        current.uuid,
        current.status.as_str(),
        next.as_str()
    )))
}

fn row_to_request(row: &Row) -> rusqlite::Result<TransferRequest> {
    let status: String = row.get("status")?;
    let original_status: Option<String> = row.get("original_status")?;
    Ok(TransferRequest {
        uuid: row.get("uuid")?,
        source: row.get("source")?,
        dest: row.get("dest")?,
        path: row.get("path")?,
        status: RequestStatus::from_str(&status).unwrap_or(RequestStatus::Quarantined),
        reason: row.get("reason")?,
        claimed: row.get::<_, i64>("claimed")? != 0,
        claimant: row.get("claimant")?,
        claim_timestamp: row.get("claim_timestamp")?,
        original_status: original_status.as_deref().and_then(RequestStatus::from_str),
        create_timestamp: row.get("create_timestamp")?,
        update_timestamp: row.get("update_timestamp")?,
        work_priority_timestamp: row.get("work_priority_timestamp")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_request(path: &str) -> NewTransferRequest {
        NewTransferRequest {
            source: "WIPAC".to_string(),
            dest: "NERSC".to_string(),
            path: path.to_string(),
        }
    }

    #[test]
    fn test_create_rejects_empty_fields() {
        let dir = tempdir().unwrap();
        let repo = RequestRepository::new(&dir.path().join("test.db")).unwrap();
        let bad = NewTransferRequest {
            source: String::new(),
            dest: "NERSC".to_string(),
            path: "/data".to_string(),
        };
        assert!(matches!(repo.create(&bad), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn test_pop_moves_to_processing() {
        let dir = tempdir().unwrap();
        let repo = RequestRepository::new(&dir.path().join("test.db")).unwrap();
        let created = repo.create(&new_request("/data/exp/a")).unwrap();

        let popped = repo.pop(Some("WIPAC"), None, "picker-1").unwrap().unwrap();
        assert_eq!(popped.uuid, created.uuid);
        assert_eq!(popped.status, RequestStatus::Processing);
        assert!(popped.claimed);

        // no second claim while held
        assert!(repo.pop(Some("WIPAC"), None, "picker-2").unwrap().is_none());
    }

    #[test]
    fn test_priority_reset_biases_pop_order() {
        let dir = tempdir().unwrap();
        let repo = RequestRepository::new(&dir.path().join("test.db")).unwrap();
        let a = repo.create(&new_request("/data/exp/a")).unwrap();
        let b = repo.create(&new_request("/data/exp/b")).unwrap();

        // admin resets A's priority to a value newer than B's
        repo.patch(
            &a.uuid,
            &RequestPatch {
                work_priority_timestamp: Some(format_timestamp(
                    Utc::now() + chrono::Duration::hours(1),
                )),
                ..Default::default()
            },
        )
        .unwrap();

        let first = repo.pop(Some("WIPAC"), None, "picker-1").unwrap().unwrap();
        assert_eq!(first.uuid, b.uuid);
    }

    #[test]
    fn test_quarantine_roundtrip() {
        let dir = tempdir().unwrap();
        let repo = RequestRepository::new(&dir.path().join("test.db")).unwrap();
        let request = repo.create(&new_request("/data/exp/a")).unwrap();
        repo.pop(Some("WIPAC"), None, "picker-1").unwrap().unwrap();

        let quarantined = repo
            .patch(
                &request.uuid,
                &RequestPatch {
                    claimant: Some("picker-1".to_string()),
                    status: Some(RequestStatus::Quarantined),
                    reason: Some("picker: no files in catalog under path".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(quarantined.original_status, Some(RequestStatus::Processing));

        let restored = repo
            .patch(
                &request.uuid,
                &RequestPatch {
                    status: Some(RequestStatus::Processing),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(restored.status, RequestStatus::Processing);
        assert_eq!(restored.original_status, None);
        assert_eq!(restored.reason, "");
    }

    #[test]
    fn test_reaper_returns_request_to_unclaimed() {
        let dir = tempdir().unwrap();
        let repo = RequestRepository::new(&dir.path().join("test.db")).unwrap();
        let request = repo.create(&new_request("/data/exp/a")).unwrap();
        repo.pop(Some("WIPAC"), None, "picker-1").unwrap().unwrap();

        let conn = repo.connect().unwrap();
        let old = format_timestamp(Utc::now() - chrono::Duration::hours(13));
        conn.execute(
            "UPDATE transfer_requests SET claim_timestamp = ? WHERE uuid = ?",
            params![old, request.uuid],
        )
        .unwrap();

        let reaped = repo
            .release_stale_claims(Duration::from_secs(3600))
            .unwrap();
        assert_eq!(reaped, vec![request.uuid.clone()]);

        let again = repo.pop(Some("WIPAC"), None, "picker-2").unwrap().unwrap();
        assert_eq!(again.uuid, request.uuid);
    }
}
