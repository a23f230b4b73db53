//! Bundle repository: storage, claims, and state transitions.
//!
//! POP is the load-bearing primitive. The select-and-mark runs inside a
//! `BEGIN IMMEDIATE` transaction with a `claimed = 0` predicate on the
//! update, so at most one claimant wins a bundle per claim window.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{immediate, Result, StoreError};
use crate::models::{format_timestamp, now, unique_id, Bundle, BundlePatch, BundleStatus, Checksum, NewBundle};

/// Filters for listing bundles.
#[derive(Debug, Clone, Default)]
pub struct BundleFilter {
    pub request: Option<String>,
    pub status: Option<BundleStatus>,
    pub verified: Option<bool>,
    /// Prefix match on the source site.
    pub location: Option<String>,
    /// Pagination: return bundles with uuid greater than this, uuid order.
    pub after: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite-backed repository for bundles.
pub struct BundleRepository {
    db_path: PathBuf,
}

impl BundleRepository {
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
            -- Bundles walking the pipeline
            CREATE TABLE IF NOT EXISTS bundles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                request TEXT NOT NULL,
                source TEXT NOT NULL,
                dest TEXT NOT NULL,
                path TEXT NOT NULL,

                -- Artifact, once materialised
                bundle_path TEXT,
                size INTEGER,
                checksum TEXT,
                file_count INTEGER NOT NULL DEFAULT 0,

                -- State
                status TEXT NOT NULL,
                reason TEXT NOT NULL DEFAULT '',
                verified INTEGER NOT NULL DEFAULT 0,
                original_status TEXT,

                -- Claim discipline
                claimed INTEGER NOT NULL DEFAULT 0,
                claimant TEXT,
                claim_timestamp TEXT,

                -- Timing
                create_timestamp TEXT NOT NULL,
                update_timestamp TEXT NOT NULL,
                work_priority_timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_bundles_pop
                ON bundles(status, claimed, work_priority_timestamp);
            CREATE INDEX IF NOT EXISTS idx_bundles_request
                ON bundles(request);
            CREATE INDEX IF NOT EXISTS idx_bundles_source
                ON bundles(source);
        "#,
        )?;
        Ok(())
    }

    /// Atomically insert the bundles produced by a single picker or
    /// locator run. Returns the assigned uuids.
    pub fn bulk_create(&self, bundles: &[NewBundle]) -> Result<Vec<String>> {
        if bundles.is_empty() {
            return Err(StoreError::Invalid("bundles field is empty".to_string()));
        }
        let conn = self.connect()?;
        immediate(&conn, |conn| {
            let mut uuids = Vec::with_capacity(bundles.len());
            for bundle in bundles {
                let uuid = unique_id();
                let right_now = now();
                conn.execute(
                    r#"
                    INSERT INTO bundles (
                        uuid, request, source, dest, path,
                        bundle_path, size, checksum, file_count,
                        status, create_timestamp, update_timestamp,
                        work_priority_timestamp
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                    params![
                        uuid,
                        bundle.request,
                        bundle.source,
                        bundle.dest,
                        bundle.path,
                        bundle.bundle_path,
                        bundle.size,
                        bundle
                            .checksum
                            .as_ref()
                            .map(|c| serde_json::to_string(c).unwrap_or_default()),
                        bundle.file_count,
                        bundle.status.as_str(),
                        right_now,
                        right_now,
                        right_now,
                    ],
                )?;
                uuids.push(uuid);
            }
            Ok(uuids)
        })
    }

    pub fn get(&self, uuid: &str) -> Result<Bundle> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT * FROM bundles WHERE uuid = ?",
            params![uuid],
            row_to_bundle,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("Bundle {uuid}")))
    }

    pub fn list(&self, filter: &BundleFilter) -> Result<Vec<Bundle>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM bundles
            WHERE (?1 IS NULL OR request = ?1)
            AND (?2 IS NULL OR status = ?2)
            AND (?3 IS NULL OR verified = ?3)
            AND (?4 IS NULL OR source LIKE ?4 || '%')
            AND (?5 IS NULL OR uuid > ?5)
            ORDER BY uuid ASC
            LIMIT ?6
            "#,
        )?;
        let bundles = stmt
            .query_map(
                params![
                    filter.request,
                    filter.status.map(|s| s.as_str()),
                    filter.verified.map(|v| v as i64),
                    filter.location,
                    filter.after,
                    filter.limit.map(i64::from).unwrap_or(-1),
                ],
                row_to_bundle,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(bundles)
    }

    /// Claim the next available bundle in `status`, oldest work priority
    /// first, then insertion order. Returns `None` when nothing matches.
    pub fn pop(
        &self,
        status: BundleStatus,
        source: Option<&str>,
        dest: Option<&str>,
        claimant: &str,
    ) -> Result<Option<Bundle>> {
        let conn = self.connect()?;
        immediate(&conn, |conn| {
            let candidate = conn
                .query_row(
                    r#"
                    SELECT * FROM bundles
                    WHERE status = ?1 AND claimed = 0
                    AND (?2 IS NULL OR source = ?2)
                    AND (?3 IS NULL OR dest = ?3)
                    ORDER BY work_priority_timestamp ASC, id ASC
                    LIMIT 1
                    "#,
                    params![status.as_str(), source, dest],
                    row_to_bundle,
                )
                .optional()?;

            let Some(mut bundle) = candidate else {
                return Ok(None);
            };

            let right_now = now();
            let updated = conn.execute(
                r#"
                UPDATE bundles
                SET claimed = 1, claimant = ?, claim_timestamp = ?, update_timestamp = ?
                WHERE uuid = ? AND claimed = 0
                "#,
                params![claimant, right_now, right_now, bundle.uuid],
            )?;
            if updated != 1 {
                return Ok(None);
            }
            bundle.claimed = true;
            bundle.claimant = Some(claimant.to_string());
            bundle.claim_timestamp = Some(right_now.clone());
            bundle.update_timestamp = right_now;
            Ok(Some(bundle))
        })
    }

    /// Apply a partial update.
    ///
    /// Enforces the coordinator's invariants: claim fencing, pipeline
    /// transition legality, quarantine bookkeeping, and checksum
    /// immutability. Returns the updated bundle.
    pub fn patch(&self, uuid: &str, patch: &BundlePatch) -> Result<Bundle> {
        let conn = self.connect()?;
        immediate(&conn, |conn| {
            let current = conn
                .query_row(
                    "SELECT * FROM bundles WHERE uuid = ?",
                    params![uuid],
                    row_to_bundle,
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("Bundle {uuid}")))?;

            // Fencing: writes to a claimed bundle must come from its claimant.
            if current.claimed && patch.claimant.as_deref() != current.claimant.as_deref() {
                return Err(StoreError::Conflict(format!(
                    "Bundle {uuid} is claimed by {}",
                    current.claimant.as_deref().unwrap_or("(unknown)")
                )));
            }

            // Claims are only ever taken through POP.
            if patch.claimed == Some(true) {
                return Err(StoreError::Invalid(
                    "claims can only be taken via actions/pop".to_string(),
                ));
            }

            let mut next = current.clone();

            if let Some(status) = patch.status {
                validate_transition(&current, status, patch)?;
                if status == BundleStatus::Quarantined {
                    if current.status != BundleStatus::Quarantined {
                        next.original_status =
                            Some(patch.original_status.unwrap_or(current.status));
                    }
                    // quarantine always releases the claim
                    next.claimed = false;
                } else if current.status == BundleStatus::Quarantined {
                    // un-quarantine restores and clears the side-state
                    next.original_status = None;
                    next.reason = String::new();
                }
                next.status = status;
            }

            if let Some(checksum) = &patch.checksum {
                match &current.checksum {
                    Some(existing) if existing != checksum => {
                        return Err(StoreError::Conflict(format!(
                            "Bundle {uuid} checksum is immutable once set"
                        )));
                    }
                    _ => next.checksum = Some(checksum.clone()),
                }
            }

            if let Some(reason) = &patch.reason {
                next.reason = reason.clone();
            }
            if let Some(bundle_path) = &patch.bundle_path {
                next.bundle_path = Some(bundle_path.clone());
            }
            if let Some(size) = patch.size {
                next.size = Some(size);
            }
            if let Some(verified) = patch.verified {
                next.verified = verified;
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
                UPDATE bundles SET
                    bundle_path = ?, size = ?, checksum = ?,
                    status = ?, reason = ?, verified = ?, original_status = ?,
                    claimed = ?, claimant = ?, claim_timestamp = ?,
                    update_timestamp = ?, work_priority_timestamp = ?
                WHERE uuid = ?
                "#,
                params![
                    next.bundle_path,
                    next.size,
                    next.checksum
                        .as_ref()
                        .map(|c| serde_json::to_string(c).unwrap_or_default()),
                    next.status.as_str(),
                    next.reason,
                    next.verified as i64,
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
        conn.execute("DELETE FROM bundles WHERE uuid = ?", params![uuid])?;
        Ok(())
    }

    /// Count bundles per status, for dashboards.
    pub fn status_counts(&self) -> Result<Vec<(String, u64)>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM bundles GROUP BY status ORDER BY status")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// Release claims older than `max_claim_age`. Returns the released
    /// uuids. Never touches `status`; a reaped bundle simply becomes
    /// claimable again.
    pub fn release_stale_claims(&self, max_claim_age: Duration) -> Result<Vec<String>> {
        let cutoff = format_timestamp(
            Utc::now() - chrono::Duration::seconds(max_claim_age.as_secs() as i64),
        );
        let conn = self.connect()?;
        immediate(&conn, |conn| {
            let mut stmt = conn.prepare(
                "SELECT uuid FROM bundles WHERE claimed = 1 AND claim_timestamp < ?",
            )?;
            let stale: Vec<String> = stmt
                .query_map(params![cutoff], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for uuid in &stale {
                conn.execute(
                    r#"
                    UPDATE bundles
                    SET claimed = 0, claimant = NULL, claim_timestamp = NULL,
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

/// Check that a status change is legal from `current`.
fn validate_transition(
    current: &Bundle,
    next: BundleStatus,
    patch: &BundlePatch,
) -> Result<()> {
    if next == current.status {
        return Ok(());
    }
    if next == BundleStatus::Quarantined {
        return Ok(());
    }
    if current.status == BundleStatus::Quarantined {
        // only the recorded original status may be restored
        let original = patch.original_status.or(current.original_status);
        if original == Some(next) {
            return Ok(());
        }
        return Err(StoreError::Conflict(format!(
            "Bundle {} may only be restored to {}",
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
        "Bundle {} cannot move from {} to {}",
        current.uuid,
        current.status.as_str(),
        next.as_str()
    )))
}

fn row_to_bundle(row: &Row) -> rusqlite::Result<Bundle> {
    let checksum: Option<String> = row.get("checksum")?;
    let status: String = row.get("status")?;
    let original_status: Option<String> = row.get("original_status")?;
    Ok(Bundle {
        uuid: row.get("uuid")?,
        request: row.get("request")?,
        source: row.get("source")?,
        dest: row.get("dest")?,
        path: row.get("path")?,
        bundle_path: row.get("bundle_path")?,
        size: row.get::<_, Option<i64>>("size")?.map(|s| s as u64),
        checksum: checksum.and_then(|c| serde_json::from_str::<Checksum>(&c).ok()),
        file_count: row.get::<_, i64>("file_count")? as u64,
        status: BundleStatus::from_str(&status).unwrap_or(BundleStatus::Quarantined),
        reason: row.get("reason")?,
        verified: row.get::<_, i64>("verified")? != 0,
        claimed: row.get::<_, i64>("claimed")? != 0,
        claimant: row.get("claimant")?,
        claim_timestamp: row.get("claim_timestamp")?,
        original_status: original_status.as_deref().and_then(BundleStatus::from_str),
        create_timestamp: row.get("create_timestamp")?,
        update_timestamp: row.get("update_timestamp")?,
        work_priority_timestamp: row.get("work_priority_timestamp")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn repo_with_bundles(count: usize, status: BundleStatus) -> (BundleRepository, Vec<String>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = BundleRepository::new(&dir.path().join("test.db")).unwrap();
        let new: Vec<NewBundle> = (0..count)
            .map(|_| NewBundle {
                request: "req-1".to_string(),
                source: "WIPAC".to_string(),
                dest: "NERSC".to_string(),
                path: "/data/exp/IceCube/2013/filtered/PFFilt/1109".to_string(),
                status,
                file_count: 2,
                bundle_path: None,
                size: Some(1024),
                checksum: None,
            })
            .collect();
        let uuids = if count > 0 {
            repo.bulk_create(&new).unwrap()
        } else {
            Vec::new()
        };
        (repo, uuids, dir)
    }

    #[test]
    fn test_bulk_create_rejects_empty() {
        let dir = tempdir().unwrap();
        let repo = BundleRepository::new(&dir.path().join("test.db")).unwrap();
        assert!(matches!(
            repo.bulk_create(&[]),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn test_pop_claims_exclusively() {
        let (repo, uuids, _dir) = repo_with_bundles(1, BundleStatus::Specified);

        let first = repo
            .pop(BundleStatus::Specified, Some("WIPAC"), None, "worker-a")
            .unwrap();
        assert_eq!(first.as_ref().map(|b| b.uuid.as_str()), Some(uuids[0].as_str()));
        assert!(first.unwrap().claimed);

        // a second pop in the same claim window gets nothing
        let second = repo
            .pop(BundleStatus::Specified, Some("WIPAC"), None, "worker-b")
            .unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn test_concurrent_pops_win_distinct_bundles() {
        let bundles = 4;
        let workers = 8;
        let (repo, _uuids, dir) = repo_with_bundles(bundles, BundleStatus::Specified);
        drop(repo);

        let db_path = dir.path().join("test.db");
        let handles: Vec<_> = (0..workers)
            .map(|i| {
                let db_path = db_path.clone();
                std::thread::spawn(move || {
                    let repo = BundleRepository::new(&db_path).unwrap();
                    repo.pop(
                        BundleStatus::Specified,
                        None,
                        None,
                        &format!("worker-{i}"),
                    )
                    .unwrap()
                    .map(|b| b.uuid)
                })
            })
            .collect();

        let mut won: Vec<String> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        won.sort();
        let total = won.len();
        won.dedup();
        // exactly min(N, M) distinct wins
        assert_eq!(total, bundles);
        assert_eq!(won.len(), bundles);
    }

    #[test]
    fn test_pop_honors_priority_then_insertion_order() {
        let (repo, uuids, _dir) = repo_with_bundles(2, BundleStatus::Specified);

        // reset the first bundle's priority to be newer than the second's
        let newer = format_timestamp(Utc::now() + chrono::Duration::hours(1));
        repo.patch(
            &uuids[0],
            &BundlePatch {
                work_priority_timestamp: Some(newer),
                ..Default::default()
            },
        )
        .unwrap();

        let bundle = repo
            .pop(BundleStatus::Specified, None, None, "worker-a")
            .unwrap()
            .unwrap();
        assert_eq!(bundle.uuid, uuids[1]);
    }

    #[test]
    fn test_patch_fencing_rejects_stale_claimant() {
        let (repo, uuids, _dir) = repo_with_bundles(1, BundleStatus::Specified);
        repo.pop(BundleStatus::Specified, None, None, "worker-a")
            .unwrap()
            .unwrap();

        let patch = BundlePatch {
            claimant: Some("worker-b".to_string()),
            status: Some(BundleStatus::Created),
            claimed: Some(false),
            ..Default::default()
        };
        assert!(matches!(
            repo.patch(&uuids[0], &patch),
            Err(StoreError::Conflict(_))
        ));

        // the live claimant's patch succeeds
        let patch = BundlePatch {
            claimant: Some("worker-a".to_string()),
            status: Some(BundleStatus::Created),
            claimed: Some(false),
            ..Default::default()
        };
        let updated = repo.patch(&uuids[0], &patch).unwrap();
        assert_eq!(updated.status, BundleStatus::Created);
        assert!(!updated.claimed);
        assert!(updated.claimant.is_none());
        assert!(updated.claim_timestamp.is_none());
    }

    #[test]
    fn test_patch_rejects_illegal_transition() {
        let (repo, uuids, _dir) = repo_with_bundles(1, BundleStatus::Specified);
        let patch = BundlePatch {
            status: Some(BundleStatus::Taping),
            ..Default::default()
        };
        assert!(matches!(
            repo.patch(&uuids[0], &patch),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_quarantine_roundtrip_restores_original_status() {
        let (repo, uuids, _dir) = repo_with_bundles(1, BundleStatus::Specified);
        repo.pop(BundleStatus::Specified, None, None, "worker-a")
            .unwrap()
            .unwrap();

        let quarantine = BundlePatch {
            claimant: Some("worker-a".to_string()),
            status: Some(BundleStatus::Quarantined),
            reason: Some("bundler: checksum mismatch on source file".to_string()),
            work_priority_timestamp: Some(now()),
            ..Default::default()
        };
        let bundle = repo.patch(&uuids[0], &quarantine).unwrap();
        assert_eq!(bundle.status, BundleStatus::Quarantined);
        assert_eq!(bundle.original_status, Some(BundleStatus::Specified));
        assert!(!bundle.claimed, "quarantine releases the claim");

        // restoring to anything but the original status is rejected
        let wrong = BundlePatch {
            status: Some(BundleStatus::Created),
            ..Default::default()
        };
        assert!(repo.patch(&uuids[0], &wrong).is_err());

        // admin un-quarantine restores and clears the side-state
        let restore = BundlePatch {
            status: Some(BundleStatus::Specified),
            ..Default::default()
        };
        let bundle = repo.patch(&uuids[0], &restore).unwrap();
        assert_eq!(bundle.status, BundleStatus::Specified);
        assert_eq!(bundle.original_status, None);
        assert_eq!(bundle.reason, "");

        // and the bundle is claimable again
        assert!(repo
            .pop(BundleStatus::Specified, None, None, "worker-b")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_checksum_is_immutable_once_set() {
        let (repo, uuids, _dir) = repo_with_bundles(1, BundleStatus::Specified);
        let checksum = Checksum {
            sha512: "abc".to_string(),
            adler32: "0001".to_string(),
        };
        repo.patch(
            &uuids[0],
            &BundlePatch {
                checksum: Some(checksum.clone()),
                ..Default::default()
            },
        )
        .unwrap();

        // identical re-patch is fine (idempotent worker retry)
        repo.patch(
            &uuids[0],
            &BundlePatch {
                checksum: Some(checksum),
                ..Default::default()
            },
        )
        .unwrap();

        // a different value is rejected
        let other = BundlePatch {
            checksum: Some(Checksum {
                sha512: "def".to_string(),
                adler32: "0002".to_string(),
            }),
            ..Default::default()
        };
        assert!(matches!(
            repo.patch(&uuids[0], &other),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_patch_cannot_take_a_claim() {
        let (repo, uuids, _dir) = repo_with_bundles(1, BundleStatus::Specified);
        let patch = BundlePatch {
            claimed: Some(true),
            ..Default::default()
        };
        assert!(matches!(
            repo.patch(&uuids[0], &patch),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn test_reaper_releases_stale_claims() {
        let (repo, uuids, _dir) = repo_with_bundles(1, BundleStatus::Specified);
        repo.pop(BundleStatus::Specified, None, None, "worker-a")
            .unwrap()
            .unwrap();

        // nothing is stale yet
        assert!(repo
            .release_stale_claims(Duration::from_secs(3600))
            .unwrap()
            .is_empty());

        // back-date the claim and reap it
        let conn = repo.connect().unwrap();
        let old = format_timestamp(Utc::now() - chrono::Duration::hours(13));
        conn.execute(
            "UPDATE bundles SET claim_timestamp = ? WHERE uuid = ?",
            params![old, uuids[0]],
        )
        .unwrap();
        let reaped = repo.release_stale_claims(Duration::from_secs(3600)).unwrap();
        assert_eq!(reaped, uuids);

        // a fresh pop returns the bundle to a new worker
        let bundle = repo
            .pop(BundleStatus::Specified, None, None, "worker-b")
            .unwrap()
            .unwrap();
        assert_eq!(bundle.claimant.as_deref(), Some("worker-b"));

        // the first worker's late patch is rejected
        let late = BundlePatch {
            claimant: Some("worker-a".to_string()),
            status: Some(BundleStatus::Created),
            claimed: Some(false),
            ..Default::default()
        };
        assert!(matches!(
            repo.patch(&uuids[0], &late),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_list_filters_and_pagination() {
        let (repo, mut uuids, _dir) = repo_with_bundles(3, BundleStatus::Specified);
        uuids.sort();

        let all = repo.list(&BundleFilter::default()).unwrap();
        assert_eq!(all.len(), 3);

        let page = repo
            .list(&BundleFilter {
                after: Some(uuids[0].clone()),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].uuid, uuids[1]);

        let none = repo
            .list(&BundleFilter {
                status: Some(BundleStatus::Taping),
                ..Default::default()
            })
            .unwrap();
        assert!(none.is_empty());

        let by_request = repo
            .list(&BundleFilter {
                request: Some("req-1".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_request.len(), 3);
    }

    #[test]
    fn test_full_archival_walk() {
        let (repo, uuids, _dir) = repo_with_bundles(1, BundleStatus::Specified);
        let uuid = &uuids[0];
        let path = [
            BundleStatus::Created,
            BundleStatus::Staged,
            BundleStatus::Transferring,
            BundleStatus::Taping,
            BundleStatus::Verifying,
            BundleStatus::Completed,
            BundleStatus::SourceDeleted,
            BundleStatus::Deleted,
            BundleStatus::Finished,
        ];

        let mut observed = vec![BundleStatus::Specified];
        for (stage_index, next) in path.iter().enumerate() {
            let claimant = format!("worker-{stage_index}");
            let current = observed[observed.len() - 1];
            let claimed = repo
                .pop(current, Some("WIPAC"), Some("NERSC"), &claimant)
                .unwrap()
                .expect("bundle should be claimable at every stage");
            assert_eq!(&claimed.uuid, uuid);

            let mut patch = BundlePatch {
                claimant: Some(claimant),
                status: Some(*next),
                claimed: Some(false),
                ..Default::default()
            };
            if *next == BundleStatus::Created {
                patch.checksum = Some(Checksum {
                    sha512: "c".repeat(128),
                    adler32: "11e60398".to_string(),
                });
                patch.size = Some(4096);
                patch.bundle_path = Some("/work/outbox/b.tar".to_string());
            }
            let updated = repo.patch(uuid, &patch).unwrap();
            observed.push(updated.status);
        }

        // every observed transition is a legal edge of the pipeline graph
        for pair in observed.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]));
        }
        assert_eq!(observed[observed.len() - 1], BundleStatus::Finished);

        // the checksum recorded at creation survived every later patch
        let terminal = repo.get(uuid).unwrap();
        assert_eq!(terminal.checksum.unwrap().sha512, "c".repeat(128));
    }

    #[test]
    fn test_status_counts() {
        let (repo, uuids, _dir) = repo_with_bundles(2, BundleStatus::Specified);
        repo.pop(BundleStatus::Specified, None, None, "w").unwrap();
        repo.patch(
            &uuids[0],
            &BundlePatch {
                claimant: Some("w".to_string()),
                status: Some(BundleStatus::Created),
                claimed: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        let counts = repo.status_counts().unwrap();
        assert!(counts.contains(&("created".to_string(), 1)));
        assert!(counts.contains(&("specified".to_string(), 1)));
    }
}
