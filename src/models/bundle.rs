//! Bundle model and its pipeline state machine.
//!
//! A bundle is a group of source files assembled into one archive for
//! transfer and storage. Bundles walk a linear pipeline of statuses; the
//! coordinator is the only authority for transitions.

use serde::{Deserialize, Serialize};

/// Pipeline status of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleStatus {
    /// Pseudo-status configured as the picker's and locator's input;
    /// no bundle document ever carries it.
    Ethereal,
    /// Picker has enumerated the files; no on-disk artifact yet.
    Specified,
    /// Locator found the bundle in a remote archive (retrieval entry).
    Located,
    /// Bundler materialised the archive on working disk.
    Created,
    /// Artifact moved into the staging directory.
    Staged,
    /// Byte mover has copied the artifact to the destination site.
    Transferring,
    /// Awaiting the tape write at the destination.
    Taping,
    /// Written to tape; awaiting tape-side verification.
    Verifying,
    /// Awaiting expansion into the warehouse (retrieval).
    Unpacking,
    /// Fully archived (or fully unpacked).
    Completed,
    /// Source staging copy removed.
    SourceDeleted,
    /// Destination staging copy removed.
    Deleted,
    /// Terminal.
    Finished,
    /// Side-state for failed work pending admin intervention.
    Quarantined,
}

impl BundleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ethereal => "ethereal",
            Self::Specified => "specified",
            Self::Located => "located",
            Self::Created => "created",
            Self::Staged => "staged",
            Self::Transferring => "transferring",
            Self::Taping => "taping",
            Self::Verifying => "verifying",
            Self::Unpacking => "unpacking",
            Self::Completed => "completed",
            Self::SourceDeleted => "source-deleted",
            Self::Deleted => "deleted",
            Self::Finished => "finished",
            Self::Quarantined => "quarantined",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ethereal" => Some(Self::Ethereal),
            "specified" => Some(Self::Specified),
            "located" => Some(Self::Located),
            "created" => Some(Self::Created),
            "staged" => Some(Self::Staged),
            "transferring" => Some(Self::Transferring),
            "taping" => Some(Self::Taping),
            "verifying" => Some(Self::Verifying),
            "unpacking" => Some(Self::Unpacking),
            "completed" => Some(Self::Completed),
            "source-deleted" => Some(Self::SourceDeleted),
            "deleted" => Some(Self::Deleted),
            "finished" => Some(Self::Finished),
            "quarantined" => Some(Self::Quarantined),
            _ => None,
        }
    }

    /// Whether a direct pipeline transition to `next` is legal.
    ///
    /// Quarantine and un-quarantine are not pipeline transitions; they are
    /// validated separately against `original_status`.
    pub fn can_advance_to(self, next: BundleStatus) -> bool {
        use BundleStatus::*;
        matches!(
            (self, next),
            (Specified, Created)
                | (Created, Staged)
                | (Located, Staged)
                | (Staged, Transferring)
                | (Transferring, Taping)
                | (Transferring, Unpacking)
                | (Taping, Verifying)
                | (Verifying, Completed)
                | (Unpacking, Completed)
                | (Completed, SourceDeleted)
                | (SourceDeleted, Deleted)
                | (Deleted, Finished)
        )
    }
}

/// Checksums recorded when the archive is materialised; immutable once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub sha512: String,
    pub adler32: String,
}

/// A bundle document as stored by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub uuid: String,
    /// TransferRequest that spawned this bundle.
    pub request: String,
    pub source: String,
    pub dest: String,
    /// Dataset path the bundle covers.
    pub path: String,
    /// On-disk (or on-tape) artifact, once materialised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    /// Number of files enumerated into the Metadata side-table.
    #[serde(default)]
    pub file_count: u64,
    pub status: BundleStatus,
    /// Quarantine explanation, empty when healthy.
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub verified: bool,
    pub claimed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_timestamp: Option<String>,
    /// Status held before quarantine; present iff quarantined.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_status: Option<BundleStatus>,
    pub create_timestamp: String,
    pub update_timestamp: String,
    /// Age-biasing key; POP serves the oldest value first.
    pub work_priority_timestamp: String,
}

/// A bundle document submitted to bulk_create, before the coordinator
/// stamps identity and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBundle {
    pub request: String,
    pub source: String,
    pub dest: String,
    pub path: String,
    pub status: BundleStatus,
    #[serde(default)]
    pub file_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
}

/// Partial update applied through PATCH /Bundles/{uuid}.
///
/// Workers always carry their `claimant` identity; the coordinator rejects
/// patches from stale claimants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundlePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BundleStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_status: Option<BundleStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_priority_timestamp: Option<String>,
}

impl BundlePatch {
    /// A patch that releases the claim without advancing, sending the
    /// bundle to the back of the priority queue.
    pub fn requeue(claimant: &str) -> Self {
        Self {
            claimant: Some(claimant.to_string()),
            claimed: Some(false),
            work_priority_timestamp: Some(super::now()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            BundleStatus::Ethereal,
            BundleStatus::Specified,
            BundleStatus::Located,
            BundleStatus::Created,
            BundleStatus::Staged,
            BundleStatus::Transferring,
            BundleStatus::Taping,
            BundleStatus::Verifying,
            BundleStatus::Unpacking,
            BundleStatus::Completed,
            BundleStatus::SourceDeleted,
            BundleStatus::Deleted,
            BundleStatus::Finished,
            BundleStatus::Quarantined,
        ] {
            assert_eq!(BundleStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(BundleStatus::from_str("pending"), None);
    }

    #[test]
    fn test_serde_uses_kebab_case() {
        let json = serde_json::to_string(&BundleStatus::SourceDeleted).unwrap();
        assert_eq!(json, "\"source-deleted\"");
    }

    #[test]
    fn test_archival_path_is_legal() {
        use BundleStatus::*;
        let path = [
            Specified,
            Created,
            Staged,
            Transferring,
            Taping,
            Verifying,
            Completed,
            SourceDeleted,
            Deleted,
            Finished,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_advance_to(pair[1]),
                "{} -> {} should be legal",
                pair[0].as_str(),
                pair[1].as_str()
            );
        }
    }

    #[test]
    fn test_retrieval_path_is_legal() {
        use BundleStatus::*;
        for pair in [Located, Staged, Transferring, Unpacking, Completed].windows(2) {
            assert!(pair[0].can_advance_to(pair[1]));
        }
    }

    #[test]
    fn test_illegal_transitions() {
        use BundleStatus::*;
        assert!(!Specified.can_advance_to(Staged));
        assert!(!Staged.can_advance_to(Taping));
        assert!(!Finished.can_advance_to(Specified));
        // quarantine is never a pipeline transition
        assert!(!Specified.can_advance_to(Quarantined));
        assert!(!Quarantined.can_advance_to(Specified));
    }
}
