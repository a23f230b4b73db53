//! TransferRequest model.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    /// Awaiting a picker or locator claim.
    Unclaimed,
    /// Expanded into bundles; waiting for them to drain.
    Processing,
    /// All bundles terminal.
    Finished,
    /// Side-state pending admin intervention.
    Quarantined,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unclaimed => "unclaimed",
            Self::Processing => "processing",
            Self::Finished => "finished",
            Self::Quarantined => "quarantined",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unclaimed" => Some(Self::Unclaimed),
            "processing" => Some(Self::Processing),
            "finished" => Some(Self::Finished),
            "quarantined" => Some(Self::Quarantined),
            _ => None,
        }
    }

    /// Whether a direct transition to `next` is legal. A processing
    /// request may be handed back to `unclaimed` (requeue, reaping).
    pub fn can_advance_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Unclaimed, Processing) | (Processing, Unclaimed) | (Processing, Finished)
        )
    }
}

/// A user-submitted unit of archival or retrieval work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub uuid: String,
    pub source: String,
    pub dest: String,
    /// Dataset path at the source site.
    pub path: String,
    pub status: RequestStatus,
    #[serde(default)]
    pub reason: String,
    pub claimed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_status: Option<RequestStatus>,
    pub create_timestamp: String,
    pub update_timestamp: String,
    pub work_priority_timestamp: String,
}

/// Body of POST /TransferRequests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransferRequest {
    pub source: String,
    pub dest: String,
    pub path: String,
}

/// Partial update applied through PATCH /TransferRequests/{uuid}.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_status: Option<RequestStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_priority_timestamp: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            RequestStatus::Unclaimed,
            RequestStatus::Processing,
            RequestStatus::Finished,
            RequestStatus::Quarantined,
        ] {
            assert_eq!(RequestStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(RequestStatus::from_str("done"), None);
    }

    #[test]
    fn test_transitions() {
        use RequestStatus::*;
        assert!(Unclaimed.can_advance_to(Processing));
        assert!(Processing.can_advance_to(Finished));
        assert!(Processing.can_advance_to(Unclaimed));
        assert!(!Finished.can_advance_to(Unclaimed));
        assert!(!Unclaimed.can_advance_to(Finished));
    }
}
