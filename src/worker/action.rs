//! The stage action interface.
//!
//! Every stage is the same shape: given the claimed document, either
//! produce a set of field updates, ask for the claim back without
//! advancing, or fail with a human-readable reason. The harness owns the
//! loop, the heartbeat, the auth and the quarantine; the stage owns only
//! its action.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::client::ClientError;
use crate::models::{Bundle, BundlePatch, RequestPatch, TransferRequest};

/// Which entity a stage claims from the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKind {
    /// Picker and locator expand transfer requests.
    Requests,
    /// Every other stage walks bundles through the pipeline.
    Bundles,
}

/// The document handed to an action by POP.
#[derive(Debug, Clone)]
pub enum WorkItem {
    Request(TransferRequest),
    Bundle(Bundle),
}

impl WorkItem {
    pub fn uuid(&self) -> &str {
        match self {
            Self::Request(r) => &r.uuid,
            Self::Bundle(b) => &b.uuid,
        }
    }

    /// Unwrap a bundle, for stages that only ever claim bundles.
    pub fn into_bundle(self) -> Result<Bundle, ActionError> {
        match self {
            Self::Bundle(b) => Ok(b),
            Self::Request(r) => Err(ActionError::Failed(format!(
                "claimed TransferRequest {} but this stage works on bundles",
                r.uuid
            ))),
        }
    }

    /// Unwrap a transfer request, for picker-shaped stages.
    pub fn into_request(self) -> Result<TransferRequest, ActionError> {
        match self {
            Self::Request(r) => Ok(r),
            Self::Bundle(b) => Err(ActionError::Failed(format!(
                "claimed Bundle {} but this stage works on transfer requests",
                b.uuid
            ))),
        }
    }
}

/// Field updates an action hands back for the harness to report.
#[derive(Debug, Clone)]
pub enum PatchSet {
    Bundle(BundlePatch),
    Request(RequestPatch),
}

/// Result of a successful action.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Advance to the stage's output status with these extra updates.
    Advance(PatchSet),
    /// Release the claim without advancing; the item goes to the back of
    /// the queue (quota exceeded, artifact not there yet).
    Requeue,
}

#[derive(Debug, Error)]
pub enum ActionError {
    /// The work item itself failed; the harness quarantines it with this
    /// reason.
    #[error("{0}")]
    Failed(String),
    /// Talking to the coordinator failed; not the item's fault.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// One pipeline stage's business logic.
#[async_trait]
pub trait StageAction: Send + Sync {
    /// Stage name used for claims, heartbeats and quarantine reasons.
    fn stage(&self) -> &'static str;

    fn claim_kind(&self) -> ClaimKind {
        ClaimKind::Bundles
    }

    /// Extra fields merged into the heartbeat payload.
    fn status_payload(&self) -> Value {
        serde_json::json!({})
    }

    /// Probe external prerequisites before claiming. Returning false
    /// skips the cycle entirely so no work is claimed and quarantined
    /// while (say) the tape system is down.
    async fn preflight(&self) -> bool {
        true
    }

    async fn execute(&self, item: WorkItem) -> Result<Outcome, ActionError>;
}
