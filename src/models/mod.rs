//! Entity models for the archival pipeline.

mod bundle;
mod heartbeat;
mod metadata;
mod request;

pub use bundle::{Bundle, BundlePatch, BundleStatus, Checksum, NewBundle};
pub use heartbeat::ComponentStatus;
pub use metadata::MetadataRecord;
pub use request::{NewTransferRequest, RequestPatch, RequestStatus, TransferRequest};

use chrono::{DateTime, SecondsFormat, Utc};

/// String timestamp for the current time, to the second.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Format a timestamp the way the store records them.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Return a fresh entity identifier.
pub fn unique_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
