//! Component heartbeat records.
//!
//! Heartbeats feed dashboards only. Claim staleness is judged from
//! `claim_timestamp`, never from these records, so a heartbeat outage
//! cannot steal work from a healthy worker.

use serde::{Deserialize, Serialize};

/// One worker instance's most recent heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    /// Component type; picker, bundler, etc.
    pub component_type: String,
    /// Instance name, e.g. "node16-bundler".
    pub component_name: String,
    pub timestamp: String,
    /// Arbitrary component-supplied status payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ComponentStatus {
    /// Whether this heartbeat is older than the given threshold.
    pub fn is_stale(&self, threshold_secs: i64) -> bool {
        match chrono::DateTime::parse_from_rfc3339(&self.timestamp) {
            Ok(ts) => {
                let age = chrono::Utc::now() - ts.with_timezone(&chrono::Utc);
                age.num_seconds() > threshold_secs
            }
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_stale() {
        let mut status = ComponentStatus {
            component_type: "bundler".to_string(),
            component_name: "node1-bundler".to_string(),
            timestamp: crate::models::now(),
            payload: serde_json::json!({}),
        };
        assert!(!status.is_stale(60));

        status.timestamp = crate::models::format_timestamp(
            chrono::Utc::now() - chrono::Duration::seconds(120),
        );
        assert!(status.is_stale(60));
        assert!(!status.is_stale(180));
    }

    #[test]
    fn test_unparseable_timestamp_is_stale() {
        let status = ComponentStatus {
            component_type: "picker".to_string(),
            component_name: "x".to_string(),
            timestamp: "not-a-time".to_string(),
            payload: serde_json::json!({}),
        };
        assert!(status.is_stale(3600));
    }
}
