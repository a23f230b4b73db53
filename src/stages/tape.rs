//! Helpers shared by the tape stages.
//!
//! The HPSS tape system is driven through the `hsi` command line tool;
//! availability is probed with the site's `hpss_avail` binary before any
//! work is claimed.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::worker::ActionError;

/// Run `hsi` with the given arguments, capturing output.
pub async fn run_hsi(args: &[&str]) -> Result<String, ActionError> {
    let output = Command::new("hsi")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ActionError::Failed(format!("could not spawn hsi: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ActionError::Failed(format!(
            "hsi {} failed with {}: {}",
            args.first().unwrap_or(&""),
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Whether the tape system reports itself available. Used as a stage
/// preflight so no bundle is claimed (and then quarantined) while tape
/// is down for maintenance.
pub async fn hpss_available(probe: &Path) -> bool {
    match Command::new(probe).arg("archive").status().await {
        Ok(status) if status.success() => true,
        Ok(status) => {
            tracing::info!("tape system unavailable ({probe:?} exited {status})");
            false
        }
        Err(e) => {
            tracing::info!("tape availability probe {probe:?} failed: {e}");
            false
        }
    }
}

/// Tape path for a bundle: the tape base, the data warehouse path of the
/// request, then the artifact name.
pub fn tape_path(tape_base: &str, warehouse_path: &str, artifact: &str) -> String {
    let mut segments = vec![tape_base.trim_end_matches('/')];
    let trimmed = warehouse_path.trim_matches('/');
    if !trimmed.is_empty() {
        segments.push(trimmed);
    }
    segments.push(artifact);
    segments.join("/")
}

/// Parse the stored checksum out of `hsi hashlist` output.
///
/// The first line looks like:
/// `<sha512-hex> sha512 /path/to/bundle.tar [hsi]`
pub fn parse_hashlist(output: &str) -> Option<&str> {
    let first = output.lines().next()?;
    let checksum = first.split_whitespace().next()?;
    if checksum.len() == 128 {
        Some(checksum)
    } else {
        None
    }
}

/// Check that `hsi hashverify` reported an OK sha512 comparison.
///
/// The first line looks like:
/// `/path/to/bundle.tar: (sha512) OK`
pub fn hashverify_ok(output: &str) -> bool {
    output
        .lines()
        .next()
        .map(|line| line.contains("(sha512)") && line.trim_end().ends_with("OK"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tape_path_joins_segments() {
        assert_eq!(
            tape_path("/home/projects/archive", "/data/exp/run1/", "b.tar"),
            "/home/projects/archive/data/exp/run1/b.tar"
        );
        assert_eq!(tape_path("/archive/", "", "b.tar"), "/archive/b.tar");
    }

    #[test]
    fn test_parse_hashlist() {
        let sha = "a".repeat(128);
        let output = format!("{sha} sha512 /archive/data/b.tar [hsi]\n");
        assert_eq!(parse_hashlist(&output), Some(sha.as_str()));
        assert_eq!(parse_hashlist("(none) /archive/data/b.tar\n"), None);
        assert_eq!(parse_hashlist(""), None);
    }

    #[test]
    fn test_hashverify_ok() {
        assert!(hashverify_ok("/archive/data/b.tar: (sha512) OK\n"));
        assert!(!hashverify_ok("/archive/data/b.tar: (sha512) FAILED\n"));
        assert!(!hashverify_ok(""));
    }
}
