//! Filesystem helpers shared by the stage actions.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Move a file, falling back to copy-and-remove when the rename crosses
/// filesystems (workbox and outbox are often different mounts).
pub fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dst)?;
            fs::remove_file(src)
        }
    }
}

/// Total size in bytes of all files under `path`. Files that vanish while
/// walking (a downstream stage moved them) are skipped.
pub fn directory_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Apply an optional prefix remap to a warehouse path.
///
/// The map is ordered; the first matching prefix wins.
pub fn remap_path(path: &str, map: &[(String, String)]) -> PathBuf {
    for (from, to) in map {
        if let Some(rest) = path.strip_prefix(from.as_str()) {
            let rest = rest.trim_start_matches('/');
            return Path::new(to).join(rest);
        }
    }
    PathBuf::from(path)
}

/// The file name component of a path-like string.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_move_file_creates_parents() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"payload").unwrap();
        let dst = dir.path().join("nested/deep/b.txt");

        move_file(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"payload");
    }

    #[test]
    fn test_directory_size_sums_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.bin"), vec![0u8; 100]).unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.bin"), vec![0u8; 50]).unwrap();

        assert_eq!(directory_size(dir.path()), 150);
        assert_eq!(directory_size(&dir.path().join("missing")), 0);
    }

    #[test]
    fn test_remap_path_first_match_wins() {
        let map = vec![
            ("/data/exp".to_string(), "/warehouse/exp".to_string()),
            ("/data".to_string(), "/warehouse".to_string()),
        ];
        assert_eq!(
            remap_path("/data/exp/IceCube/file.bin", &map),
            PathBuf::from("/warehouse/exp/IceCube/file.bin")
        );
        assert_eq!(
            remap_path("/data/sim/file.bin", &map),
            PathBuf::from("/warehouse/sim/file.bin")
        );
        assert_eq!(
            remap_path("/other/file.bin", &map),
            PathBuf::from("/other/file.bin")
        );
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/a/b/c.tar"), "c.tar");
        assert_eq!(basename("c.tar"), "c.tar");
    }
}
