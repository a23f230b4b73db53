//! Bundle archive container and manifest sidecar.
//!
//! A bundle artifact is an uncompressed tar holding the constituent files
//! keyed by their warehouse-relative paths, with a JSON manifest as the
//! first entry. The manifest is also written alongside the archive so
//! verification and unpacking can read it without streaming the whole
//! container.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Manifest format version.
pub const MANIFEST_VERSION: u32 = 3;

/// One file recorded in a bundle manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    /// File Catalog identifier.
    pub uuid: String,
    /// Warehouse path of the file.
    pub logical_name: String,
    pub file_size: u64,
    pub checksum: ManifestChecksum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestChecksum {
    pub sha512: String,
}

/// The JSON manifest written alongside (and into) each archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleManifest {
    pub uuid: String,
    pub component: String,
    pub version: u32,
    pub create_timestamp: String,
    pub file_count: u64,
    pub files: Vec<ManifestFile>,
}

/// Canonical archive file name for a bundle.
pub fn archive_file_name(bundle_uuid: &str) -> String {
    format!("{bundle_uuid}.tar")
}

/// Canonical manifest sidecar name for a bundle.
pub fn manifest_file_name(bundle_uuid: &str) -> String {
    format!("{bundle_uuid}.metadata.json")
}

/// Write the manifest sidecar, replacing any partial from a prior attempt.
pub fn write_manifest(path: &Path, manifest: &BundleManifest) -> anyhow::Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    let file = File::create(path)?;
    serde_json::to_writer(file, manifest)?;
    Ok(())
}

pub fn read_manifest(path: &Path) -> anyhow::Result<BundleManifest> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}

/// Build the archive at `archive_path`, replacing any partial from a prior
/// crashed attempt. `entries` maps on-disk sources to their archive paths;
/// the manifest sidecar becomes the first entry under its basename.
pub fn build_archive(
    archive_path: &Path,
    manifest_path: &Path,
    entries: &[(PathBuf, String)],
) -> anyhow::Result<()> {
    if archive_path.exists() {
        fs::remove_file(archive_path)?;
    }
    let file = File::create(archive_path)?;
    let mut builder = tar::Builder::new(file);

    let manifest_name = manifest_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("manifest path has no file name"))?;
    builder.append_path_with_name(manifest_path, manifest_name)?;

    for (source, entry_name) in entries {
        builder.append_path_with_name(source, entry_name)?;
    }
    builder.into_inner()?.sync_all()?;
    Ok(())
}

/// Expand an archive into `dest_dir`.
pub fn unpack_archive(archive_path: &Path, dest_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dest_dir)?;
    let file = File::open(archive_path)?;
    let mut archive = tar::Archive::new(file);
    archive.unpack(dest_dir)?;
    Ok(())
}

/// Relative archive entry name for a file under the request path.
///
/// Falls back to the basename when the file lives outside the request
/// path (mirrors how the warehouse treats stray files).
pub fn entry_name(logical_name: &str, request_path: &str) -> String {
    let trimmed = request_path.trim_end_matches('/');
    match logical_name.strip_prefix(trimmed) {
        Some(rest) => rest.trim_start_matches('/').to_string(),
        None => crate::pathutil::basename(logical_name).to_string(),
    }
}

/// Convenience for manifests built from catalog records.
impl BundleManifest {
    pub fn new(bundle_uuid: &str, files: Vec<ManifestFile>) -> Self {
        Self {
            uuid: bundle_uuid.to_string(),
            component: "bundler".to_string(),
            version: MANIFEST_VERSION,
            create_timestamp: crate::models::now(),
            file_count: files.len() as u64,
            files,
        }
    }
}

/// Verify that an unpacked file matches its manifest entry.
pub fn verify_unpacked_file(path: &Path, entry: &ManifestFile) -> anyhow::Result<()> {
    let disk_size = fs::metadata(path)?.len();
    if disk_size != entry.file_size {
        anyhow::bail!(
            "file {} has size {disk_size} on disk, manifest says {}",
            entry.logical_name,
            entry.file_size
        );
    }
    let disk_sha512 = crate::checksum::file_sha512(path)?;
    if disk_sha512 != entry.checksum.sha512 {
        anyhow::bail!(
            "file {} has sha512 {disk_sha512}, manifest says {}",
            entry.logical_name,
            entry.checksum.sha512
        );
    }
    Ok(())
}
