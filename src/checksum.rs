//! Checksum support for bundle artifacts.
//!
//! Archives carry both SHA-512 (verification on tape and at the
//! destination) and adler32 (transfer-service compatibility). Both
//! digests are computed in one streaming pass.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use adler32::RollingAdler32;
use sha2::{Digest, Sha512};

use crate::models::Checksum;

const READ_BUFFER_SIZE: usize = 128 * 1024;

/// Compute SHA-512 and adler32 of the file at `path` in one pass.
pub fn file_checksums(path: &Path) -> io::Result<Checksum> {
    let mut file = File::open(path)?;
    let mut sha = Sha512::new();
    let mut adler = RollingAdler32::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        sha.update(&buffer[..n]);
        adler.update_buffer(&buffer[..n]);
    }
    Ok(Checksum {
        sha512: hex::encode(sha.finalize()),
        adler32: format!("{:08x}", adler.hash()),
    })
}

/// Compute only the SHA-512 of the file at `path`.
pub fn file_sha512(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut sha = Sha512::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        sha.update(&buffer[..n]);
    }
    Ok(hex::encode(sha.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_known_checksums() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"Wikipedia").unwrap();
        drop(file);

        let checksum = file_checksums(&path).unwrap();
        // adler32("Wikipedia") is a published reference value
        assert_eq!(checksum.adler32, "11e60398");
        assert_eq!(checksum.sha512, file_sha512(&path).unwrap());
        assert_eq!(checksum.sha512.len(), 128);
    }

    #[test]
    fn test_checksums_are_deterministic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![0x42u8; 300 * 1024]).unwrap();

        let first = file_checksums(&path).unwrap();
        let second = file_checksums(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();

        let checksum = file_checksums(&path).unwrap();
        assert_eq!(checksum.adler32, "00000001");
    }
}
