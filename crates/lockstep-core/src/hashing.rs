//! Package hash schemes.
//!
//! `h1` hashes the *contents* of a package: every regular file is hashed
//! with SHA-256, the results are written one per line as
//! `"<hex>  <relative/path>\n"` in path order, and the SHA-256 of that
//! summary is base64-encoded. The same value comes out whether the package
//! is an unpacked directory or the zip it was extracted from.
//!
//! `zh` is the plain SHA-256 of a zip archive and only applies to the packed
//! form.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use lockstep_schema::{HashScheme, PackageHash};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zip::ZipArchive;

#[derive(Error, Debug)]
pub enum HashError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot walk package directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("cannot read package archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{0} is not valid UTF-8")]
    NonUtf8Path(String),
}

/// SHA256 of a file, hex-encoded.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// `h1` hash of an unpacked package directory.
pub fn hash_dir_h1(dir: &Path) -> Result<PackageHash, HashError> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(io::Error::other)?;
        let name = rel
            .to_str()
            .ok_or_else(|| HashError::NonUtf8Path(rel.display().to_string()))?
            .replace('\\', "/");
        files.push((name, sha256_file(entry.path())?));
    }
    Ok(summarize(files))
}

/// `h1` hash of a zip archive's contents.
pub fn hash_zip_h1(archive_path: &Path) -> Result<PackageHash, HashError> {
    let mut archive = ZipArchive::new(File::open(archive_path)?)?;
    let mut files = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = entry.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        files.push((name, hex::encode(hasher.finalize())));
    }
    Ok(summarize(files))
}

/// `zh` hash of a zip archive.
pub fn hash_zip_zh(archive_path: &Path) -> Result<PackageHash, HashError> {
    Ok(PackageHash::zh(&sha256_file(archive_path)?))
}

fn summarize(mut files: Vec<(String, String)>) -> PackageHash {
    files.sort_by(|a, b| a.0.cmp(&b.0));
    let mut summary = String::new();
    for (name, sum) in &files {
        let _ = writeln!(summary, "{sum}  {name}");
    }
    PackageHash::h1(&STANDARD.encode(Sha256::digest(summary.as_bytes())))
}

/// Whether a package on disk matches any of `allowed`.
///
/// `h1` is checked for both forms; `zh` only for archives. Unknown schemes
/// never match. An empty `allowed` list matches nothing.
pub fn package_matches_any(
    path: &Path,
    is_archive: bool,
    allowed: &[PackageHash],
) -> Result<bool, HashError> {
    let wants = |scheme| allowed.iter().any(|h| h.scheme() == scheme);

    if wants(HashScheme::H1) {
        let h1 = if is_archive {
            hash_zip_h1(path)?
        } else {
            hash_dir_h1(path)?
        };
        if allowed.contains(&h1) {
            return Ok(true);
        }
    }
    if is_archive && wants(HashScheme::Zh) {
        let zh = hash_zip_zh(path)?;
        if allowed.contains(&zh) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::extract::{extract_zip, tests::write_zip};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn dir_and_zip_agree() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pkg.zip");
        write_zip(
            &archive,
            &[("b/inner.txt", b"inner"), ("a.bin", b"provider")],
        );
        let unpacked = dir.path().join("unpacked");
        extract_zip(&archive, &unpacked).unwrap();

        let from_zip = hash_zip_h1(&archive).unwrap();
        let from_dir = hash_dir_h1(&unpacked).unwrap();
        assert_eq!(from_zip, from_dir);
        assert_eq!(from_zip.scheme(), HashScheme::H1);
    }

    #[test]
    fn h1_is_content_sensitive() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file"), b"one").unwrap();
        let before = hash_dir_h1(dir.path()).unwrap();
        fs::write(dir.path().join("file"), b"two").unwrap();
        assert_ne!(before, hash_dir_h1(dir.path()).unwrap());
    }

    #[test]
    fn zh_is_archive_sha256() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pkg.zip");
        write_zip(&archive, &[("a", b"a")]);
        let zh = hash_zip_zh(&archive).unwrap();
        assert_eq!(zh.value(), sha256_file(&archive).unwrap());
    }

    #[test]
    fn matching_against_lock_hashes() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pkg.zip");
        write_zip(&archive, &[("a", b"a")]);
        let h1 = hash_zip_h1(&archive).unwrap();
        let zh = hash_zip_zh(&archive).unwrap();
        let other = PackageHash::h1("bm9wZQ==");

        assert!(package_matches_any(&archive, true, &[other.clone(), zh.clone()]).unwrap());
        assert!(package_matches_any(&archive, true, &[h1]).unwrap());
        assert!(!package_matches_any(&archive, true, &[other]).unwrap());
        assert!(!package_matches_any(&archive, true, &[]).unwrap());

        let unpacked = dir.path().join("unpacked");
        extract_zip(&archive, &unpacked).unwrap();
        assert!(!package_matches_any(&unpacked, false, &[zh]).unwrap());
    }

    #[test]
    fn corrupt_zip_fails() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pkg.zip");
        fs::write(&archive, b"garbage").unwrap();
        assert!(hash_zip_h1(&archive).is_err());
    }
}
