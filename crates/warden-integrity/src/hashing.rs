//! # Content Hashing
//!
//! Digests for single files and whole directory trees.
//!
//! ## Files
//!
//! Two independent digests over the raw bytes: SHA-256 (primary) and BLAKE3
//! (secondary). Both are computed in one streaming pass.
//!
//! ## Directories
//!
//! ```text
//! SHA-256( for path in sorted(relative_paths):
//!              path ‖ 0x00 ‖ len(content) as u64 BE ‖ content )
//! ```
//!
//! Relative paths use `/` on every platform and are sorted as strings, so
//! the digest does not depend on filesystem enumeration order or the host
//! OS. The length prefix keeps `("a", "bc")` distinct from `("ab", "c")`.
//! Symlinks are not followed and skipped directory names are never entered.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{IntegrityError, Result};

/// Directory names skipped by default when hashing a tree.
pub const DEFAULT_SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".warden", "__pycache__", ".cache"];

const CHUNK: usize = 64 * 1024;

/// Digests of a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigests {
    /// Hex SHA-256.
    pub primary: String,
    /// Hex BLAKE3.
    pub secondary: String,
}

/// Hashes a file with both algorithms.
///
/// # Errors
///
/// Returns `IntegrityError::Io` if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<FileDigests> {
    let file = File::open(path).map_err(|e| IntegrityError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut sha = Sha256::new();
    let mut blake = blake3::Hasher::new();
    let mut buf = vec![0u8; CHUNK];

    loop {
        let n = reader.read(&mut buf).map_err(|e| IntegrityError::io(path, e))?;
        if n == 0 {
            break;
        }
        sha.update(&buf[..n]);
        blake.update(&buf[..n]);
    }

    Ok(FileDigests {
        primary: hex::encode(sha.finalize()),
        secondary: blake.finalize().to_hex().to_string(),
    })
}

/// Hashes a directory tree into a single SHA-256 digest.
///
/// # Errors
///
/// Returns `IntegrityError::Io` if the walk or any file read fails.
pub fn hash_directory<S: AsRef<str>>(root: &Path, skip_dirs: &[S]) -> Result<String> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !skip_dirs
                    .iter()
                    .any(|skip| entry.file_name().to_string_lossy() == skip.as_ref())
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            IntegrityError::io(path, std::io::Error::from(e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push((relative, entry.into_path()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK];
    for (relative, path) in &files {
        let file = File::open(path).map_err(|e| IntegrityError::io(path, e))?;
        let len = file.metadata().map_err(|e| IntegrityError::io(path, e))?.len();

        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(len.to_be_bytes());

        let mut reader = BufReader::new(file);
        loop {
            let n = reader.read(&mut buf).map_err(|e| IntegrityError::io(path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
    }

    Ok(hex::encode(hasher.finalize()))
}
