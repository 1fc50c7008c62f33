// src/index/hasher.rs

//! Content hashing primitives: streaming per-file hashes and the
//! deterministic aggregate over `(relative path, file hash)` pairs.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::SystemTime;

use blake3::Hasher;

use crate::errors::{HashError, Result};

/// Change-detection fingerprint for one file: length + mtime.
///
/// A matching fingerprint lets the index reuse a cached content hash
/// without re-reading the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub len: u64,
    pub mtime: SystemTime,
}

/// Stat a file for its fingerprint.
pub fn fingerprint(path: &Path) -> std::io::Result<Fingerprint> {
    let meta = path.metadata()?;
    Ok(Fingerprint {
        len: meta.len(),
        mtime: meta.modified()?,
    })
}

/// Compute the content hash of a single file (streaming, fixed buffer).
pub fn hash_file(path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = File::open(path).map_err(|source| HashError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|source| HashError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Aggregate hash over `(relative path, file hash)` pairs.
///
/// Pairs are sorted by relative path before hashing so the result is
/// independent of filesystem traversal order.
pub fn aggregate(members: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = members.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Hasher::new();
    for (rel, hash) in sorted {
        hasher.update(rel.as_bytes());
        hasher.update(&[0]);
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}
