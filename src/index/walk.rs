// src/index/walk.rs

//! Directory walking and glob matching for the hash index.

use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};

use crate::errors::{HashError, Result};

/// Compile a single glob pattern into a matcher.
pub fn compile_glob(pattern: &str) -> Result<GlobMatcher> {
    Ok(Glob::new(pattern)?.compile_matcher())
}

/// A file matched during a walk: absolute path plus the relative path
/// (forward slashes) the glob was matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedFile {
    pub abs: PathBuf,
    pub rel: String,
}

/// Collect all files under `watch_dir` whose path relative to it matches
/// the glob, sorted by relative path.
///
/// The glob alone decides membership; there are no implicit ignore rules.
/// Symlinks are not followed, so a link cycle under the watch dir cannot
/// loop the walk.
pub fn matching_files(watch_dir: &Path, matcher: &GlobMatcher) -> Result<Vec<MatchedFile>> {
    if !watch_dir.is_dir() {
        return Err(HashError::NotFound(watch_dir.to_path_buf()));
    }

    let mut files = Vec::new();
    let mut stack = vec![watch_dir.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir)?;
        for entry in entries {
            let entry = entry?;
            // file_type() stats the entry itself, never the link target.
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                if let Ok(rel) = path.strip_prefix(watch_dir) {
                    let rel = rel.to_string_lossy().replace('\\', "/");
                    if matcher.is_match(&rel) {
                        files.push(MatchedFile { abs: path, rel });
                    }
                }
            }
        }
    }

    if files.is_empty() {
        return Err(HashError::NoMatch);
    }

    files.sort_by(|a, b| a.rel.cmp(&b.rel));
    Ok(files)
}

/// Relativize `path` against `base`, with forward slashes.
///
/// Tries a direct `strip_prefix` first, then falls back to canonicalizing
/// both sides (helps on platforms where event paths come back under a
/// different absolute prefix, e.g. `/private/var` on macOS). Returns `None`
/// when the path cannot be related to `base`.
pub fn relative_str(base: &Path, path: &Path) -> Option<String> {
    if let Ok(rel) = path.strip_prefix(base) {
        return Some(rel.to_string_lossy().replace('\\', "/"));
    }

    if let (Ok(base_canon), Ok(path_canon)) = (base.canonicalize(), path.canonicalize()) {
        if let Ok(rel) = path_canon.strip_prefix(&base_canon) {
            return Some(rel.to_string_lossy().replace('\\', "/"));
        }
    }

    None
}
