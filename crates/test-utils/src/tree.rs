//! Temporary directory trees for hash/watch tests.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

/// A tempdir with helpers for writing and removing files by relative path.
///
/// Parent directories are created on demand, so deep layouts can be
/// declared in one line per file.
pub struct TempTree {
    dir: TempDir,
}

impl TempTree {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("creating tempdir")?,
        })
    }

    /// Canonicalized root of the tree (stable across macOS `/private` links).
    pub fn root(&self) -> PathBuf {
        self.dir
            .path()
            .canonicalize()
            .unwrap_or_else(|_| self.dir.path().to_path_buf())
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating dir {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    pub fn remove(&self, rel: &str) -> Result<()> {
        let path = self.path(rel);
        fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))
    }

    pub fn root_str(&self) -> String {
        self.root().to_string_lossy().to_string()
    }
}

impl AsRef<Path> for TempTree {
    fn as_ref(&self) -> &Path {
        self.dir.path()
    }
}
