// src/key.rs

//! Canonical watch keys.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Canonicalized `(root, relative path, glob)` triple identifying one
/// cache/subscription scope.
///
/// The root is canonicalized on construction (falling back to the given
/// path when canonicalization fails, e.g. for a root that does not exist
/// yet), and the relative path is normalized so that `""` and `"."` name
/// the same key. Two logically identical triples therefore map to the same
/// cache and subscription entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchKey {
    root: PathBuf,
    path: String,
    glob: String,
}

impl WatchKey {
    pub fn new(root: impl AsRef<Path>, path: &str, glob: &str) -> Self {
        let root = root.as_ref();
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let path = match path.trim_end_matches('/') {
            "" | "." => ".".to_string(),
            p => p.to_string(),
        };
        Self {
            root,
            path,
            glob: glob.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn glob(&self) -> &str {
        &self.glob
    }

    /// Directory the glob is evaluated against (`root/path`).
    pub fn watch_dir(&self) -> PathBuf {
        if self.path == "." {
            self.root.clone()
        } else {
            self.root.join(&self.path)
        }
    }

    /// Stable opaque id used as the `key` field on the wire (32 hex chars).
    pub fn id(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.root.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.path.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.glob.as_bytes());
        let hex = hasher.finalize().to_hex();
        hex[..32].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_id_is_deterministic() {
        let a = WatchKey::new("/repo", "src", "**/*.rs");
        let b = WatchKey::new("/repo", "src", "**/*.rs");
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().len(), 32);
    }

    #[test]
    fn key_id_differs_per_field() {
        let a = WatchKey::new("/repo", "src", "**/*.rs");
        let b = WatchKey::new("/repo", "lib", "**/*.rs");
        let c = WatchKey::new("/repo", "src", "**/*.toml");
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn empty_and_dot_paths_are_the_same_key() {
        let a = WatchKey::new("/repo", "", "*.rs");
        let b = WatchKey::new("/repo", ".", "*.rs");
        assert_eq!(a, b);
        assert_eq!(a.watch_dir(), PathBuf::from("/repo"));
    }

    #[test]
    fn canonicalized_roots_collapse() {
        let dir = tempfile::tempdir().unwrap();
        let spelled = dir.path().join("sub").join("..");
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();

        let a = WatchKey::new(dir.path(), ".", "*.txt");
        let b = WatchKey::new(&spelled, ".", "*.txt");
        assert_eq!(a, b);
    }
}
