// src/persist.rs

//! Durable store for persistent watch keys.
//!
//! A record must survive a crash that happens right after the request was
//! acknowledged, so every mutation writes a temp file, fsyncs it and
//! renames it over the state file before returning.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{HashError, Result};
use crate::key::WatchKey;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    watches: BTreeSet<WatchKey>,
}

pub struct PersistStore {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl PersistStore {
    /// Open the store, loading any existing state.
    ///
    /// A missing file starts empty; an unreadable or corrupt file is fatal.
    /// Silently starting fresh would drop persistent watches with no signal
    /// to the operator.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                HashError::Config(format!("corrupt state file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => return Err(HashError::Io(e)),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Record a key durably. Returns true when newly inserted.
    pub fn record(&self, key: &WatchKey) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.watches.insert(key.clone()) {
            return Ok(false);
        }
        self.save(&state)?;
        debug!(key = %key.id(), "persisted watch record");
        Ok(true)
    }

    /// Remove a key durably. Returns true when it was present.
    pub fn remove(&self, key: &WatchKey) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.watches.remove(key) {
            return Ok(false);
        }
        self.save(&state)?;
        debug!(key = %key.id(), "removed persisted watch record");
        Ok(true)
    }

    pub fn contains(&self, key: &WatchKey) -> bool {
        self.state.lock().watches.contains(key)
    }

    pub fn all(&self) -> Vec<WatchKey> {
        self.state.lock().watches.iter().cloned().collect()
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
