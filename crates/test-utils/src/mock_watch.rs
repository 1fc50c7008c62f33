//! A scriptable watch backend for tests.
//!
//! Instead of touching the OS, [`MockBackend`] records which roots were
//! armed and disarmed, and lets tests inject raw events as if the OS had
//! reported them.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use fshasher::errors::Result;
use fshasher::watch::backend::{RawEvent, WatchBackend};

#[derive(Default)]
struct State {
    armed: Vec<PathBuf>,
    disarmed: Vec<PathBuf>,
    senders: Vec<mpsc::Sender<RawEvent>>,
}

/// Watch backend that records arm/disarm calls and forwards injected
/// events to whatever channels the registry handed it.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roots currently armed (armed minus disarmed, in arm order).
    pub fn armed_roots(&self) -> Vec<PathBuf> {
        let state = self.state.lock().expect("mock state poisoned");
        state
            .armed
            .iter()
            .filter(|root| !state.disarmed.contains(root))
            .cloned()
            .collect()
    }

    pub fn disarmed_roots(&self) -> Vec<PathBuf> {
        self.state.lock().expect("mock state poisoned").disarmed.clone()
    }

    /// Inject a raw event, as if the OS watch had fired for `paths`.
    pub fn emit(&self, paths: Vec<PathBuf>) {
        let senders = {
            let state = self.state.lock().expect("mock state poisoned");
            state.senders.clone()
        };
        for tx in senders {
            let _ = tx.try_send(RawEvent {
                paths: paths.clone(),
            });
        }
    }
}

impl WatchBackend for MockBackend {
    type Handle = MockHandle;

    fn arm(&self, root: &Path, events: mpsc::Sender<RawEvent>) -> Result<MockHandle> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.armed.push(root.to_path_buf());
        state.senders.push(events);
        Ok(MockHandle {
            root: root.to_path_buf(),
            state: Arc::clone(&self.state),
        })
    }
}

/// Records its root as disarmed on drop, mirroring the RAII contract of
/// the real handle.
pub struct MockHandle {
    root: PathBuf,
    state: Arc<Mutex<State>>,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.disarmed.push(self.root.clone());
        }
    }
}
