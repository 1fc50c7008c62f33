// src/watch/backend.rs

//! Platform watch capability.
//!
//! The registry only needs three things from a platform: arm a recursive
//! watch on a root, receive raw events on a channel, and disarm by dropping
//! the handle. `notify` picks the right OS API (inotify, FSEvents,
//! ReadDirectoryChangesW) behind [`NotifyBackend`]; tests substitute their
//! own backend.

use std::fmt;
use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::errors::{HashError, Result};

/// Raw filesystem event forwarded from the OS backend.
///
/// Only content-affecting kinds (create/modify/remove) are forwarded;
/// access and metadata-only events are filtered at the source.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub paths: Vec<PathBuf>,
}

/// Capability interface over platform filesystem-watch APIs.
pub trait WatchBackend: Send + Sync + 'static {
    type Handle: Send + 'static;

    /// Arm a recursive watch on `root`, delivering events to `events`.
    /// Dropping the returned handle disarms the watch.
    fn arm(&self, root: &Path, events: mpsc::Sender<RawEvent>) -> Result<Self::Handle>;
}

/// `notify`-backed implementation used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyBackend;

impl WatchBackend for NotifyBackend {
    type Handle = WatchHandle;

    fn arm(&self, root: &Path, events: mpsc::Sender<RawEvent>) -> Result<WatchHandle> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            // try_send: the notify callback runs on its own thread and must
            // never block; under backpressure dropping an event only delays
            // invalidation until the next one.
            let _ = events.try_send(RawEvent { paths: event.paths });
        })
        .map_err(|e| HashError::Watch(e.to_string()))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| HashError::Watch(e.to_string()))?;

        Ok(WatchHandle { _inner: watcher })
    }
}

/// RAII handle for one armed OS watch. Dropping it stops the watch.
pub struct WatchHandle {
    _inner: RecommendedWatcher,
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle").finish()
    }
}
