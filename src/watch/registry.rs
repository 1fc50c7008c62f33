// src/watch/registry.rs

//! Watch registry: logical subscriptions multiplexed over refcounted
//! OS-level watch handles.
//!
//! One handle is armed per physical root; subscriptions whose root sits
//! under an already-armed ancestor reuse that handle (the ancestor watch is
//! recursive). A handle is torn down only when the last subscription or
//! persistent pin counting against it goes away.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use globset::GlobMatcher;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::errors::Result;
use crate::index::walk;
use crate::key::WatchKey;

use super::backend::{RawEvent, WatchBackend};

pub type SubscriptionId = u64;

/// One coalesced change notification, delivered per subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    /// Wire id of the key that changed.
    pub key: String,
    /// Changed paths accumulated over the debounce window.
    pub paths: Vec<String>,
}

struct Subscription {
    key: WatchKey,
    watch_dir: PathBuf,
    matcher: GlobMatcher,
    /// Armed root this subscription counts against.
    anchor: PathBuf,
    tx: mpsc::Sender<ChangeNotification>,
}

struct PersistentPin {
    watch_dir: PathBuf,
    matcher: GlobMatcher,
    anchor: PathBuf,
}

struct RootWatch<H> {
    _handle: H,
    refs: usize,
}

struct Inner<B: WatchBackend> {
    roots: HashMap<PathBuf, RootWatch<B::Handle>>,
    subs: HashMap<SubscriptionId, Subscription>,
    pins: HashMap<WatchKey, PersistentPin>,
    next_id: SubscriptionId,
}

pub struct WatchRegistry<B: WatchBackend> {
    backend: B,
    events: mpsc::Sender<RawEvent>,
    inner: Mutex<Inner<B>>,
}

impl<B: WatchBackend> WatchRegistry<B> {
    pub fn new(backend: B, events: mpsc::Sender<RawEvent>) -> Self {
        Self {
            backend,
            events,
            inner: Mutex::new(Inner {
                roots: HashMap::new(),
                subs: HashMap::new(),
                pins: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Register a subscription for `key`, arming an OS watch for its root
    /// if no armed root covers it yet.
    pub fn subscribe(
        &self,
        key: &WatchKey,
        tx: mpsc::Sender<ChangeNotification>,
    ) -> Result<SubscriptionId> {
        let matcher = walk::compile_glob(key.glob())?;
        let mut inner = self.inner.lock();
        let anchor = self.ensure_root(&mut inner, key.root())?;

        let id = inner.next_id;
        inner.next_id += 1;
        inner.subs.insert(
            id,
            Subscription {
                key: key.clone(),
                watch_dir: key.watch_dir(),
                matcher,
                anchor,
                tx,
            },
        );
        debug!(key = %key.id(), id, "subscription added");
        Ok(id)
    }

    /// Remove a subscription, releasing its root reference. Returns the
    /// key it was attached to, if the id was live.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Option<WatchKey> {
        let mut inner = self.inner.lock();
        let sub = inner.subs.remove(&id)?;
        let anchor = sub.anchor.clone();
        Self::release_root(&mut inner, &anchor);
        debug!(key = %sub.key.id(), id, "subscription removed");
        Some(sub.key)
    }

    /// Pin a persistent key: keeps its root armed without any live
    /// subscription. Idempotent.
    pub fn pin_persistent(&self, key: &WatchKey) -> Result<()> {
        let matcher = walk::compile_glob(key.glob())?;
        let mut inner = self.inner.lock();
        if inner.pins.contains_key(key) {
            return Ok(());
        }
        let anchor = self.ensure_root(&mut inner, key.root())?;
        inner.pins.insert(
            key.clone(),
            PersistentPin {
                watch_dir: key.watch_dir(),
                matcher,
                anchor,
            },
        );
        debug!(key = %key.id(), "persistent pin added");
        Ok(())
    }

    /// Drop a persistent pin, releasing its root reference. Idempotent.
    pub fn unpin_persistent(&self, key: &WatchKey) {
        let mut inner = self.inner.lock();
        if let Some(pin) = inner.pins.remove(key) {
            let anchor = pin.anchor.clone();
            Self::release_root(&mut inner, &anchor);
            debug!(key = %key.id(), "persistent pin removed");
        }
    }

    /// Whether any live subscription or persistent pin references `key`.
    pub fn has_watchers(&self, key: &WatchKey) -> bool {
        let inner = self.inner.lock();
        inner.pins.contains_key(key) || inner.subs.values().any(|s| &s.key == key)
    }

    /// Fan-out lookup: every watched key whose watch dir is an ancestor of
    /// `path` and whose glob matches the relative remainder. Deduplicated.
    pub fn affected_keys(&self, path: &Path) -> Vec<WatchKey> {
        let inner = self.inner.lock();
        let mut keys = Vec::new();

        let mut consider = |key: &WatchKey, watch_dir: &Path, matcher: &GlobMatcher| {
            if keys.contains(key) {
                return;
            }
            if let Some(rel) = walk::relative_str(watch_dir, path) {
                if matcher.is_match(&rel) {
                    keys.push(key.clone());
                }
            }
        };

        for sub in inner.subs.values() {
            consider(&sub.key, &sub.watch_dir, &sub.matcher);
        }
        for (key, pin) in inner.pins.iter() {
            consider(key, &pin.watch_dir, &pin.matcher);
        }
        keys
    }

    /// Deliver one notification to every subscription on `key`.
    ///
    /// Send failures mean the receiving connection is gone; its
    /// subscriptions are cleaned up on connection teardown.
    pub async fn notify(&self, key: &WatchKey, paths: &[String]) {
        let txs: Vec<mpsc::Sender<ChangeNotification>> = {
            let inner = self.inner.lock();
            inner
                .subs
                .values()
                .filter(|s| &s.key == key)
                .map(|s| s.tx.clone())
                .collect()
        };

        if txs.is_empty() {
            return;
        }

        let note = ChangeNotification {
            key: key.id(),
            paths: paths.to_vec(),
        };
        for tx in txs {
            let _ = tx.send(note.clone()).await;
        }
        debug!(key = %key.id(), paths = paths.len(), "change notification delivered");
    }

    /// Roots currently under observation (mainly for tests and logs).
    pub fn armed_roots(&self) -> Vec<PathBuf> {
        self.inner.lock().roots.keys().cloned().collect()
    }

    fn ensure_root(&self, inner: &mut Inner<B>, root: &Path) -> Result<PathBuf> {
        // An armed ancestor covers nested roots: its OS watch is recursive.
        let existing = inner
            .roots
            .keys()
            .find(|armed| root.starts_with(armed))
            .cloned();

        if let Some(anchor) = existing {
            if let Some(watch) = inner.roots.get_mut(&anchor) {
                watch.refs += 1;
            }
            return Ok(anchor);
        }

        let handle = self.backend.arm(root, self.events.clone())?;
        inner.roots.insert(
            root.to_path_buf(),
            RootWatch {
                _handle: handle,
                refs: 1,
            },
        );
        info!(root = %root.display(), "armed filesystem watch");
        Ok(root.to_path_buf())
    }

    fn release_root(inner: &mut Inner<B>, anchor: &Path) {
        let disarm = match inner.roots.get_mut(anchor) {
            Some(watch) => {
                watch.refs -= 1;
                watch.refs == 0
            }
            None => false,
        };
        if disarm {
            inner.roots.remove(anchor);
            info!(root = %anchor.display(), "disarmed filesystem watch");
        }
    }
}
