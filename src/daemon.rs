// src/daemon.rs

//! The owned server-state object and its lifecycle.
//!
//! `Daemon` ties together the hash index, the watch registry and the
//! persistence store, and is injected into request handlers rather than
//! living in globals. Startup re-arms persisted watches and warms their
//! aggregates in the background; shutdown is dropping the listener and the
//! last `Arc` (in-flight work drains on its own).

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::errors::Result;
use crate::index::{AggregateResult, HashIndex};
use crate::key::WatchKey;
use crate::persist::PersistStore;
use crate::watch::registry::{ChangeNotification, SubscriptionId, WatchRegistry};
use crate::watch::{NotifyBackend, invalidator};
use crate::watch::backend::{RawEvent, WatchBackend};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct Daemon<B: WatchBackend = NotifyBackend> {
    index: Arc<HashIndex>,
    registry: Arc<WatchRegistry<B>>,
    store: Arc<PersistStore>,
    /// Interned wire-id → key mapping, so `unwatch {key}` can resolve keys
    /// this connection never created itself.
    known_keys: Mutex<HashMap<String, WatchKey>>,
}

impl<B: WatchBackend> Daemon<B> {
    /// Build the daemon state and spawn the invalidator loop.
    ///
    /// Fails when the persistence store cannot be opened; that is fatal at
    /// startup. Must run inside a tokio runtime.
    pub fn open(backend: B, settings: &Settings) -> Result<Arc<Self>> {
        let (event_tx, event_rx) = mpsc::channel::<RawEvent>(EVENT_CHANNEL_CAPACITY);

        let index = Arc::new(HashIndex::new());
        let registry = Arc::new(WatchRegistry::new(backend, event_tx));
        let store = Arc::new(PersistStore::open(&settings.state_file)?);

        invalidator::spawn(
            Arc::clone(&index),
            Arc::clone(&registry),
            event_rx,
            settings.debounce,
        );

        Ok(Arc::new(Self {
            index,
            registry,
            store,
            known_keys: Mutex::new(HashMap::new()),
        }))
    }

    /// Re-arm persisted watches and schedule their background warm-up.
    ///
    /// Connections are accepted immediately; a `hash` request on a key
    /// still warming joins the warm-up computation single-flighted.
    pub fn restore(self: &Arc<Self>) {
        let keys = self.store.all();
        if keys.is_empty() {
            return;
        }
        info!(count = keys.len(), "restoring persisted watches");

        for key in keys {
            self.intern(&key);
            if let Err(e) = self.registry.pin_persistent(&key) {
                error!(key = %key.id(), error = %e, "failed to re-arm persisted watch");
                continue;
            }

            let daemon = Arc::clone(self);
            tokio::spawn(async move {
                let start = Instant::now();
                match daemon.index.get_or_compute(&key).await {
                    Ok(result) if daemon.store.contains(&key) => {
                        info!(
                            key = %key.id(),
                            files = result.file_count,
                            elapsed = ?start.elapsed(),
                            "warm-up hash complete"
                        );
                    }
                    Ok(_) => {
                        // Unwatched while we were warming; drop the result.
                        daemon.index.evict(&key);
                        debug!(key = %key.id(), "key unwatched during warm-up; evicted");
                    }
                    Err(e) => {
                        warn!(key = %key.id(), error = %e, "warm-up hash failed");
                    }
                }
            });
        }
    }

    /// Serve a `hash` request. `persistent` arms a watch and records the
    /// key durably before the aggregate is computed, so the record cannot
    /// be lost by a crash after the acknowledgment.
    pub async fn hash(&self, key: &WatchKey, persistent: bool) -> Result<AggregateResult> {
        self.intern(key);
        if persistent {
            // Watch failure aborts before anything is recorded.
            self.registry.pin_persistent(key)?;
            if let Err(e) = self.store.record(key) {
                // A pin without a record could never be released again.
                self.registry.unpin_persistent(key);
                return Err(e);
            }
        }
        self.index.get_or_compute(key).await
    }

    /// Serve a `watch` request: register a subscription delivering change
    /// notifications to `tx`.
    pub fn watch(
        &self,
        key: &WatchKey,
        tx: mpsc::Sender<ChangeNotification>,
    ) -> Result<SubscriptionId> {
        self.intern(key);
        self.registry.subscribe(key, tx)
    }

    /// Serve an `unwatch` request for one connection.
    ///
    /// Removes the caller's subscriptions on the key and deletes the
    /// persisted record, so a later restart no longer re-arms the watch.
    /// Other connections' subscriptions on the same key are untouched.
    pub fn unwatch(&self, key: &WatchKey, subscription_ids: &[SubscriptionId]) -> Result<()> {
        for id in subscription_ids {
            self.registry.unsubscribe(*id);
        }

        self.store.remove(key)?;
        // Unconditional: a pin may exist without a record and must still
        // be released. Unpinning is idempotent.
        self.registry.unpin_persistent(key);

        if !self.registry.has_watchers(key) {
            self.index.evict(key);
        }
        Ok(())
    }

    /// Connection teardown: drop all its subscriptions and evict cache
    /// entries that no longer have any watcher or persisted record.
    pub fn drop_connection(&self, subscriptions: impl IntoIterator<Item = (WatchKey, SubscriptionId)>) {
        for (key, id) in subscriptions {
            self.registry.unsubscribe(id);
            if !self.registry.has_watchers(&key) && !self.store.contains(&key) {
                self.index.evict(&key);
            }
        }
    }

    /// Resolve a wire key id to a full key, if the daemon has seen it.
    pub fn lookup_key(&self, key_id: &str) -> Option<WatchKey> {
        self.known_keys.lock().get(key_id).cloned()
    }

    pub fn index(&self) -> &HashIndex {
        &self.index
    }

    pub fn registry(&self) -> &WatchRegistry<B> {
        &self.registry
    }

    pub fn store(&self) -> &PersistStore {
        &self.store
    }

    fn intern(&self, key: &WatchKey) {
        self.known_keys
            .lock()
            .entry(key.id())
            .or_insert_with(|| key.clone());
    }
}
