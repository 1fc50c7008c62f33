// src/watch/invalidator.rs

//! Event processing: raw filesystem events in, debounced invalidation,
//! background recompute and coalesced notifications out.
//!
//! Invalidation (flipping dirty flags, clearing fingerprints) happens
//! synchronously per event. Recompute and notification are deferred behind
//! a per-key debounce deadline so editor save bursts (truncate + write +
//! rename) collapse into a single cycle. Keys nobody watches stay lazily
//! dirty: the next `hash` request pays the recompute.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::index::HashIndex;
use crate::key::WatchKey;

use super::backend::{RawEvent, WatchBackend};
use super::registry::WatchRegistry;

struct PendingKey {
    deadline: Instant,
    /// Accumulated changed paths; a set, so a file rewritten five times in
    /// one window appears once in the notification.
    paths: BTreeSet<String>,
}

/// Spawn the invalidator loop. It runs until the event channel closes.
pub fn spawn<B: WatchBackend>(
    index: Arc<HashIndex>,
    registry: Arc<WatchRegistry<B>>,
    mut events: mpsc::Receiver<RawEvent>,
    debounce: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending: HashMap<WatchKey, PendingKey> = HashMap::new();
        // Tick at a fraction of the window so deadlines fire promptly
        // without a timer task per key.
        let tick = (debounce / 4).max(Duration::from_millis(10));
        let mut interval = tokio::time::interval(tick);

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else {
                        debug!("event channel closed; invalidator exiting");
                        break;
                    };
                    for path in &event.paths {
                        trace!(path = %path.display(), "raw filesystem event");

                        // Synchronous, cheap: dirty flags are set before any
                        // subsequent read can report clean.
                        let dirtied = index.invalidate_file(path);
                        let mut watched = registry.affected_keys(path);
                        for key in dirtied {
                            if !watched.contains(&key) && registry.has_watchers(&key) {
                                watched.push(key);
                            }
                        }

                        let path_str = path.to_string_lossy().to_string();
                        for key in watched {
                            let slot = pending.entry(key).or_insert_with(|| PendingKey {
                                deadline: Instant::now() + debounce,
                                paths: BTreeSet::new(),
                            });
                            // Further events extend the window.
                            slot.deadline = Instant::now() + debounce;
                            slot.paths.insert(path_str.clone());
                        }
                    }
                }
                _ = interval.tick() => {
                    let now = Instant::now();
                    let due: Vec<WatchKey> = pending
                        .iter()
                        .filter(|(_, slot)| slot.deadline <= now)
                        .map(|(key, _)| key.clone())
                        .collect();

                    for key in due {
                        let Some(slot) = pending.remove(&key) else { continue };
                        let paths: Vec<String> = slot.paths.into_iter().collect();
                        fire(Arc::clone(&index), Arc::clone(&registry), key, paths);
                    }
                }
            }
        }
    })
}

/// Debounce window elapsed for one key: recompute in the background and
/// push a single coalesced notification. The stale aggregate stays
/// servable-as-dirty until the recompute lands.
fn fire<B: WatchBackend>(
    index: Arc<HashIndex>,
    registry: Arc<WatchRegistry<B>>,
    key: WatchKey,
    paths: Vec<String>,
) {
    tokio::spawn(async move {
        // The key may have been unwatched during the window.
        if !registry.has_watchers(&key) {
            debug!(key = %key.id(), "watchers gone before debounce fired; skipping");
            return;
        }

        match index.refresh(&key).await {
            Ok(Some(result)) => {
                debug!(key = %key.id(), files = result.file_count, "background recompute done");
            }
            Ok(None) => {
                trace!(key = %key.id(), "no aggregate entry to refresh");
            }
            Err(e) => {
                warn!(key = %key.id(), error = %e, "background recompute failed");
            }
        }

        registry.notify(&key, &paths).await;
    });
}
