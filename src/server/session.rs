// src/server/session.rs

//! Per-connection session state and request dispatch, separated from the
//! socket I/O so the protocol semantics are unit-testable.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::daemon::Daemon;
use crate::key::WatchKey;
use crate::watch::backend::WatchBackend;
use crate::watch::registry::{ChangeNotification, SubscriptionId};

use super::protocol::{Request, Response, UnwatchTarget};

/// Subscriptions owned by one connection, by wire key id.
pub struct Session {
    subs: HashMap<String, (WatchKey, Vec<SubscriptionId>)>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            subs: HashMap::new(),
        }
    }

    /// Handle one request against the shared daemon state.
    ///
    /// `events` is this connection's delivery channel; `watch` hands a
    /// clone of it to the registry.
    pub async fn process<B: WatchBackend>(
        &mut self,
        daemon: &Daemon<B>,
        request: Request,
        events: &mpsc::Sender<ChangeNotification>,
    ) -> Response {
        match request {
            Request::Hash {
                root,
                path,
                glob,
                persistent,
            } => {
                let key = WatchKey::new(&root, &path, &glob);
                match daemon.hash(&key, persistent).await {
                    Ok(result) => Response::Hash {
                        hash: result.hash,
                        file_count: result.file_count,
                    },
                    Err(e) => Response::Error {
                        error: e.to_string(),
                    },
                }
            }

            Request::Watch { root, path, glob } => {
                let key = WatchKey::new(&root, &path, &glob);
                let key_id = key.id();

                // Watching the same key twice on one connection is a no-op;
                // one subscription already delivers every event.
                if self.subs.contains_key(&key_id) {
                    return Response::Watch { key: key_id };
                }

                match daemon.watch(&key, events.clone()) {
                    Ok(id) => {
                        self.subs.insert(key_id.clone(), (key, vec![id]));
                        Response::Watch { key: key_id }
                    }
                    Err(e) => Response::Error {
                        error: e.to_string(),
                    },
                }
            }

            Request::Unwatch(target) => {
                let key_id = match target {
                    UnwatchTarget::Key { key } => key,
                    UnwatchTarget::Spec { root, path, glob } => {
                        WatchKey::new(&root, &path, &glob).id()
                    }
                };

                // Unknown keys ack idempotently.
                let Some(key) = daemon.lookup_key(&key_id) else {
                    return Response::Ack { ok: true };
                };

                let ids = self
                    .subs
                    .remove(&key_id)
                    .map(|(_, ids)| ids)
                    .unwrap_or_default();

                match daemon.unwatch(&key, &ids) {
                    Ok(()) => Response::Ack { ok: true },
                    Err(e) => Response::Error {
                        error: e.to_string(),
                    },
                }
            }
        }
    }

    /// Hand the connection's subscriptions over for teardown.
    pub fn into_subscriptions(self) -> Vec<(WatchKey, SubscriptionId)> {
        self.subs
            .into_values()
            .flat_map(|(key, ids)| ids.into_iter().map(move |id| (key.clone(), id)))
            .collect()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
