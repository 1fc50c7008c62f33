// src/index/mod.rs

//! Hash index: per-file hash cache and aggregate-hash computation.
//!
//! This module is responsible for:
//! - Caching per-file content hashes behind a length+mtime fingerprint.
//! - Computing deterministic aggregate hashes per [`WatchKey`] (sorted
//!   `(relative path, file hash)` pairs, so traversal order never matters).
//! - Dirty tracking: an invalidating event flips the dirty flag
//!   synchronously, while recomputation is deferred to the next read or a
//!   background refresh. A dirty entry is never served as clean, and an
//!   event that races an in-flight walk keeps that walk's result dirty.
//! - Single-flighted recomputation per key: concurrent callers share one
//!   in-flight walk; unrelated keys compute in parallel.
//!
//! It does **not** know about subscriptions or OS watches; it only answers
//! hash queries and reacts to invalidation calls.

pub mod hasher;
pub mod walk;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::GlobMatcher;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::errors::{HashError, Result};
use crate::key::WatchKey;

use hasher::Fingerprint;

/// Aggregate hash plus member count, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateResult {
    pub hash: String,
    pub file_count: usize,
}

/// One known file: its last computed content hash, the fingerprint that
/// hash is valid for, and the keys whose aggregates include it.
#[derive(Debug)]
struct FileEntry {
    hash: String,
    /// `None` after invalidation: the next walk re-hashes this file.
    fingerprint: Option<Fingerprint>,
    owners: HashSet<WatchKey>,
}

/// Cached aggregate for one key.
struct AggregateEntry {
    hash: String,
    /// Member relative paths, sorted.
    members: Vec<String>,
    matcher: GlobMatcher,
    dirty: bool,
}

#[derive(Default)]
struct Inner {
    files: HashMap<PathBuf, FileEntry>,
    aggregates: HashMap<WatchKey, AggregateEntry>,
    /// Walks currently in flight, by key. Invalidation consults this so a
    /// key whose first computation has not installed an entry yet still
    /// observes the event.
    in_flight: HashMap<WatchKey, GlobMatcher>,
    /// Per-key invalidation counters, bumped on every invalidation. Kept
    /// outside the entries: a walk compares the counter it saw at start
    /// against the current one at writeback, whether or not an entry
    /// existed when the event arrived.
    epochs: HashMap<WatchKey, u64>,
    /// Number of directory walks performed (cache hits perform none).
    walks: u64,
}

/// Controls what happens to a computed aggregate once the walk finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Writeback {
    /// Install the entry unconditionally (explicit `hash` requests).
    Always,
    /// Install only if the entry still exists; a result for a key evicted
    /// mid-flight is discarded.
    IfPresent,
}

pub struct HashIndex {
    inner: Arc<Mutex<Inner>>,
    /// Per-key computation locks. The map lock only guards check-and-insert;
    /// the walk itself runs under the per-key lock.
    flights: Mutex<HashMap<WatchKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Default for HashIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl HashIndex {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Clean cache hit, if any. No I/O.
    pub fn cached(&self, key: &WatchKey) -> Option<AggregateResult> {
        let inner = self.inner.lock();
        inner
            .aggregates
            .get(key)
            .filter(|e| !e.dirty)
            .map(|e| AggregateResult {
                hash: e.hash.clone(),
                file_count: e.members.len(),
            })
    }

    /// Last computed content hash for a single file, if known.
    pub fn file_hash(&self, path: &Path) -> Option<String> {
        self.inner.lock().files.get(path).map(|f| f.hash.clone())
    }

    /// Number of directory walks performed so far.
    pub fn walks(&self) -> u64 {
        self.inner.lock().walks
    }

    /// Return the aggregate for `key`, computing it when missing or dirty.
    pub async fn get_or_compute(&self, key: &WatchKey) -> Result<AggregateResult> {
        if let Some(hit) = self.cached(key) {
            debug!(key = %key.id(), "aggregate cache hit");
            return Ok(hit);
        }
        self.compute(key, Writeback::Always).await
    }

    /// Background recompute for an existing entry.
    ///
    /// Returns `Ok(None)` when the key has no aggregate entry (never hashed,
    /// or evicted mid-flight); such results are discarded rather than
    /// written back to an orphaned entry.
    pub async fn refresh(&self, key: &WatchKey) -> Result<Option<AggregateResult>> {
        if let Some(hit) = self.cached(key) {
            return Ok(Some(hit));
        }
        if !self.inner.lock().aggregates.contains_key(key) {
            return Ok(None);
        }
        self.compute(key, Writeback::IfPresent).await.map(Some)
    }

    /// Mark every aggregate that references or matches `path` dirty and
    /// clear the file's fingerprint. Metadata only, no I/O. Returns the
    /// affected keys.
    pub fn invalidate_file(&self, path: &Path) -> Vec<WatchKey> {
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.files.get_mut(path) {
            entry.fingerprint = None;
            trace!(path = %path.display(), "cleared file fingerprint");
        }

        let mut affected = Vec::new();
        for (key, agg) in inner.aggregates.iter_mut() {
            let hit = match walk::relative_str(&key.watch_dir(), path) {
                Some(rel) => {
                    agg.matcher.is_match(&rel) || agg.members.binary_search(&rel).is_ok()
                }
                None => false,
            };
            if hit {
                agg.dirty = true;
                affected.push(key.clone());
            }
        }

        // A first computation has no entry yet; its in-flight walk must
        // still see the event or its result would land clean and stale.
        for (key, matcher) in inner.in_flight.iter() {
            if affected.contains(key) {
                continue;
            }
            if let Some(rel) = walk::relative_str(&key.watch_dir(), path) {
                if matcher.is_match(&rel) {
                    affected.push(key.clone());
                }
            }
        }

        for key in &affected {
            *inner.epochs.entry(key.clone()).or_insert(0) += 1;
        }

        if !affected.is_empty() {
            debug!(
                path = %path.display(),
                keys = affected.len(),
                "invalidated aggregates"
            );
        }
        affected
    }

    /// Drop the aggregate for `key` and any file entries it alone owned.
    pub fn evict(&self, key: &WatchKey) {
        let mut inner = self.inner.lock();
        inner.epochs.remove(key);
        if let Some(agg) = inner.aggregates.remove(key) {
            let watch_dir = key.watch_dir();
            for rel in &agg.members {
                let abs = watch_dir.join(rel);
                let drop_file = match inner.files.get_mut(&abs) {
                    Some(file) => {
                        file.owners.remove(key);
                        file.owners.is_empty()
                    }
                    None => false,
                };
                if drop_file {
                    inner.files.remove(&abs);
                }
            }
            debug!(key = %key.id(), "evicted aggregate entry");
        }
        drop(inner);
        self.flights.lock().remove(key);
    }

    async fn compute(&self, key: &WatchKey, writeback: Writeback) -> Result<AggregateResult> {
        let flight = {
            let mut flights = self.flights.lock();
            Arc::clone(
                flights
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        let _guard = flight.lock().await;

        // Another caller may have landed the result while we waited.
        if let Some(hit) = self.cached(key) {
            return Ok(hit);
        }

        let key = key.clone();
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || compute_blocking(&inner, &key, writeback))
            .await
            .map_err(|e| HashError::Internal(format!("hash task panicked: {e}")))?
    }
}

/// Walk, hash and aggregate one key. Runs on the blocking pool; the index
/// lock is only taken for short map operations, never across file I/O.
fn compute_blocking(
    inner: &Mutex<Inner>,
    key: &WatchKey,
    writeback: Writeback,
) -> Result<AggregateResult> {
    let matcher = walk::compile_glob(key.glob())?;
    let watch_dir = key.watch_dir();

    let start_epoch = begin_walk(inner, key, &matcher);
    let walked =
        walk::matching_files(&watch_dir, &matcher).and_then(|files| hash_files(inner, &files));

    finish_walk(inner, key, &watch_dir, matcher, start_epoch, walked, writeback)
}

/// Register the walk as in flight and snapshot the key's invalidation
/// counter.
fn begin_walk(inner: &Mutex<Inner>, key: &WatchKey, matcher: &GlobMatcher) -> u64 {
    let mut guard = inner.lock();
    guard.walks += 1;
    guard.in_flight.insert(key.clone(), matcher.clone());
    guard.epochs.get(key).copied().unwrap_or(0)
}

/// Hash the walked files, reusing cached hashes behind fingerprints.
fn hash_files(inner: &Mutex<Inner>, files: &[walk::MatchedFile]) -> Result<Vec<(String, String)>> {
    let mut members = Vec::with_capacity(files.len());
    for file in files {
        let current = hasher::fingerprint(&file.abs).map_err(|source| HashError::ReadFile {
            path: file.abs.clone(),
            source,
        })?;

        let reused = {
            let guard = inner.lock();
            guard
                .files
                .get(&file.abs)
                .filter(|f| f.fingerprint == Some(current))
                .map(|f| f.hash.clone())
        };

        let hash = match reused {
            Some(hash) => hash,
            None => {
                let hash = hasher::hash_file(&file.abs)?;
                let mut guard = inner.lock();
                let entry = guard
                    .files
                    .entry(file.abs.clone())
                    .or_insert_with(|| FileEntry {
                        hash: hash.clone(),
                        fingerprint: Some(current),
                        owners: HashSet::new(),
                    });
                entry.hash = hash.clone();
                entry.fingerprint = Some(current);
                hash
            }
        };

        members.push((file.rel.clone(), hash));
    }
    Ok(members)
}

/// Deregister the walk and write its result back. A counter bumped since
/// [`begin_walk`] means an event raced the walk, whether or not an entry
/// existed at the time; the entry then stays dirty so the stale window
/// closes on the next read.
fn finish_walk(
    inner: &Mutex<Inner>,
    key: &WatchKey,
    watch_dir: &Path,
    matcher: GlobMatcher,
    start_epoch: u64,
    walked: Result<Vec<(String, String)>>,
    writeback: Writeback,
) -> Result<AggregateResult> {
    let mut guard = inner.lock();
    guard.in_flight.remove(key);
    let members = walked?;

    let aggregate = hasher::aggregate(&members);
    let result = AggregateResult {
        hash: aggregate.clone(),
        file_count: members.len(),
    };

    let previous = guard.aggregates.get(key);
    if writeback == Writeback::IfPresent && previous.is_none() {
        debug!(key = %key.id(), "entry evicted mid-flight; discarding recompute");
        return Ok(result);
    }

    let old_members: Vec<String> = previous.map(|a| a.members.clone()).unwrap_or_default();
    let current_epoch = guard.epochs.get(key).copied().unwrap_or(0);
    let still_dirty = current_epoch != start_epoch;

    let rels: Vec<String> = members.into_iter().map(|(rel, _)| rel).collect();

    // Ownership bookkeeping: adopt new members, release vanished ones.
    for rel in &rels {
        let abs = watch_dir.join(rel);
        if let Some(file) = guard.files.get_mut(&abs) {
            file.owners.insert(key.clone());
        }
    }
    for rel in &old_members {
        if rels.binary_search(rel).is_err() {
            let abs = watch_dir.join(rel);
            let drop_file = match guard.files.get_mut(&abs) {
                Some(file) => {
                    file.owners.remove(key);
                    file.owners.is_empty()
                }
                None => false,
            };
            if drop_file {
                guard.files.remove(&abs);
            }
        }
    }

    guard.aggregates.insert(
        key.clone(),
        AggregateEntry {
            hash: aggregate,
            members: rels,
            matcher,
            dirty: still_dirty,
        },
    );

    debug!(
        key = %key.id(),
        files = result.file_count,
        dirty = still_dirty,
        "aggregate computed"
    );
    Ok(result)
}
