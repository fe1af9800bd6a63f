//! Push-based change subscriptions.
//!
//! A subscriber receives an initial snapshot and then a fresh snapshot after
//! every committed write that touches its target. Dropping the
//! [`Subscription`] releases the listener.
//!
//! Backends dispatch after releasing their own lock, so two commits may build
//! their snapshots in one order and deliver them in the other. Every snapshot
//! carries the store sequence it was read at, and a listener only accepts
//! snapshots newer than the last one it was sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::document::{DocPath, Document};
use crate::error::Result;
use crate::query::Query;

#[derive(Debug, Clone, PartialEq)]
pub enum WatchTarget {
    Document(DocPath),
    Query(Query),
}

impl WatchTarget {
    fn interested(&self, changed: &[DocPath]) -> bool {
        match self {
            WatchTarget::Document(path) => changed.contains(path),
            WatchTarget::Query(query) => changed
                .iter()
                .any(|p| query.watches_collection(p.collection())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Document {
        path: DocPath,
        document: Option<Document>,
    },
    Query(Vec<Document>),
}

struct Watcher {
    target: WatchTarget,
    tx: mpsc::UnboundedSender<Snapshot>,
    /// Sequence of the newest snapshot sent.
    delivered: Option<u64>,
}

type Registry = Mutex<HashMap<u64, Watcher>>;

/// Listener registry owned by a store backend.
#[derive(Clone, Default)]
pub(crate) struct Watchers {
    inner: Arc<Registry>,
    next_id: Arc<AtomicU64>,
}

impl Watchers {
    /// Register a listener with nothing delivered yet. The backend follows up
    /// with [`Watchers::offer`] for the initial snapshot, so a commit racing
    /// the registration is never missed.
    pub(crate) fn register(&self, target: WatchTarget) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock()?.insert(
            id,
            Watcher {
                target,
                tx,
                delivered: None,
            },
        );
        debug!(id, "subscription registered");

        Ok(Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.inner),
        })
    }

    /// Send `snapshot` to listener `id` unless it already has one read at
    /// `sequence` or later.
    pub(crate) fn offer(&self, id: u64, sequence: u64, snapshot: Snapshot) {
        let Ok(mut map) = self.inner.lock() else {
            return;
        };
        let closed = match map.get_mut(&id) {
            Some(watcher) if watcher.delivered.map_or(true, |d| sequence > d) => {
                watcher.delivered = Some(sequence);
                watcher.tx.send(snapshot).is_err()
            }
            Some(_) => {
                trace!(id, sequence, "stale snapshot skipped");
                false
            }
            None => false,
        };
        if closed {
            map.remove(&id);
        }
    }

    /// Offer a fresh snapshot to every listener whose target was touched.
    /// `snapshot` returns the store sequence alongside the snapshot.
    pub(crate) fn dispatch<F>(&self, changed: &[DocPath], mut snapshot: F)
    where
        F: FnMut(&WatchTarget) -> Result<(u64, Snapshot)>,
    {
        if changed.is_empty() {
            return;
        }

        let interested: Vec<(u64, WatchTarget)> = match self.inner.lock() {
            Ok(map) => map
                .iter()
                .filter(|(_, w)| w.target.interested(changed))
                .map(|(id, w)| (*id, w.target.clone()))
                .collect(),
            Err(_) => return,
        };

        for (id, target) in interested {
            match snapshot(&target) {
                Ok((sequence, snap)) => self.offer(id, sequence, snap),
                Err(e) => warn!(id, error = %e, "failed to build subscription snapshot"),
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }
}

/// Handle to a live listener. Dropping it unsubscribes.
pub struct Subscription {
    pub(crate) id: u64,
    rx: mpsc::UnboundedReceiver<Snapshot>,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Wait for the next snapshot. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }

    /// Take the next pending snapshot without waiting.
    pub fn try_recv(&mut self) -> Option<Snapshot> {
        self.rx.try_recv().ok()
    }

    /// Explicitly release the listener.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut map) = registry.lock() {
                map.remove(&self.id);
                debug!(id = self.id, "subscription released");
            }
        }
    }
}
