//! In-process backend: a versioned map behind a lock.
//!
//! Used by tests and by the server when `DATABASE_PATH=:memory:`.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde_json::Value;
use tracing::trace;

use majlis_shared::constants::DEFAULT_TX_ATTEMPTS;

use crate::document::{DocPath, Document};
use crate::error::{Result, StoreError};
use crate::query::Query;
use crate::store::DocumentStore;
use crate::subscription::{Snapshot, Subscription, WatchTarget, Watchers};
use crate::write::{stage, Precondition, Write};

#[derive(Default)]
struct State {
    docs: BTreeMap<DocPath, (u64, Value)>,
    /// Bumped by every write, deletes included.
    sequence: u64,
}

impl State {
    fn document(&self, path: &DocPath) -> Option<Document> {
        self.docs.get(path).map(|(version, data)| Document {
            path: path.clone(),
            version: *version,
            data: data.clone(),
        })
    }

    fn query(&self, query: &Query) -> Vec<Document> {
        let docs = self
            .docs
            .iter()
            .filter(|(path, _)| path.collection() == query.collection)
            .map(|(path, (version, data))| Document {
                path: path.clone(),
                version: *version,
                data: data.clone(),
            });
        query.evaluate(docs)
    }
}

pub struct MemoryStore {
    state: RwLock<State>,
    watchers: Watchers,
    attempts: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_transaction_attempts(DEFAULT_TX_ATTEMPTS)
    }

    pub fn with_transaction_attempts(attempts: u32) -> Self {
        Self {
            state: RwLock::new(State::default()),
            watchers: Watchers::default(),
            attempts,
        }
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.watchers.len()
    }

    /// Read `target` and the sequence under one lock.
    fn snapshot(&self, target: &WatchTarget) -> Result<(u64, Snapshot)> {
        let state = self.state.read()?;
        let snapshot = match target {
            WatchTarget::Document(path) => Snapshot::Document {
                path: path.clone(),
                document: state.document(path),
            },
            WatchTarget::Query(query) => Snapshot::Query(state.query(query)),
        };
        Ok((state.sequence, snapshot))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, path: &DocPath) -> Result<Option<Document>> {
        Ok(self.state.read()?.document(path))
    }

    fn query(&self, query: &Query) -> Result<Vec<Document>> {
        Ok(self.state.read()?.query(query))
    }

    fn commit(&self, preconditions: &[Precondition], writes: Vec<Write>) -> Result<()> {
        let changed: Vec<DocPath> = {
            let mut state = self.state.write()?;

            for pre in preconditions {
                let current = state.docs.get(&pre.path).map_or(0, |(v, _)| *v);
                if current != pre.version {
                    return Err(StoreError::WriteConflict(pre.path.to_string()));
                }
            }

            let staged = stage(&writes, |path| {
                Ok(state.docs.get(path).map(|(_, data)| data.clone()))
            })?;

            let mut changed = Vec::with_capacity(staged.len());
            for (path, body) in staged {
                state.sequence += 1;
                match body {
                    Some(data) => {
                        let version = state.sequence;
                        state.docs.insert(path.clone(), (version, data));
                    }
                    None => {
                        state.docs.remove(&path);
                    }
                }
                changed.push(path);
            }
            changed
        };

        trace!(writes = changed.len(), "memory commit applied");
        self.watchers
            .dispatch(&changed, |target| self.snapshot(target));
        Ok(())
    }

    fn subscribe(&self, target: WatchTarget) -> Result<Subscription> {
        let subscription = self.watchers.register(target.clone())?;
        let (sequence, initial) = self.snapshot(&target)?;
        self.watchers.offer(subscription.id, sequence, initial);
        Ok(subscription)
    }

    fn transaction_attempts(&self) -> u32 {
        self.attempts
    }
}
