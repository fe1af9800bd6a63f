//! The document-store collaborator every Majlis operation is written against.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::document::{validate_collection, DocPath, Document};
use crate::error::{Result, StoreError};
use crate::query::Query;
use crate::subscription::{Subscription, WatchTarget};
use crate::transaction::Transaction;
use crate::update::FieldUpdate;
use crate::write::{Precondition, Write, WriteBatch};

/// A document-oriented store with optimistic multi-document commits.
///
/// Backends implement the four primitives; everything else is derived.
pub trait DocumentStore: Send + Sync {
    fn get(&self, path: &DocPath) -> Result<Option<Document>>;

    fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Apply `writes` atomically, but only if every precondition still holds.
    ///
    /// Fails with [`StoreError::WriteConflict`] when a precondition is stale
    /// and with [`StoreError::NotFound`] when an update targets a missing
    /// document. Either way nothing is written.
    fn commit(&self, preconditions: &[Precondition], writes: Vec<Write>) -> Result<()>;

    /// Listen to a document or a query. The initial snapshot is delivered
    /// immediately.
    fn subscribe(&self, target: WatchTarget) -> Result<Subscription>;

    /// How many times [`DocumentStore::transaction`] runs its closure before
    /// giving up with [`StoreError::Conflict`].
    fn transaction_attempts(&self) -> u32;

    // ------------------------------------------------------------------
    // Derived operations
    // ------------------------------------------------------------------

    fn get_as<T: DeserializeOwned>(&self, path: &DocPath) -> Result<Option<T>>
    where
        Self: Sized,
    {
        self.get(path)?.map(|d| d.decode()).transpose()
    }

    fn set<T: Serialize>(&self, path: &DocPath, value: &T) -> Result<()>
    where
        Self: Sized,
    {
        self.commit(
            &[],
            vec![Write::Set {
                path: path.clone(),
                data: serde_json::to_value(value)?,
            }],
        )
    }

    fn update(&self, path: &DocPath, update: FieldUpdate) -> Result<()> {
        self.commit(
            &[],
            vec![Write::Update {
                path: path.clone(),
                update,
            }],
        )
    }

    fn delete(&self, path: &DocPath) -> Result<()> {
        self.commit(&[], vec![Write::Delete { path: path.clone() }])
    }

    /// Atomically add `delta` to an integer field.
    fn increment(&self, path: &DocPath, field: &str, delta: i64) -> Result<()> {
        self.update(path, FieldUpdate::new().increment(field, delta))
    }

    /// Store `value` under a fresh random id in `collection`.
    fn add<T: Serialize>(&self, collection: &str, value: &T) -> Result<DocPath>
    where
        Self: Sized,
    {
        let path = new_doc_path(collection)?;
        self.set(&path, value)?;
        Ok(path)
    }

    fn batch(&self) -> WriteBatch<'_, Self>
    where
        Self: Sized,
    {
        WriteBatch::new(self)
    }

    /// Run `f` as an optimistic transaction, retrying on write conflicts.
    ///
    /// Any error returned by `f` aborts the transaction without writing.
    fn transaction<T, E, F>(&self, mut f: F) -> std::result::Result<T, E>
    where
        Self: Sized,
        E: From<StoreError>,
        F: FnMut(&mut Transaction<'_, Self>) -> std::result::Result<T, E>,
    {
        let attempts = self.transaction_attempts().max(1);
        for attempt in 1..=attempts {
            let mut tx = Transaction::new(self);
            let value = f(&mut tx)?;
            match tx.commit() {
                Ok(()) => return Ok(value),
                Err(StoreError::WriteConflict(path)) => {
                    debug!(attempt, %path, "transaction conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Conflict { attempts }.into())
    }
}

/// Allocate a path for a new document in `collection`.
pub fn new_doc_path(collection: &str) -> Result<DocPath> {
    validate_collection(collection)?;
    DocPath::parse(&format!("{collection}/{}", uuid::Uuid::new_v4().simple()))
}
