//! Optimistic read-compute-write transactions.
//!
//! A [`Transaction`] records the version of every document it reads and
//! buffers every write. On commit the backend checks that each read version
//! is still current; if any changed, the commit fails with
//! [`StoreError::WriteConflict`] and [`DocumentStore::transaction`] reruns the
//! whole closure against fresh reads, up to the store's attempt budget.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::document::{DocPath, Document};
use crate::error::Result;
use crate::query::Query;
use crate::store::DocumentStore;
use crate::update::FieldUpdate;
use crate::write::{Precondition, Write};

pub struct Transaction<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    reads: BTreeMap<DocPath, u64>,
    writes: Vec<Write>,
}

impl<'a, S: DocumentStore + ?Sized> Transaction<'a, S> {
    pub(crate) fn new(store: &'a S) -> Self {
        Self {
            store,
            reads: BTreeMap::new(),
            writes: Vec::new(),
        }
    }

    fn record(&mut self, path: &DocPath, version: u64) {
        // The first observed version is the one the computation depends on.
        self.reads.entry(path.clone()).or_insert(version);
    }

    pub fn get(&mut self, path: &DocPath) -> Result<Option<Document>> {
        let doc = self.store.get(path)?;
        self.record(path, doc.as_ref().map_or(0, |d| d.version));
        Ok(doc)
    }

    pub fn get_as<T: DeserializeOwned>(&mut self, path: &DocPath) -> Result<Option<T>> {
        self.get(path)?.map(|d| d.decode()).transpose()
    }

    /// Run a query and register every returned document as a read.
    pub fn query(&mut self, query: &Query) -> Result<Vec<Document>> {
        let docs = self.store.query(query)?;
        for doc in &docs {
            self.record(&doc.path, doc.version);
        }
        Ok(docs)
    }

    pub fn set<T: Serialize>(&mut self, path: &DocPath, value: &T) -> Result<()> {
        self.writes.push(Write::Set {
            path: path.clone(),
            data: serde_json::to_value(value)?,
        });
        Ok(())
    }

    pub fn update(&mut self, path: &DocPath, update: FieldUpdate) {
        if !update.is_empty() {
            self.writes.push(Write::Update {
                path: path.clone(),
                update,
            });
        }
    }

    pub fn delete(&mut self, path: &DocPath) {
        self.writes.push(Write::Delete { path: path.clone() });
    }

    pub(crate) fn commit(self) -> Result<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let preconditions: Vec<Precondition> = self
            .reads
            .into_iter()
            .map(|(path, version)| Precondition { path, version })
            .collect();
        self.store.commit(&preconditions, self.writes)
    }
}
