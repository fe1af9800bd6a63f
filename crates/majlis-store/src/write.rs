//! Buffered writes and the staging logic shared by every backend.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::document::DocPath;
use crate::error::{Result, StoreError};
use crate::store::DocumentStore;
use crate::update::FieldUpdate;

#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Replace (or create) the whole document.
    Set { path: DocPath, data: Value },
    /// Apply field operations to an existing document.
    Update { path: DocPath, update: FieldUpdate },
    Delete { path: DocPath },
}

impl Write {
    pub fn path(&self) -> &DocPath {
        match self {
            Write::Set { path, .. } | Write::Update { path, .. } | Write::Delete { path } => path,
        }
    }
}

/// The commit only succeeds if `path` is still at `version` (`0` = absent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    pub path: DocPath,
    pub version: u64,
}

/// Resolve `writes` against the current contents of the touched documents.
///
/// `current` yields the stored body of a path. The result maps every touched
/// path to its new body (`None` = deleted). Nothing is returned on error, so
/// a failing write leaves the store untouched.
pub(crate) fn stage<F>(writes: &[Write], mut current: F) -> Result<BTreeMap<DocPath, Option<Value>>>
where
    F: FnMut(&DocPath) -> Result<Option<Value>>,
{
    let mut staged: BTreeMap<DocPath, Option<Value>> = BTreeMap::new();
    for write in writes {
        match write {
            Write::Set { path, data } => {
                staged.insert(path.clone(), Some(data.clone()));
            }
            Write::Delete { path } => {
                staged.insert(path.clone(), None);
            }
            Write::Update { path, update } => {
                let base = match staged.get(path) {
                    Some(existing) => existing.clone(),
                    None => current(path)?,
                };
                let mut body = base.ok_or_else(|| StoreError::NotFound(path.to_string()))?;
                update.apply(&mut body)?;
                staged.insert(path.clone(), Some(body));
            }
        }
    }
    Ok(staged)
}

/// Non-transactional multi-document write, atomic per commit.
pub struct WriteBatch<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    writes: Vec<Write>,
}

impl<'a, S: DocumentStore + ?Sized> WriteBatch<'a, S> {
    pub(crate) fn new(store: &'a S) -> Self {
        Self {
            store,
            writes: Vec::new(),
        }
    }

    pub fn set<T: Serialize>(&mut self, path: &DocPath, value: &T) -> Result<&mut Self> {
        self.writes.push(Write::Set {
            path: path.clone(),
            data: serde_json::to_value(value)?,
        });
        Ok(self)
    }

    pub fn update(&mut self, path: &DocPath, update: FieldUpdate) -> &mut Self {
        self.writes.push(Write::Update {
            path: path.clone(),
            update,
        });
        self
    }

    pub fn delete(&mut self, path: &DocPath) -> &mut Self {
        self.writes.push(Write::Delete { path: path.clone() });
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn commit(self) -> Result<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        self.store.commit(&[], self.writes)
    }
}
