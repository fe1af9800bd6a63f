//! Document addressing and the versioned document envelope.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Slash-separated path to a document: `collection/id[/subcollection/id...]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath(String);

impl DocPath {
    pub fn parse(path: &str) -> Result<Self> {
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() % 2 != 0 || segments.iter().any(|s| s.is_empty()) {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(Self(path.to_string()))
    }

    /// Document `id` inside top-level `collection`.
    pub fn new(collection: &str, id: &str) -> Result<Self> {
        Self::parse(&format!("{collection}/{id}"))
    }

    /// Document `id` in `collection` nested under this document.
    pub fn child(&self, collection: &str, id: &str) -> Result<Self> {
        Self::parse(&format!("{}/{collection}/{id}", self.0))
    }

    /// Path of the collection this document lives in.
    pub fn collection(&self) -> &str {
        match self.0.rfind('/') {
            Some(i) => &self.0[..i],
            None => "",
        }
    }

    /// Last path segment.
    pub fn id(&self) -> &str {
        match self.0.rfind('/') {
            Some(i) => &self.0[i + 1..],
            None => &self.0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DocPath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DocPath> for String {
    fn from(value: DocPath) -> Self {
        value.0
    }
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a collection path (odd number of non-empty segments).
pub fn validate_collection(collection: &str) -> Result<()> {
    let segments: Vec<&str> = collection.split('/').collect();
    if segments.len() % 2 != 1 || segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPath(collection.to_string()));
    }
    Ok(())
}

/// A stored document together with the version it was read at.
///
/// Versions are drawn from a store-wide sequence, so a document that is
/// deleted and recreated never reuses an earlier version.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocPath,
    pub version: u64,
    pub data: Value,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    /// Deserialize the document body into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Look up a dotted field path such as `wallet.diamonds`.
    pub fn field(&self, field: &str) -> Option<&Value> {
        lookup(&self.data, field)
    }
}

pub(crate) fn lookup<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(value, |current, key| current.as_object()?.get(key))
}
