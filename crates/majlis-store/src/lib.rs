//! # majlis-store
//!
//! The document-store collaborator behind every Majlis operation.
//!
//! [`DocumentStore`] offers document get/set/update/delete, collection
//! queries, atomic increments, optimistic multi-document transactions,
//! batched writes and change subscriptions. Two backends are provided: an
//! in-process [`MemoryStore`] and a [`SqliteStore`] persisted with rusqlite.

pub mod database;
pub mod document;
pub mod memory;
pub mod migrations;
pub mod query;
pub mod store;
pub mod subscription;
pub mod transaction;
pub mod update;
pub mod write;

mod error;

pub use database::SqliteStore;
pub use document::{DocPath, Document};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use query::{Direction, FilterOp, Query};
pub use store::{new_doc_path, DocumentStore};
pub use subscription::{Snapshot, Subscription, WatchTarget};
pub use transaction::Transaction;
pub use update::FieldUpdate;
pub use write::{Precondition, Write, WriteBatch};
