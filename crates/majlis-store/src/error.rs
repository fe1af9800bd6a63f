use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An update targeted a document that does not exist.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// A malformed document or collection path.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A field update could not be applied to the stored value.
    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    /// A document read inside a transaction changed before commit.
    #[error("Write conflict on {0}")]
    WriteConflict(String),

    /// A transaction kept conflicting until its retry budget ran out.
    #[error("Transaction aborted after {attempts} conflicting attempts")]
    Conflict { attempts: u32 },

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The backend lock was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    Poisoned,
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
