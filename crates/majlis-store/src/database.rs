//! SQLite backend.
//!
//! Documents are stored as JSON text keyed by path, with a version column
//! drawn from a single-row sequence. Commits run inside one SQLite
//! transaction, so the precondition check and the writes are atomic.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use majlis_shared::constants::DEFAULT_TX_ATTEMPTS;

use crate::document::{DocPath, Document};
use crate::error::{Result, StoreError};
use crate::migrations;
use crate::query::Query;
use crate::store::DocumentStore;
use crate::subscription::{Snapshot, Subscription, WatchTarget, Watchers};
use crate::write::{stage, Precondition, Write};

/// Wrapper around a [`rusqlite::Connection`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
    watchers: Watchers,
    attempts: u32,
}

impl SqliteStore {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/majlis/majlis.db`
    /// - macOS:   `~/Library/Application Support/com.majlis.majlis/majlis.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\majlis\majlis\data\majlis.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "majlis", "majlis").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("majlis.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            watchers: Watchers::default(),
            attempts: DEFAULT_TX_ATTEMPTS,
        })
    }

    pub fn with_transaction_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        let conn = self.conn.lock().ok()?;
        conn.path().map(PathBuf::from)
    }

    /// Read `target` and the sequence under one connection lock.
    fn snapshot(&self, target: &WatchTarget) -> Result<(u64, Snapshot)> {
        let conn = self.conn.lock()?;
        let sequence: i64 =
            conn.query_row("SELECT value FROM sequence WHERE id = 1", [], |row| row.get(0))?;
        let snapshot = match target {
            WatchTarget::Document(path) => Snapshot::Document {
                path: path.clone(),
                document: read_doc(&conn, path)?,
            },
            WatchTarget::Query(query) => Snapshot::Query(query_docs(&conn, query)?),
        };
        Ok((sequence as u64, snapshot))
    }
}

impl DocumentStore for SqliteStore {
    fn get(&self, path: &DocPath) -> Result<Option<Document>> {
        let conn = self.conn.lock()?;
        read_doc(&conn, path)
    }

    fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let conn = self.conn.lock()?;
        query_docs(&conn, query)
    }

    fn commit(&self, preconditions: &[Precondition], writes: Vec<Write>) -> Result<()> {
        let changed: Vec<DocPath> = {
            let mut conn = self.conn.lock()?;
            let tx = conn.transaction()?;

            for pre in preconditions {
                let current = read_doc(&tx, &pre.path)?.map_or(0, |d| d.version);
                if current != pre.version {
                    return Err(StoreError::WriteConflict(pre.path.to_string()));
                }
            }

            let staged = stage(&writes, |path| Ok(read_doc(&tx, path)?.map(|d| d.data)))?;

            let now = Utc::now().to_rfc3339();
            for (path, body) in &staged {
                // Deletes advance the sequence too, so listeners can order them.
                tx.execute("UPDATE sequence SET value = value + 1 WHERE id = 1", [])?;
                match body {
                    Some(data) => {
                        let version: i64 =
                            tx.query_row("SELECT value FROM sequence WHERE id = 1", [], |row| {
                                row.get(0)
                            })?;
                        tx.execute(
                            "INSERT INTO documents (path, collection, version, data, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5)
                             ON CONFLICT(path) DO UPDATE SET
                                 version = excluded.version,
                                 data = excluded.data,
                                 updated_at = excluded.updated_at",
                            params![
                                path.as_str(),
                                path.collection(),
                                version,
                                serde_json::to_string(data)?,
                                now,
                            ],
                        )?;
                    }
                    None => {
                        tx.execute(
                            "DELETE FROM documents WHERE path = ?1",
                            params![path.as_str()],
                        )?;
                    }
                }
            }

            tx.commit()?;
            staged.into_keys().collect()
        };

        tracing::trace!(writes = changed.len(), "sqlite commit applied");
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

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_doc(conn: &Connection, path: &DocPath) -> Result<Option<Document>> {
    let row = conn
        .query_row(
            "SELECT version, data FROM documents WHERE path = ?1",
            params![path.as_str()],
            |row| {
                let version: i64 = row.get(0)?;
                let data: String = row.get(1)?;
                Ok((version, data))
            },
        )
        .optional()?;

    row.map(|(version, data)| {
        Ok(Document {
            path: path.clone(),
            version: version as u64,
            data: serde_json::from_str(&data)?,
        })
    })
    .transpose()
}

fn query_docs(conn: &Connection, query: &Query) -> Result<Vec<Document>> {
    let mut stmt = conn.prepare(
        "SELECT path, version, data
         FROM documents
         WHERE collection = ?1",
    )?;

    let rows = stmt.query_map(params![query.collection], |row| {
        let path: String = row.get(0)?;
        let version: i64 = row.get(1)?;
        let data: String = row.get(2)?;
        Ok((path, version, data))
    })?;

    let mut docs = Vec::new();
    for row in rows {
        let (path, version, data) = row?;
        docs.push(Document {
            path: DocPath::parse(&path)?,
            version: version as u64,
            data: serde_json::from_str(&data)?,
        });
    }
    Ok(query.evaluate(docs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::FieldUpdate;
    use serde_json::json;

    #[test]
    fn test_open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let store = SqliteStore::open_at(&path).expect("should open");
        assert!(store.path().is_some());
    }

    #[test]
    fn test_documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let doc = DocPath::parse("users/u1").unwrap();

        {
            let store = SqliteStore::open_at(&path).unwrap();
            store.set(&doc, &json!({ "wallet": { "diamonds": 3 } })).unwrap();
            store.increment(&doc, "wallet.diamonds", 4).unwrap();
        }

        let store = SqliteStore::open_at(&path).unwrap();
        let loaded = store.get(&doc).unwrap().unwrap();
        assert_eq!(loaded.data["wallet"]["diamonds"], 7);
    }

    #[test]
    fn test_stale_transaction_conflicts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let p = DocPath::parse("rooms/r1").unwrap();
        store.set(&p, &json!({ "room_wealth": 10 })).unwrap();
        let stale = store.get(&p).unwrap().unwrap().version;
        store.increment(&p, "room_wealth", 5).unwrap();

        let err = store.commit(
            &[Precondition { path: p.clone(), version: stale }],
            vec![Write::Update {
                path: p.clone(),
                update: FieldUpdate::new().increment("room_wealth", -10),
            }],
        );
        assert!(matches!(err, Err(StoreError::WriteConflict(_))));
        assert_eq!(store.get(&p).unwrap().unwrap().data["room_wealth"], 15);
    }

    #[test]
    fn test_listener_sees_writes_in_commit_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let p = DocPath::parse("rooms/r1").unwrap();
        let mut sub = store.subscribe(WatchTarget::Document(p.clone())).unwrap();
        assert!(matches!(
            sub.try_recv(),
            Some(Snapshot::Document { document: None, .. })
        ));

        store.set(&p, &json!({ "room_wealth": 1 })).unwrap();
        store.increment(&p, "room_wealth", 1).unwrap();
        store.delete(&p).unwrap();

        let mut seen = Vec::new();
        while let Some(Snapshot::Document { document, .. }) = sub.try_recv() {
            seen.push(document.map(|d| d.data["room_wealth"].clone()));
        }
        assert_eq!(seen, vec![Some(json!(1)), Some(json!(2)), None]);
    }

    #[test]
    fn test_query_collection_scoped() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set(&DocPath::parse("users/a").unwrap(), &json!({ "display_id": "111111" })).unwrap();
        store.set(&DocPath::parse("users/b").unwrap(), &json!({ "display_id": "222222" })).unwrap();
        store
            .set(&DocPath::parse("users/a/notifications/n1").unwrap(), &json!({ "display_id": "111111" }))
            .unwrap();

        let q = Query::collection("users")
            .unwrap()
            .filter("display_id", crate::query::FilterOp::Eq, "111111")
            .unwrap();
        let docs = store.query(&q).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id(), "a");
    }
}
