//! v001 -- Initial schema creation.
//!
//! Creates the `documents` table and the store-wide version sequence.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Documents
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS documents (
    path        TEXT PRIMARY KEY NOT NULL,   -- collection/id[/sub/id...]
    collection  TEXT NOT NULL,               -- path minus the last segment
    version     INTEGER NOT NULL,            -- drawn from `sequence`
    data        TEXT NOT NULL,               -- JSON body
    updated_at  TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);

-- ----------------------------------------------------------------
-- Version sequence (single row)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sequence (
    id    INTEGER PRIMARY KEY CHECK (id = 1),
    value INTEGER NOT NULL
);

INSERT OR IGNORE INTO sequence (id, value) VALUES (1, 0);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
