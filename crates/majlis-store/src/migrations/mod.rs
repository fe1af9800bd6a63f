//! Schema migrations for [`SqliteStore`](crate::SqliteStore).
//!
//! `PRAGMA user_version` records the last applied step, so opening an
//! up-to-date database is a single pragma read.

pub mod v001_documents;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> std::result::Result<(), rusqlite::Error>;

/// Ordered by version; append new steps at the end.
const STEPS: &[(u32, &str, Step)] = &[(1, "v001_documents", v001_documents::up)];

fn target_version() -> u32 {
    STEPS.last().map(|(v, _, _)| *v).unwrap_or(0)
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let target = target_version();

    if current > target {
        return Err(StoreError::Migration(format!(
            "database schema v{current} is newer than this build (v{target})"
        )));
    }

    tracing::debug!(current_version = current, target_version = target, "checking schema");

    for (version, name, up) in STEPS.iter().filter(|(v, _, _)| *v > current) {
        tracing::info!(version, name, "applying migration");
        up(conn).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}
