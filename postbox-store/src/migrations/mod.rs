//! Schema migration runner.
//!
//! Migrations run on every [`Store::open`](crate::Store::open) and
//! [`Store::open_in_memory`](crate::Store::open_in_memory). Each step is
//! guarded by `PRAGMA user_version` so it is applied exactly once.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version. Bump together with a new migration module.
pub const CURRENT_VERSION: u32 = 1;

/// Apply every outstanding migration to the open connection.
///
/// # Errors
///
/// Returns [`StoreError::Migration`] if a migration script fails, or
/// [`StoreError::Sqlite`] if the version pragma cannot be read or written.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    tracing::debug!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking database migrations"
    );

    if current < 1 {
        tracing::info!("applying migration v001_initial");
        v001_initial::up(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(())
}
