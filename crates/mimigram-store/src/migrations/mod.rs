//! Schema versions for the `collections` table.
//!
//! `PRAGMA user_version` records the last applied entry of [`MIGRATIONS`].
//! Opening a database applies every later entry in order and bumps the
//! version after each one.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Up = fn(&Connection) -> rusqlite::Result<()>;

/// Position `i` brings the schema to version `i + 1`.
const MIGRATIONS: &[(&str, Up)] = &[("v001_initial", v001_initial::up)];

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let target = MIGRATIONS.len() as u32;

    if current >= target {
        tracing::debug!(version = current, "collections schema up to date");
        return Ok(());
    }

    for (version, (name, up)) in (1u32..).zip(MIGRATIONS) {
        if version <= current {
            continue;
        }
        tracing::info!(migration = name, version, "migrating collections schema");
        up(conn).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}
