//! v001 -- Initial schema creation.
//!
//! Creates the `collections` table: one row per collection, holding the whole
//! collection as a JSON document.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name       TEXT PRIMARY KEY NOT NULL,   -- users, profiles, chats, ...
    data       TEXT NOT NULL,               -- JSON document
    updated_at TEXT NOT NULL                -- RFC-3339
);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
