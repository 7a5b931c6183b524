//! Context database schema.

use rusqlite::Connection;
use tracing::warn;

/// Initialise the archive tables. Safe to call on every open
/// (idempotent). Returns whether FTS5 is available; when it is not, the
/// caller falls back to LIKE-based retrieval.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<bool> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            source      TEXT,
            created_at  INTEGER NOT NULL
        );",
    )?;

    let fts_enabled = match conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
            message_id UNINDEXED,
            content
        );",
    ) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "FTS5 unavailable; falling back to LIKE retrieval");
            false
        }
    };

    if fts_enabled {
        // Rebuild the index from the base table so a database written
        // while FTS was unavailable becomes searchable.
        conn.execute_batch(
            "DELETE FROM memory_fts;
             INSERT INTO memory_fts(message_id, content)
                 SELECT id, content FROM memory_messages;",
        )?;
    }

    Ok(fts_enabled)
}
