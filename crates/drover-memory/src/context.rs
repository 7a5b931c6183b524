//! Durable conversation memory over SQLite.
//!
//! Messages pruned out of active history are archived here and become
//! retrievable again through lexical search: FTS5 with bm25 ranking when
//! the extension is available, OR'd LIKE patterns otherwise.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, warn};

use drover_core::{Message, RagChunk, Result};

use crate::db::init_schema;
use crate::error::MemoryError;
use crate::types::{tokenize_terms, RagQuery, Retriever};

/// Source label used for chunks whose row has no recorded source.
const DEFAULT_SOURCE: &str = "context_db";

pub struct ContextDatabase {
    conn: Mutex<Connection>,
    fts_enabled: bool,
}

impl ContextDatabase {
    /// Open (creating if necessary) an archive database at `path`.
    pub fn open(path: impl AsRef<Path>) -> std::result::Result<Self, MemoryError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(MemoryError::InvalidInput(
                "context database path cannot be empty".into(),
            ));
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests and ephemeral sessions.
    pub fn open_in_memory() -> std::result::Result<Self, MemoryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> std::result::Result<Self, MemoryError> {
        let fts_enabled = init_schema(&conn)?;
        debug!(fts_enabled, "context database opened");
        Ok(Self {
            conn: Mutex::new(conn),
            fts_enabled,
        })
    }

    /// Archive one message. Empty content is silently skipped.
    pub fn add_message(
        &self,
        message: &Message,
        source: Option<&str>,
    ) -> std::result::Result<(), MemoryError> {
        if message.content.is_empty() {
            return Ok(());
        }

        let conn = self.conn.lock().unwrap();
        let created_at = chrono::Utc::now().timestamp();
        {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO memory_messages(role, content, source, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            stmt.execute(rusqlite::params![
                message.role.as_str(),
                message.content,
                source,
                created_at,
            ])?;
        }

        if self.fts_enabled {
            let row_id = conn.last_insert_rowid();
            let mut stmt = conn
                .prepare_cached("INSERT INTO memory_fts(message_id, content) VALUES (?1, ?2)")?;
            stmt.execute(rusqlite::params![row_id, message.content])?;
        }

        Ok(())
    }

    /// Archive a batch under a common source label.
    pub fn add_messages(
        &self,
        messages: &[Message],
        source: Option<&str>,
    ) -> std::result::Result<(), MemoryError> {
        for message in messages {
            self.add_message(message, source)?;
        }
        Ok(())
    }

    /// Number of archived rows.
    pub fn len(&self) -> std::result::Result<usize, MemoryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT COUNT(*) FROM memory_messages")?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> std::result::Result<bool, MemoryError> {
        Ok(self.len()? == 0)
    }

    fn retrieve_with_fts(
        &self,
        conn: &Connection,
        terms: &[String],
        top_k: usize,
    ) -> std::result::Result<Vec<RagChunk>, MemoryError> {
        let fts_query = terms.join(" OR ");
        let mut stmt = conn.prepare_cached(
            "SELECT m.id, m.content, m.source, -bm25(memory_fts) AS score
             FROM memory_fts
             JOIN memory_messages m ON m.id = memory_fts.message_id
             WHERE memory_fts MATCH ?1
             ORDER BY bm25(memory_fts), m.id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![fts_query, top_k as i64], |row| {
            Ok(RagChunk {
                id: format!("memory:{}", row.get::<_, i64>(0)?),
                content: row.get(1)?,
                score: row.get(3)?,
                source: Some(
                    row.get::<_, Option<String>>(2)?
                        .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
                ),
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn retrieve_with_like(
        &self,
        conn: &Connection,
        terms: &[String],
        top_k: usize,
    ) -> std::result::Result<Vec<RagChunk>, MemoryError> {
        // One LIKE clause per term, OR'd; newest rows first, score 0.
        // Terms are lowercased alphanumerics, and top_k is a number we
        // computed, so inlining the LIMIT is safe.
        let mut sql = String::from("SELECT id, content, source FROM memory_messages WHERE ");
        for i in 0..terms.len() {
            if i > 0 {
                sql.push_str(" OR ");
            }
            sql.push_str(&format!("content LIKE ?{}", i + 1));
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {top_k}"));

        let patterns: Vec<String> = terms.iter().map(|t| format!("%{t}%")).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(patterns.iter()), |row| {
            Ok(RagChunk {
                id: format!("memory:{}", row.get::<_, i64>(0)?),
                content: row.get(1)?,
                score: 0.0,
                source: Some(
                    row.get::<_, Option<String>>(2)?
                        .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
                ),
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

impl Retriever for ContextDatabase {
    fn retrieve(&self, query: &RagQuery) -> Result<Vec<RagChunk>> {
        let terms = tokenize_terms(&query.text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let top_k = query.top_k.max(1);

        let conn = self.conn.lock().unwrap();
        if self.fts_enabled {
            match self.retrieve_with_fts(&conn, &terms, top_k) {
                Ok(chunks) => return Ok(chunks),
                Err(e) => {
                    warn!(error = %e, "FTS retrieval failed; falling back to LIKE");
                }
            }
        }
        self.retrieve_with_like(&conn, &terms, top_k)
            .map_err(Into::into)
    }
}
