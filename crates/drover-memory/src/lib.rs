//! Conversation memory layer: an in-memory lexical RAG store and a
//! durable SQLite archive with FTS5 retrieval.
//!
//! Both implement [`Retriever`]; the agent queries every configured
//! retriever at turn time and injects the results as an ephemeral
//! system message.

pub mod context;
pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use context::ContextDatabase;
pub use error::MemoryError;
pub use store::{ChunkRecord, RagStore};
pub use types::{RagQuery, Retriever};
