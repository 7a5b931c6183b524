//! Shared types for the Drover agent engine: conversation messages,
//! configuration, the error taxonomy, and request/response values.
//!
//! Every other crate in the workspace builds on these; this crate has no
//! engine logic of its own.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, KvCacheType, PromptTemplate, RagSettings, SamplingParams};
pub use error::{Error, ErrorKind, Result};
pub use types::{
    Message, RagChunk, Request, RequestOptions, Response, Role, StreamSink, TokenUsage, ToolCall,
    TurnMetrics,
};
