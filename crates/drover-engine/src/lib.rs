//! The Drover agent engine: history management, the request queue, tool
//! registry and parsing, error recovery, the agentic turn pipeline, and
//! the public [`Agent`] facade.
//!
//! A calling application builds an [`Agent`] with a backend (and
//! optionally a retriever and a context database), submits messages,
//! and receives streamed pieces plus a final structured [`Response`]
//! through a [`ResponseHandle`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use drover_backend::MockBackend;
//! use drover_core::{Config, Message};
//! use drover_engine::Agent;
//!
//! let config = Config {
//!     model_path: "model.gguf".into(),
//!     ..Config::default()
//! };
//! let agent = Agent::builder(config)
//!     .backend(Box::new(MockBackend::new()))
//!     .build()
//!     .unwrap();
//!
//! let handle = agent.submit(Message::user("Hello!"), None);
//! let response = handle.wait().unwrap();
//! println!("{}", response.text);
//! ```

pub mod agent;
pub mod history;
pub mod pipeline;
pub mod queue;
pub mod recovery;
pub mod tools;

pub use agent::{Agent, AgentBuilder, ResponseHandle};
pub use history::{History, TokenEstimator};
pub use pipeline::TurnPipeline;
pub use queue::RequestQueue;
pub use recovery::ErrorRecovery;
pub use tools::{parse_tool_call, ToolHandler, ToolRegistry, ToolSpec};

pub use drover_core::{Config, Message, Response, Role};
