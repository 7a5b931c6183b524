//! Tool registration and tool-call extraction.
//!
//! Tools are named capabilities with a JSON schema and a handler.
//! Local tools are registered directly; MCP servers register remote
//! tools through the same surface. The registry is read-mostly: the
//! worker looks tools up on every turn, registration happens at startup
//! or when a server connects.

pub mod parser;

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use drover_core::Result;

pub use parser::parse_tool_call;

/// Handler invoked with the validated arguments object.
pub type ToolHandler = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// A registered tool.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema object with `properties` and `required`.
    pub schema: Value,
    pub handler: ToolHandler,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .finish()
    }
}

/// Concurrent name → tool map. Registration is append-or-replace and
/// safe against concurrent lookups from the worker thread.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, spec: ToolSpec) {
        debug!(tool = %spec.name, "registering tool");
        self.tools.insert(spec.name.clone(), spec);
    }

    pub fn register_tool(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: ToolHandler,
    ) {
        self.register(ToolSpec {
            name: name.into(),
            description: description.into(),
            schema,
            handler,
        });
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<ToolSpec> {
        self.tools.get(name).map(|entry| entry.value().clone())
    }

    pub fn schema(&self, name: &str) -> Option<Value> {
        self.tools.get(name).map(|entry| entry.value().schema.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|entry| entry.key().clone()).collect()
    }

    /// (name, description, schema) triples for prompt construction.
    pub fn definitions(&self) -> Vec<(String, String, Value)> {
        self.tools
            .iter()
            .map(|entry| {
                let spec = entry.value();
                (spec.name.clone(), spec.description.clone(), spec.schema.clone())
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
