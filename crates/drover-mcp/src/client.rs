//! High-level MCP client: one per server connection.
//!
//! Lifecycle: spawn the stdio transport, run the session handshake,
//! discover tools with `tools/list`, then register each tool into the
//! engine's [`ToolRegistry`] as a handler that forwards `tools/call`
//! over the wire. Handlers hold a weak reference to the client, so a
//! dropped client surfaces as `McpDisconnected` instead of keeping the
//! whole connection alive through the registry.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info};

use drover_core::{Error, ErrorKind, Result};
use drover_engine::ToolRegistry;

use crate::session::{Session, SessionConfig, SessionState};
use crate::transport::{StdioConfig, StdioTransport, Transport};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A tool advertised by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct McpToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub input_schema: Value,
}

#[derive(Debug, Clone)]
pub struct McpClientConfig {
    /// Unique identifier for this server, used in tool-name prefixes.
    pub server_id: String,
    pub transport: StdioConfig,
    pub session: SessionConfig,
    /// Register tools as `mcp_<server_id>:<tool>` (default true).
    pub prefix_tools: bool,
    /// Per-call timeout for `tools/call`.
    pub tool_timeout: Duration,
}

impl McpClientConfig {
    pub fn new(server_id: impl Into<String>, transport: StdioConfig) -> Self {
        Self {
            server_id: server_id.into(),
            transport,
            session: SessionConfig::default(),
            prefix_tools: true,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

pub struct McpClient {
    config: McpClientConfig,
    /// Self-reference handed to tool handlers, so the registry never
    /// keeps the client alive.
    weak_self: Weak<McpClient>,
    session: Mutex<Option<Arc<Session>>>,
    discovered_tools: Mutex<Option<Vec<McpToolDefinition>>>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("config", &self.config)
            .finish()
    }
}

impl McpClient {
    /// Create a client. Does not connect.
    pub fn new(config: McpClientConfig) -> Result<Arc<Self>> {
        if config.server_id.is_empty() {
            return Err(Error::new(ErrorKind::InvalidConfig, "MCP server_id cannot be empty"));
        }
        Ok(Arc::new_cyclic(|weak_self| Self {
            config,
            weak_self: weak_self.clone(),
            session: Mutex::new(None),
            discovered_tools: Mutex::new(None),
        }))
    }

    /// Spawn the configured stdio server and run the handshake.
    pub fn connect(&self) -> Result<()> {
        let transport = Arc::new(StdioTransport::new(self.config.transport.clone()));
        self.connect_with_transport(transport)
    }

    /// Connect over a caller-supplied transport (tests, alternative
    /// wire implementations).
    pub fn connect_with_transport(&self, transport: Arc<dyn Transport>) -> Result<()> {
        if self.is_connected() {
            return Err(Error::new(ErrorKind::McpSessionFailed, "already connected"));
        }

        let session = Arc::new(Session::new(transport, self.config.session.clone()));
        session.initialize()?;
        *self.session.lock().unwrap() = Some(session);
        info!(server_id = %self.config.server_id, "MCP client connected");
        Ok(())
    }

    /// Shut the session down. Idempotent.
    pub fn disconnect(&self) {
        if let Some(session) = self.session.lock().unwrap().take() {
            session.shutdown();
            info!(server_id = %self.config.server_id, "MCP client disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.state() == SessionState::Ready)
            .unwrap_or(false)
    }

    /// Fetch the server's tools via `tools/list`. Servers without the
    /// tools capability yield an empty list.
    pub fn discover_tools(&self) -> Result<Vec<McpToolDefinition>> {
        let session = self.session()?;

        if !session.server_capabilities().tools {
            let tools = Vec::new();
            *self.discovered_tools.lock().unwrap() = Some(tools.clone());
            return Ok(tools);
        }

        let result = session
            .send_request("tools/list", None)
            .wait(session.request_timeout())?;

        let mut tools = Vec::new();
        if let Some(entries) = result.get("tools").and_then(Value::as_array) {
            for entry in entries {
                let Some(entry) = entry.as_object() else {
                    return Err(Error::new(
                        ErrorKind::McpProtocolError,
                        "malformed tools/list response: tool entry is not an object",
                    ));
                };
                tools.push(McpToolDefinition {
                    name: entry
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    description: entry
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    input_schema: entry.get("inputSchema").cloned().unwrap_or_else(|| {
                        json!({"type": "object", "properties": {}, "required": []})
                    }),
                });
            }
        }

        debug!(server_id = %self.config.server_id, tools = tools.len(), "discovered tools");
        *self.discovered_tools.lock().unwrap() = Some(tools.clone());
        Ok(tools)
    }

    /// Register every discovered tool into `registry` as a forwarding
    /// handler. Discovers first when needed. Returns the number of
    /// tools registered.
    pub fn register_tools_with(&self, registry: &ToolRegistry) -> Result<usize> {
        let cached = self.discovered_tools.lock().unwrap().clone();
        let tools = match cached {
            Some(tools) => tools,
            None => self.discover_tools()?,
        };

        for tool in &tools {
            let registered_name = self.registered_tool_name(&tool.name);
            let weak = self.weak_self.clone();
            let tool_name = tool.name.clone();
            registry.register_tool(
                registered_name,
                tool.description.clone(),
                tool.input_schema.clone(),
                Arc::new(move |args: &Value| {
                    let Some(client) = weak.upgrade() else {
                        return Err(Error::new(
                            ErrorKind::McpDisconnected,
                            "MCP client has been dropped",
                        ));
                    };
                    client.call_tool(&tool_name, args)
                }),
            );
        }

        Ok(tools.len())
    }

    /// Invoke a tool on the server (name without prefix).
    ///
    /// On timeout the router entry is left pending; a late response is
    /// absorbed harmlessly and shutdown clears the rest.
    pub fn call_tool(&self, name: &str, args: &Value) -> Result<Value> {
        let session = self.session()?;

        let params = json!({ "name": name, "arguments": args });
        let result = session
            .send_request("tools/call", Some(params))
            .wait(self.config.tool_timeout)
            .map_err(|e| match e.kind() {
                ErrorKind::McpTimeout => {
                    Error::new(ErrorKind::McpTimeout, format!("tool call timed out: {name}"))
                }
                _ => e,
            })?;

        // tools/call result: { "content": [{type, text}...], "isError": bool }
        if result["isError"].as_bool().unwrap_or(false) {
            let mut error_text = String::new();
            if let Some(content) = result.get("content").and_then(Value::as_array) {
                for item in content {
                    if let Some(text) = item.get("text").and_then(Value::as_str) {
                        error_text.push_str(text);
                    }
                }
            }
            return Err(Error::new(
                ErrorKind::McpServerError,
                format!("tool returned error: {error_text}"),
            ));
        }

        Ok(result)
    }

    pub fn server_id(&self) -> &str {
        &self.config.server_id
    }

    pub fn config(&self) -> &McpClientConfig {
        &self.config
    }

    pub fn discovered_tools(&self) -> Vec<McpToolDefinition> {
        self.discovered_tools.lock().unwrap().clone().unwrap_or_default()
    }

    fn registered_tool_name(&self, tool_name: &str) -> String {
        if self.config.prefix_tools {
            format!("mcp_{}:{}", self.config.server_id, tool_name)
        } else {
            tool_name.to_string()
        }
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .filter(|s| s.state() == SessionState::Ready)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::McpDisconnected, "not connected"))
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
