//! MCP session: lifecycle state machine and RPC dispatch.
//!
//! ```text
//! Disconnected -> Connecting -> Initializing -> Ready -> ShuttingDown -> Disconnected
//!              \______________ (failure) ______________/
//! ```
//!
//! The three-step handshake: send `initialize` with client capabilities,
//! parse the server's capabilities from the response, then confirm with
//! a `notifications/initialized` notification.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use drover_core::{Error, ErrorKind, Result};

use crate::protocol::{self, JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR_CODE};
use crate::router::{MessageRouter, NotificationHandler, PendingResponse};
use crate::transport::Transport;

pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Initializing,
    Ready,
    ShuttingDown,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::ShuttingDown => "shutting-down",
        }
    }
}

/// Capabilities this client advertises in `initialize`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientCapabilities {
    pub roots: bool,
    pub roots_list_changed: bool,
    pub sampling: bool,
}

/// Capabilities the server reported back.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerCapabilities {
    pub tools: bool,
    pub tools_list_changed: bool,
    pub resources: bool,
    pub resources_subscribe: bool,
    pub resources_list_changed: bool,
    pub prompts: bool,
    pub prompts_list_changed: bool,
    pub logging: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub client_name: String,
    pub client_version: String,
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_name: "drover".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub struct Session {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    router: Arc<MessageRouter>,
    state: Mutex<SessionState>,
    server_capabilities: Mutex<ServerCapabilities>,
    server_info: Mutex<ServerInfo>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let router = Arc::new(MessageRouter::new());

        // Wire the transport's inbound lines straight into the router.
        let router_for_receive = Arc::clone(&router);
        transport.set_receive_callback(Box::new(move |line: &str| {
            router_for_receive.route_message(line);
        }));

        let router_for_errors = Arc::clone(&router);
        transport.set_error_callback(Box::new(move |reason: &str| {
            router_for_errors.cancel_all(reason);
        }));

        Self {
            transport,
            config,
            router,
            state: Mutex::new(SessionState::Disconnected),
            server_capabilities: Mutex::new(ServerCapabilities::default()),
            server_info: Mutex::new(ServerInfo::default()),
        }
    }

    /// Connect the transport and run the initialization handshake.
    pub fn initialize(&self) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            if *state != SessionState::Disconnected {
                return Err(Error::new(
                    ErrorKind::McpSessionFailed,
                    format!("cannot initialize from state {}", state.as_str()),
                ));
            }
        }

        self.set_state(SessionState::Connecting);
        if let Err(e) = self.transport.connect() {
            self.set_state(SessionState::Disconnected);
            return Err(e);
        }

        self.set_state(SessionState::Initializing);
        let init_params = json!({
            "protocolVersion": self.config.protocol_version,
            "capabilities": self.build_client_capabilities(),
            "clientInfo": {
                "name": self.config.client_name,
                "version": self.config.client_version,
            }
        });

        let result = self
            .send_request("initialize", Some(init_params))
            .wait(self.config.request_timeout);
        let result = match result {
            Ok(result) => result,
            Err(e) => return self.fail_initialize(e),
        };

        match parse_initialize_result(&result) {
            Ok((info, capabilities)) => {
                info!(
                    server = %info.name,
                    version = %info.version,
                    tools = capabilities.tools,
                    "MCP session initialized"
                );
                *self.server_info.lock().unwrap() = info;
                *self.server_capabilities.lock().unwrap() = capabilities;
            }
            Err(e) => return self.fail_initialize(e),
        }

        if let Err(e) = self.send_notification("notifications/initialized", None) {
            return self.fail_initialize(e);
        }

        self.set_state(SessionState::Ready);
        Ok(())
    }

    /// Cancel all in-flight requests and disconnect. Idempotent.
    pub fn shutdown(&self) {
        {
            let state = self.state.lock().unwrap();
            if !matches!(*state, SessionState::Ready | SessionState::Initializing) {
                return;
            }
        }

        self.set_state(SessionState::ShuttingDown);
        self.router.cancel_all("session shutting down");
        self.transport.disconnect();
        self.set_state(SessionState::Disconnected);
    }

    /// Send a request; the returned handle resolves when the router
    /// matches the response id. A transport failure resolves the handle
    /// immediately through a synthetic internal-error response.
    pub fn send_request(&self, method: &str, params: Option<Value>) -> PendingResponse {
        let (id, pending) = self.router.create_pending_request();
        let request = JsonRpcRequest::new(method, params, Some(id.into()));
        let encoded = protocol::encode_request(&request);

        debug!(method, id, "sending request");
        if let Err(e) = self.transport.send(&encoded) {
            warn!(method, id, error = %e, "send failed; resolving with synthetic error");
            self.router.route_response(JsonRpcResponse::error(
                id,
                INTERNAL_ERROR_CODE,
                e.message(),
            ));
        }

        pending
    }

    pub fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.transport
            .send(&protocol::encode_notification(method, params))
    }

    /// Install a handler for server notifications `(method, params)`.
    pub fn set_notification_handler(&self, handler: NotificationHandler) {
        self.router.set_notification_handler(handler);
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn server_capabilities(&self) -> ServerCapabilities {
        *self.server_capabilities.lock().unwrap()
    }

    pub fn server_info(&self) -> ServerInfo {
        self.server_info.lock().unwrap().clone()
    }

    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    fn fail_initialize(&self, error: Error) -> Result<()> {
        warn!(error = %error, "MCP initialization failed");
        self.set_state(SessionState::Disconnected);
        self.transport.disconnect();
        Err(error)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap();
        debug!(from = state.as_str(), to = next.as_str(), "session state change");
        *state = next;
    }

    fn build_client_capabilities(&self) -> Value {
        let mut capabilities = serde_json::Map::new();
        if self.config.capabilities.roots {
            let mut roots = serde_json::Map::new();
            if self.config.capabilities.roots_list_changed {
                roots.insert("listChanged".to_string(), Value::Bool(true));
            }
            capabilities.insert("roots".to_string(), Value::Object(roots));
        }
        if self.config.capabilities.sampling {
            capabilities.insert("sampling".to_string(), json!({}));
        }
        Value::Object(capabilities)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn parse_initialize_result(result: &Value) -> Result<(ServerInfo, ServerCapabilities)> {
    if !result.is_object() {
        return Err(Error::new(
            ErrorKind::McpProtocolError,
            "initialize result is not an object",
        ));
    }

    let info = ServerInfo {
        name: result["serverInfo"]["name"].as_str().unwrap_or_default().to_string(),
        version: result["serverInfo"]["version"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
    };

    let mut capabilities = ServerCapabilities::default();
    if let Some(caps) = result.get("capabilities").and_then(Value::as_object) {
        if let Some(tools) = caps.get("tools") {
            capabilities.tools = true;
            capabilities.tools_list_changed =
                tools["listChanged"].as_bool().unwrap_or(false);
        }
        if let Some(resources) = caps.get("resources") {
            capabilities.resources = true;
            capabilities.resources_subscribe =
                resources["subscribe"].as_bool().unwrap_or(false);
            capabilities.resources_list_changed =
                resources["listChanged"].as_bool().unwrap_or(false);
        }
        if let Some(prompts) = caps.get("prompts") {
            capabilities.prompts = true;
            capabilities.prompts_list_changed =
                prompts["listChanged"].as_bool().unwrap_or(false);
        }
        capabilities.logging = caps.contains_key("logging");
    }

    Ok((info, capabilities))
}
