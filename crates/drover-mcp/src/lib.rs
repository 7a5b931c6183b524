//! MCP (Model Context Protocol) client: JSON-RPC 2.0 over
//! newline-delimited JSON on a child process's stdio.
//!
//! Layers, bottom up: the [`protocol`] codec, the [`router`] that
//! correlates responses to pending requests by id, the [`session`]
//! state machine with the initialization handshake, the stdio
//! [`transport`], and the [`client`] that bridges a server's tools into
//! the engine's tool registry.

pub mod client;
pub mod protocol;
pub mod router;
pub mod session;
pub mod transport;

pub use client::{McpClient, McpClientConfig, McpToolDefinition, DEFAULT_TOOL_TIMEOUT};
pub use protocol::{
    decode, encode_notification, encode_request, encode_response, Decoded, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, RequestId,
};
pub use router::{MessageRouter, NotificationHandler, PendingResponse};
pub use session::{
    ClientCapabilities, ServerCapabilities, ServerInfo, Session, SessionConfig, SessionState,
};
pub use transport::{ErrorCallback, ReceiveCallback, StdioConfig, StdioTransport, Transport};
