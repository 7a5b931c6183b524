// Session handshake and client behavior against the scripted transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use drover_core::ErrorKind;
use drover_engine::ToolRegistry;
use drover_mcp::{
    McpClient, McpClientConfig, Session, SessionConfig, SessionState, StdioConfig,
};

use common::{well_behaved_server, MockTransport};

fn ready_session(transport: Arc<MockTransport>) -> Session {
    let session = Session::new(transport, SessionConfig::default());
    session.initialize().unwrap();
    session
}

#[test]
fn handshake_walks_the_state_machine_to_ready() {
    let transport = Arc::new(MockTransport::with_responder(well_behaved_server));
    let session = Session::new(transport.clone(), SessionConfig::default());
    assert_eq!(session.state(), SessionState::Disconnected);

    session.initialize().unwrap();
    assert_eq!(session.state(), SessionState::Ready);

    let sent = transport.sent_messages();
    assert_eq!(sent.len(), 2);

    // First message: the initialize request with client info.
    assert_eq!(sent[0]["method"], "initialize");
    assert_eq!(sent[0]["params"]["protocolVersion"], "2024-11-05");
    assert_eq!(sent[0]["params"]["clientInfo"]["name"], "drover");
    assert!(sent[0]["id"].is_number());

    // Second: the initialized notification, id-less.
    assert_eq!(sent[1]["method"], "notifications/initialized");
    assert!(sent[1].get("id").is_none());

    let info = session.server_info();
    assert_eq!(info.name, "mock-server");
    assert_eq!(info.version, "1.0");

    let capabilities = session.server_capabilities();
    assert!(capabilities.tools);
    assert!(capabilities.tools_list_changed);
    assert!(capabilities.logging);
    assert!(!capabilities.resources);
}

#[test]
fn connect_failure_returns_to_disconnected() {
    let transport = Arc::new(MockTransport::new());
    transport.fail_connect.store(true, std::sync::atomic::Ordering::SeqCst);

    let session = Session::new(transport, SessionConfig::default());
    let err = session.initialize().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::McpTransportFailed);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn initialize_twice_is_a_session_error() {
    let transport = Arc::new(MockTransport::with_responder(well_behaved_server));
    let session = ready_session(transport);

    let err = session.initialize().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::McpSessionFailed);
}

#[test]
fn send_failure_resolves_with_synthetic_internal_error() {
    let transport = Arc::new(MockTransport::with_responder(well_behaved_server));
    let session = ready_session(transport.clone());

    transport.fail_send.store(true, std::sync::atomic::Ordering::SeqCst);
    let err = session
        .send_request("tools/list", None)
        .wait(Duration::from_millis(100))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::McpProtocolError);
    assert!(err.message().contains("-32603"));
}

#[test]
fn shutdown_cancels_pending_requests_and_is_idempotent() {
    // Responder stays silent for tools/list, leaving the request
    // pending until shutdown sweeps it.
    let transport = Arc::new(MockTransport::with_responder(|request| {
        match request["method"].as_str() {
            Some("initialize") => well_behaved_server(request),
            _ => None,
        }
    }));
    let session = ready_session(transport);

    let pending = session.send_request("tools/list", None);
    assert_eq!(session.router().pending_count(), 1);

    session.shutdown();
    session.shutdown();
    assert_eq!(session.state(), SessionState::Disconnected);

    let err = pending.wait(Duration::from_millis(100)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::McpDisconnected);
}

#[test]
fn transport_error_cancels_in_flight_requests() {
    let transport = Arc::new(MockTransport::with_responder(|request| {
        match request["method"].as_str() {
            Some("initialize") => well_behaved_server(request),
            _ => None,
        }
    }));
    let session = ready_session(transport.clone());

    let pending = session.send_request("tools/call", Some(json!({"name": "x"})));
    transport.inject_error("subprocess exited unexpectedly");

    let err = pending.wait(Duration::from_millis(100)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::McpDisconnected);
}

fn client_config() -> McpClientConfig {
    McpClientConfig::new("files", StdioConfig::default())
}

#[test]
fn client_discovers_and_registers_prefixed_tools() {
    let transport = Arc::new(MockTransport::with_responder(well_behaved_server));
    let client = McpClient::new(client_config()).unwrap();
    client.connect_with_transport(transport).unwrap();
    assert!(client.is_connected());

    let tools = client.discover_tools().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");
    assert_eq!(tools[0].input_schema["required"][0], "text");

    let registry = ToolRegistry::new();
    let registered = client.register_tools_with(&registry).unwrap();
    assert_eq!(registered, 1);
    assert!(registry.has("mcp_files:echo"));
    assert!(!registry.has("echo"));
}

#[test]
fn registered_handler_round_trips_a_tool_call() {
    let transport = Arc::new(MockTransport::with_responder(well_behaved_server));
    let client = McpClient::new(client_config()).unwrap();
    client.connect_with_transport(transport).unwrap();

    let registry = ToolRegistry::new();
    client.register_tools_with(&registry).unwrap();

    let spec = registry.get("mcp_files:echo").unwrap();
    let result = (spec.handler)(&json!({"text": "marco"})).unwrap();
    assert_eq!(result["content"][0]["text"], "marco");
    assert_eq!(result["isError"], false);
}

#[test]
fn server_reported_tool_error_becomes_mcp_server_error() {
    let transport = Arc::new(MockTransport::with_responder(|request| {
        match request["method"].as_str() {
            Some("initialize") => well_behaved_server(request),
            Some("tools/call") => Some(json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "result": {
                    "content": [
                        {"type": "text", "text": "disk "},
                        {"type": "text", "text": "on fire"}
                    ],
                    "isError": true
                }
            })),
            _ => None,
        }
    }));

    let client = McpClient::new(client_config()).unwrap();
    client.connect_with_transport(transport).unwrap();

    let err = client.call_tool("burn", &json!({})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::McpServerError);
    assert!(err.message().contains("disk on fire"));
}

#[test]
fn silent_server_times_out_the_tool_call() {
    let transport = Arc::new(MockTransport::with_responder(|request| {
        match request["method"].as_str() {
            Some("initialize") => well_behaved_server(request),
            _ => None,
        }
    }));

    let mut config = client_config();
    config.tool_timeout = Duration::from_millis(30);
    let client = McpClient::new(config).unwrap();
    client.connect_with_transport(transport).unwrap();

    let err = client.call_tool("echo", &json!({"text": "x"})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::McpTimeout);
    assert!(err.message().contains("echo"));
}

#[test]
fn dropped_client_surfaces_as_disconnected_through_the_handler() {
    let transport = Arc::new(MockTransport::with_responder(well_behaved_server));
    let client = McpClient::new(client_config()).unwrap();
    client.connect_with_transport(transport).unwrap();

    let registry = ToolRegistry::new();
    client.register_tools_with(&registry).unwrap();
    drop(client);

    let spec = registry.get("mcp_files:echo").unwrap();
    let err = (spec.handler)(&json!({"text": "anyone?"})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::McpDisconnected);
}

#[test]
fn server_without_tools_capability_yields_no_tools() {
    let transport = Arc::new(MockTransport::with_responder(|request| {
        match request["method"].as_str() {
            Some("initialize") => Some(json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "result": {
                    "protocolVersion": "2024-11-05",
                    "serverInfo": {"name": "toolless", "version": "0.1"},
                    "capabilities": {}
                }
            })),
            _ => None,
        }
    }));

    let client = McpClient::new(client_config()).unwrap();
    client.connect_with_transport(transport).unwrap();
    assert!(client.discover_tools().unwrap().is_empty());
}

#[test]
fn client_rejects_empty_server_id() {
    let err = McpClient::new(McpClientConfig::new("", StdioConfig::default())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfig);
}

#[test]
fn calls_before_connect_fail_with_disconnected() {
    let client = McpClient::new(client_config()).unwrap();
    assert!(!client.is_connected());
    let err = client.call_tool("echo", &json!({})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::McpDisconnected);
    assert!(client.discover_tools().is_err());
}
