// In-process transport scripted by a responder closure: every sent
// request is parsed and may produce an immediate inbound response, so
// session tests run the full codec/router path without a subprocess.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::Value;

use drover_core::{Error, ErrorKind, Result};
use drover_mcp::{ErrorCallback, ReceiveCallback, Transport};

type Responder = Box<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_send: AtomicBool,
    pub sent: Mutex<Vec<String>>,
    receive_callback: Mutex<Option<ReceiveCallback>>,
    error_callback: Mutex<Option<ErrorCallback>>,
    responder: Mutex<Option<Responder>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the request → response script. The responder sees each
    /// decoded outbound message and returns an inbound message to
    /// deliver, or `None` to stay silent.
    pub fn with_responder(
        responder: impl Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        let transport = Self::default();
        *transport.responder.lock().unwrap() = Some(Box::new(responder));
        transport
    }

    /// Deliver a raw line as if the server had sent it.
    pub fn inject(&self, line: &str) {
        if let Some(callback) = self.receive_callback.lock().unwrap().as_ref() {
            callback(line);
        }
    }

    /// Simulate a transport-level failure notice.
    pub fn inject_error(&self, reason: &str) {
        if let Some(callback) = self.error_callback.lock().unwrap().as_ref() {
            callback(reason);
        }
    }

    pub fn sent_messages(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }
}

impl Transport for MockTransport {
    fn connect(&self) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::McpTransportFailed, "scripted connect failure"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, message: &str) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::McpTransportFailed, "not connected"));
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::McpTransportFailed, "scripted send failure"));
        }
        self.sent.lock().unwrap().push(message.to_string());

        let outbound: Value = serde_json::from_str(message).unwrap_or(Value::Null);
        let reply = self
            .responder
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|responder| responder(&outbound));
        if let Some(reply) = reply {
            self.inject(&reply.to_string());
        }
        Ok(())
    }

    fn set_receive_callback(&self, callback: ReceiveCallback) {
        *self.receive_callback.lock().unwrap() = Some(callback);
    }

    fn set_error_callback(&self, callback: ErrorCallback) {
        *self.error_callback.lock().unwrap() = Some(callback);
    }
}

/// Responder for a well-behaved server: answers `initialize`,
/// `tools/list` (one "echo" tool), and `tools/call` (echoes arguments
/// back as text content).
pub fn well_behaved_server(request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    match request["method"].as_str()? {
        "initialize" => Some(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": "2024-11-05",
                "serverInfo": {"name": "mock-server", "version": "1.0"},
                "capabilities": {"tools": {"listChanged": true}, "logging": {}}
            }
        })),
        "tools/list" => Some(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "tools": [{
                    "name": "echo",
                    "description": "Echo the input back",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"text": {"type": "string"}},
                        "required": ["text"]
                    }
                }]
            }
        })),
        "tools/call" => {
            let text = request["params"]["arguments"]["text"]
                .as_str()
                .unwrap_or_default();
            Some(serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "content": [{"type": "text", "text": text}],
                    "isError": false
                }
            }))
        }
        _ => None,
    }
}
