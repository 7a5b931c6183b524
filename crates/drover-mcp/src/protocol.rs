//! JSON-RPC 2.0 codec.
//!
//! Wire: one JSON object per line. A message with `method` is a request
//! (or a notification when `id` is absent); a message with `result` or
//! `error` is a response. Ids may be integers or strings on the wire;
//! this client only emits integers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Internal error code used for synthetic responses when a send fails.
pub const INTERNAL_ERROR_CODE: i64 = -32603;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Text(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<RequestId>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Option<RequestId>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// A request without an id is a notification.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<JsonRpcError>,
    pub id: RequestId,
}

impl JsonRpcResponse {
    pub fn result(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id: id.into(),
        }
    }

    pub fn error(id: impl Into<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id: id.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Request or notification (check [`JsonRpcRequest::is_notification`]).
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    /// Unparseable or structurally invalid; carries the reason.
    Malformed(String),
}

pub fn encode_request(request: &JsonRpcRequest) -> String {
    // Serialization of these shapes cannot fail.
    serde_json::to_string(request).unwrap_or_default()
}

pub fn encode_response(response: &JsonRpcResponse) -> String {
    serde_json::to_string(response).unwrap_or_default()
}

pub fn encode_notification(method: &str, params: Option<Value>) -> String {
    encode_request(&JsonRpcRequest::new(method, params, None))
}

pub fn decode(input: &str) -> Decoded {
    let value: Value = match serde_json::from_str(input) {
        Ok(value) => value,
        Err(e) => return Decoded::Malformed(format!("JSON parse error: {e}")),
    };

    if !value.is_object() {
        return Decoded::Malformed("JSON-RPC message must be an object".to_string());
    }
    if value.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Decoded::Malformed("missing or invalid jsonrpc version".to_string());
    }

    let is_request = value.get("method").is_some();
    let is_response = value.get("result").is_some() || value.get("error").is_some();

    if is_request {
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => Decoded::Request(request),
            Err(e) => Decoded::Malformed(format!("invalid request: {e}")),
        }
    } else if is_response {
        match serde_json::from_value::<JsonRpcResponse>(value) {
            Ok(response) => Decoded::Response(response),
            Err(e) => Decoded::Malformed(format!("invalid response: {e}")),
        }
    } else {
        Decoded::Malformed("missing method, result, or error".to_string())
    }
}
