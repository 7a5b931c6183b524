//! Request/response correlation.
//!
//! Outgoing requests get a fresh integer id and a pending-response slot;
//! the transport reader thread routes inbound messages back by id.
//! Fulfilment happens outside the pending-map lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use drover_core::{Error, ErrorKind, Result};

use crate::protocol::{self, Decoded, JsonRpcResponse, RequestId};

pub type NotificationHandler = Box<dyn Fn(&str, &Value) + Send + Sync>;

/// Waitable result of one outgoing request.
pub struct PendingResponse {
    rx: Receiver<Result<Value>>,
}

impl PendingResponse {
    /// Block for the response, bounded by `timeout`.
    ///
    /// On expiry the router entry is intentionally left in place: a late
    /// response routes into it harmlessly, and `cancel_all` clears
    /// whatever remains at shutdown.
    pub fn wait(&self, timeout: Duration) -> Result<Value> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::new(
                ErrorKind::McpTimeout,
                format!("request timed out after {} ms", timeout.as_millis()),
            )),
            Err(RecvTimeoutError::Disconnected) => Err(Error::new(
                ErrorKind::McpDisconnected,
                "router dropped the pending request",
            )),
        }
    }
}

#[derive(Default)]
pub struct MessageRouter {
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, Sender<Result<Value>>>>,
    notification_handler: Mutex<Option<NotificationHandler>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            notification_handler: Mutex::new(None),
        }
    }

    /// Allocate an id and a pending slot for an outgoing request.
    pub fn create_pending_request(&self) -> (i64, PendingResponse) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.pending.lock().unwrap().insert(id, tx);
        (id, PendingResponse { rx })
    }

    /// Route one raw line from the transport. Malformed messages are
    /// dropped (best effort), responses resolve their pending slot,
    /// notifications go to the installed handler.
    pub fn route_message(&self, raw: &str) {
        match protocol::decode(raw) {
            Decoded::Malformed(reason) => {
                debug!(reason = %reason, "dropping malformed message");
            }
            Decoded::Response(response) => self.route_response(response),
            Decoded::Request(request) => {
                if request.is_notification() {
                    let handler = self.notification_handler.lock().unwrap();
                    if let Some(handler) = handler.as_ref() {
                        handler(
                            &request.method,
                            request.params.as_ref().unwrap_or(&Value::Null),
                        );
                    }
                } else {
                    // Server-to-client requests are not part of the
                    // consumed capability set.
                    warn!(method = %request.method, "ignoring unexpected server request");
                }
            }
        }
    }

    /// Resolve the pending slot matching a decoded response.
    pub fn route_response(&self, response: JsonRpcResponse) {
        let RequestId::Number(id) = response.id else {
            return; // string ids are never issued by this client
        };

        let sender = self.pending.lock().unwrap().remove(&id);
        let Some(sender) = sender else {
            debug!(id, "no pending request for response id");
            return;
        };

        let outcome = match response.error {
            Some(error) => Err(Error::new(
                ErrorKind::McpProtocolError,
                format!("JSON-RPC error {}: {}", error.code, error.message),
            )),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = sender.send(outcome);
    }

    pub fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.notification_handler.lock().unwrap() = Some(handler);
    }

    /// Resolve every outstanding request with `McpDisconnected`.
    pub fn cancel_all(&self, reason: &str) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().collect()
        };
        for (id, sender) in drained {
            debug!(id, "cancelling pending request");
            let _ = sender.send(Err(Error::new(ErrorKind::McpDisconnected, reason)));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
