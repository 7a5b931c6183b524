// Correlation behavior: exactly one of (response, cancellation)
// resolves every pending request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use drover_core::ErrorKind;
use drover_mcp::{JsonRpcResponse, MessageRouter};

const TIMEOUT: Duration = Duration::from_millis(200);

#[test]
fn response_resolves_the_matching_pending_request() {
    let router = MessageRouter::new();
    let (id, pending) = router.create_pending_request();
    assert_eq!(router.pending_count(), 1);

    router.route_message(&format!(
        r#"{{"jsonrpc":"2.0","result":{{"value":42}},"id":{id}}}"#
    ));

    let result = pending.wait(TIMEOUT).unwrap();
    assert_eq!(result, json!({"value": 42}));
    assert_eq!(router.pending_count(), 0);
}

#[test]
fn ids_are_strictly_increasing() {
    let router = MessageRouter::new();
    let (a, _pa) = router.create_pending_request();
    let (b, _pb) = router.create_pending_request();
    let (c, _pc) = router.create_pending_request();
    assert!(a < b && b < c);
}

#[test]
fn error_response_surfaces_code_and_message() {
    let router = MessageRouter::new();
    let (id, pending) = router.create_pending_request();

    router.route_response(JsonRpcResponse::error(id, -32000, "server exploded"));

    let err = pending.wait(TIMEOUT).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::McpProtocolError);
    assert!(err.message().contains("-32000"));
    assert!(err.message().contains("server exploded"));
}

#[test]
fn response_without_result_resolves_to_null() {
    let router = MessageRouter::new();
    let (id, pending) = router.create_pending_request();

    router.route_message(&format!(r#"{{"jsonrpc":"2.0","result":null,"id":{id}}}"#));
    assert_eq!(pending.wait(TIMEOUT).unwrap(), serde_json::Value::Null);
}

#[test]
fn unknown_ids_and_malformed_lines_are_dropped() {
    let router = MessageRouter::new();
    let (_id, pending) = router.create_pending_request();

    router.route_message(r#"{"jsonrpc":"2.0","result":{},"id":9999}"#);
    router.route_message("garbage");
    router.route_message(r#"{"jsonrpc":"2.0","result":{},"id":"string-id"}"#);

    // Still pending: nothing above matched.
    assert_eq!(router.pending_count(), 1);
    let err = pending.wait(Duration::from_millis(50)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::McpTimeout);
}

#[test]
fn cancel_all_resolves_everything_with_disconnected() {
    let router = MessageRouter::new();
    let pendings: Vec<_> = (0..3)
        .map(|_| router.create_pending_request().1)
        .collect();
    assert_eq!(router.pending_count(), 3);

    router.cancel_all("going away");
    assert_eq!(router.pending_count(), 0);

    for pending in pendings {
        let err = pending.wait(TIMEOUT).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::McpDisconnected);
        assert!(err.message().contains("going away"));
    }
}

#[test]
fn notifications_reach_the_installed_handler() {
    let router = MessageRouter::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    router.set_notification_handler(Box::new(move |method, params| {
        assert_eq!(method, "notifications/progress");
        assert_eq!(params["step"], 2);
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    router.route_message(
        r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"step":2}}"#,
    );
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn timeout_leaves_the_entry_for_a_late_response() {
    let router = MessageRouter::new();
    let (id, pending) = router.create_pending_request();

    let err = pending.wait(Duration::from_millis(20)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::McpTimeout);
    // Documented leak: the slot stays until a late response or cancel.
    assert_eq!(router.pending_count(), 1);

    router.route_response(JsonRpcResponse::result(id, json!({})));
    assert_eq!(router.pending_count(), 0);
}

#[test]
fn routing_from_another_thread_resolves_a_waiting_caller() {
    let router = Arc::new(MessageRouter::new());
    let (id, pending) = router.create_pending_request();

    let responder = {
        let router = Arc::clone(&router);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            router.route_response(JsonRpcResponse::result(id, json!("late but fine")));
        })
    };

    let result = pending.wait(Duration::from_secs(5)).unwrap();
    assert_eq!(result, json!("late but fine"));
    responder.join().unwrap();
}
