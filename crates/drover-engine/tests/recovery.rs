// Tool-argument validation and retry budgets.

use std::sync::Arc;

use serde_json::json;

use drover_core::ToolCall;
use drover_engine::{ErrorRecovery, ToolRegistry};

fn registry_with_add() -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register_tool(
        "add",
        "Add two integers",
        json!({
            "type": "object",
            "properties": {
                "a": {"type": "integer"},
                "b": {"type": "integer"}
            },
            "required": ["a", "b"]
        }),
        Arc::new(|args| {
            let a = args["a"].as_i64().unwrap_or(0);
            let b = args["b"].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        }),
    );
    registry
}

fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        name: name.to_string(),
        id: None,
        arguments,
    }
}

#[test]
fn valid_arguments_pass() {
    let registry = registry_with_add();
    let recovery = ErrorRecovery::default();
    assert_eq!(
        recovery.validate_args(&call("add", json!({"a": 3, "b": 4})), &registry),
        None
    );
}

#[test]
fn unknown_tool_is_reported() {
    let registry = registry_with_add();
    let recovery = ErrorRecovery::default();
    let err = recovery
        .validate_args(&call("subtract", json!({})), &registry)
        .unwrap();
    assert!(err.contains("Tool not found"));
    assert!(err.contains("subtract"));
}

#[test]
fn missing_required_argument_is_reported() {
    let registry = registry_with_add();
    let recovery = ErrorRecovery::default();
    let err = recovery
        .validate_args(&call("add", json!({"a": 3})), &registry)
        .unwrap();
    assert!(err.contains("Missing required argument: b"));
}

#[test]
fn type_mismatch_is_reported_with_both_types() {
    let registry = registry_with_add();
    let recovery = ErrorRecovery::default();
    let err = recovery
        .validate_args(&call("add", json!({"a": "three", "b": 4})), &registry)
        .unwrap();
    assert!(err.contains("'a'"));
    assert!(err.contains("expected integer"));
    assert!(err.contains("got string"));
}

#[test]
fn extra_arguments_outside_schema_are_tolerated() {
    let registry = registry_with_add();
    let recovery = ErrorRecovery::default();
    assert_eq!(
        recovery.validate_args(&call("add", json!({"a": 1, "b": 2, "c": true})), &registry),
        None
    );
}

#[test]
fn retry_budget_is_per_tool_and_resettable() {
    let mut recovery = ErrorRecovery::new(2);

    assert!(recovery.can_retry("add"));
    recovery.record_retry("add");
    assert_eq!(recovery.retry_count("add"), 1);
    assert!(recovery.can_retry("add"));
    recovery.record_retry("add");
    assert!(!recovery.can_retry("add"));

    // Other tools are unaffected.
    assert!(recovery.can_retry("other"));

    recovery.reset();
    assert!(recovery.can_retry("add"));
    assert_eq!(recovery.retry_count("add"), 0);
}

#[test]
fn retry_message_has_the_exact_corrective_shape() {
    let msg = ErrorRecovery::retry_message("add", "Missing required argument: b");
    assert_eq!(msg.role, drover_core::Role::System);
    assert_eq!(
        msg.content,
        "Tool call error for 'add': Missing required argument: b\nPlease correct the arguments and try again."
    );
}
