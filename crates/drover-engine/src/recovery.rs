//! Tool-argument validation and bounded retry tracking.
//!
//! When the model produces an invalid tool call, the pipeline injects a
//! corrective note and regenerates, at most `max_retries` times per tool
//! per turn.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use drover_core::{Message, ToolCall};

use crate::tools::ToolRegistry;

pub const DEFAULT_MAX_RETRIES: u32 = 2;

pub struct ErrorRecovery {
    max_retries: u32,
    retry_counts: HashMap<String, u32>,
}

impl Default for ErrorRecovery {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl ErrorRecovery {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_counts: HashMap::new(),
        }
    }

    /// Validate a tool call against the registered schema. Returns
    /// `None` when valid, otherwise a human-readable error for the
    /// model to act on.
    pub fn validate_args(&self, call: &ToolCall, registry: &ToolRegistry) -> Option<String> {
        let Some(schema) = registry.schema(&call.name) else {
            return Some(format!("Tool not found: {}", call.name));
        };

        let Some(arguments) = call.arguments.as_object() else {
            return Some("Tool arguments must be a JSON object".to_string());
        };

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for field in required.iter().filter_map(Value::as_str) {
                if !arguments.contains_key(field) {
                    return Some(format!("Missing required argument: {field}"));
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, prop) in properties {
                let Some(value) = arguments.get(key) else {
                    continue;
                };
                let Some(expected) = prop.get("type").and_then(Value::as_str) else {
                    continue;
                };
                if !type_matches(value, expected) {
                    return Some(format!(
                        "Argument '{key}' has wrong type: expected {expected}, got {}",
                        json_type_name(value)
                    ));
                }
            }
        }

        None
    }

    /// Corrective note injected into the turn's scratch context.
    pub fn retry_message(tool_name: &str, error: &str) -> Message {
        Message::system(format!(
            "Tool call error for '{tool_name}': {error}\nPlease correct the arguments and try again."
        ))
    }

    pub fn can_retry(&self, tool_name: &str) -> bool {
        self.retry_counts.get(tool_name).copied().unwrap_or(0) < self.max_retries
    }

    pub fn record_retry(&mut self, tool_name: &str) {
        let count = self.retry_counts.entry(tool_name.to_string()).or_insert(0);
        *count += 1;
        warn!(tool = tool_name, attempt = *count, "tool call retry recorded");
    }

    pub fn retry_count(&self, tool_name: &str) -> u32 {
        self.retry_counts.get(tool_name).copied().unwrap_or(0)
    }

    /// Clear retry tracking; called between turns.
    pub fn reset(&mut self) {
        self.retry_counts.clear();
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "number" => value.is_number(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => false,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
