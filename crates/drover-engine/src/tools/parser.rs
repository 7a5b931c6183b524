//! Extracts a tool call from model output.
//!
//! Policy: scan for the first balanced JSON object that parses and
//! carries a string `name` plus an object `arguments`. Text around the
//! object is ignored here but preserved by the caller.

use serde_json::Value;

use drover_core::ToolCall;

/// Find a tool call anywhere in `text`. Returns `None` when no balanced
/// object in the text qualifies.
pub fn parse_tool_call(text: &str) -> Option<ToolCall> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        match balanced_object_end(bytes, start) {
            Some(end) => {
                if let Some(call) = try_parse(&text[start..=end]) {
                    return Some(call);
                }
                // Not a tool call: keep scanning inside and after it.
                search_from = start + 1;
            }
            None => {
                search_from = start + 1;
            }
        }
    }
    None
}

fn try_parse(candidate: &str) -> Option<ToolCall> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let object = value.as_object()?;

    let name = object.get("name")?.as_str()?.to_string();
    let arguments = object.get("arguments")?;
    if !arguments.is_object() {
        return None;
    }
    let id = object.get("id").and_then(|v| v.as_str()).map(String::from);

    Some(ToolCall {
        name,
        id,
        arguments: arguments.clone(),
    })
}

/// Index of the byte closing the object opened at `start`, honoring
/// strings and escapes. `None` when the object never closes.
fn balanced_object_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_object() {
        let call = parse_tool_call(r#"{"name":"add","arguments":{"a":3,"b":4}}"#).unwrap();
        assert_eq!(call.name, "add");
        assert_eq!(call.arguments, json!({"a": 3, "b": 4}));
        assert_eq!(call.id, None);
    }

    #[test]
    fn parses_object_with_surrounding_prose() {
        let text = "I'll add those numbers. {\"name\":\"add\",\"arguments\":{\"a\":1,\"b\":2}} Done.";
        let call = parse_tool_call(text).unwrap();
        assert_eq!(call.name, "add");
    }

    #[test]
    fn preserves_id() {
        let call =
            parse_tool_call(r#"{"name":"add","id":"call_7","arguments":{}}"#).unwrap();
        assert_eq!(call.id.as_deref(), Some("call_7"));
    }

    #[test]
    fn handles_nested_objects_and_braces_in_strings() {
        let text = r#"{"name":"fmt","arguments":{"template":"{a} and {b}","opts":{"deep":{"x":1}}}}"#;
        let call = parse_tool_call(text).unwrap();
        assert_eq!(call.arguments["template"], "{a} and {b}");
        assert_eq!(call.arguments["opts"]["deep"]["x"], 1);
    }

    #[test]
    fn skips_non_tool_objects_before_the_call() {
        let text = r#"metadata: {"version": 1} then {"name":"go","arguments":{}}"#;
        let call = parse_tool_call(text).unwrap();
        assert_eq!(call.name, "go");
    }

    #[test]
    fn rejects_missing_or_mistyped_fields() {
        assert!(parse_tool_call(r#"{"arguments":{}}"#).is_none());
        assert!(parse_tool_call(r#"{"name":"x"}"#).is_none());
        assert!(parse_tool_call(r#"{"name":"x","arguments":"not-an-object"}"#).is_none());
        assert!(parse_tool_call(r#"{"name":42,"arguments":{}}"#).is_none());
    }

    #[test]
    fn rejects_plain_text_and_unbalanced_braces() {
        assert!(parse_tool_call("no json here").is_none());
        assert!(parse_tool_call(r#"{"name":"x","arguments":{"#).is_none());
    }

    #[test]
    fn escaped_quotes_inside_strings_do_not_break_scanning() {
        let text = r#"{"name":"say","arguments":{"text":"she said \"{ok}\" twice"}}"#;
        let call = parse_tool_call(text).unwrap();
        assert_eq!(call.arguments["text"], "she said \"{ok}\" twice");
    }
}
