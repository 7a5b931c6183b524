use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RagSettings;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A single conversation message. Immutable once appended to history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Correlates a Tool message with the tool call that produced it.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
    /// Tool name for Tool messages.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Tool result message, correlated to the originating call when the
    /// model supplied an id.
    pub fn tool(
        content: impl Into<String>,
        name: impl Into<String>,
        tool_call_id: Option<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id,
            name: Some(name.into()),
        }
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            name: None,
        }
    }
}

/// A tool invocation parsed out of model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    pub arguments: Value,
}

/// A retrieved context chunk, from either the in-memory store or the
/// durable context database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagChunk {
    pub id: String,
    pub content: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<String>,
}

/// Token accounting for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Wall-clock metrics for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetrics {
    pub latency_ms: u64,
    /// Time from request start to the first streamed piece. Equals
    /// `latency_ms` when nothing was streamed.
    pub time_to_first_token_ms: u64,
    /// Completion tokens per second, measured from the first piece.
    pub tokens_per_second: f64,
}

/// Final structured result of a turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    pub usage: TokenUsage,
    pub metrics: TurnMetrics,
    /// Chunks injected as retrieved context for this turn.
    pub rag_chunks: Vec<RagChunk>,
}

impl Response {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Streaming sink: receives each UTF-8 piece as it is generated.
/// Runs on the inference thread; callers that must not block generation
/// are responsible for handing pieces off to another thread.
pub type StreamSink = Box<dyn FnMut(&str) + Send>;

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub rag: RagSettings,
}

/// A queued inference request.
pub struct Request {
    pub message: Message,
    pub options: RequestOptions,
    pub sink: Option<StreamSink>,
}

impl Request {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            options: RequestOptions::default(),
            sink: None,
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_sink(mut self, sink: StreamSink) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("message", &self.message)
            .field("options", &self.options)
            .field("sink", &self.sink.as_ref().map(|_| "<sink>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_strings() {
        for role in [Role::System, Role::User, Role::Assistant, Role::Tool] {
            let parsed: Role = role.as_str().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("moderator".parse::<Role>().is_err());
    }

    #[test]
    fn message_serde_omits_empty_optionals() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert!(!json.contains("tool_call_id"));
        assert!(!json.contains("name"));

        let tool = Message::tool("7", "add", Some("call_1".into()));
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains(r#""tool_call_id":"call_1""#));
        assert!(json.contains(r#""name":"add""#));
    }
}
