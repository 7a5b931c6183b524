use std::fmt;

/// Classification of every error the engine can surface.
///
/// Turn-level kinds roll back the in-flight user message and leave the
/// agent running; fatal kinds stop the agent. MCP kinds are scoped to a
/// single request or session and never take the agent down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidConfig,
    ModelLoadFailed,
    BackendInitFailed,
    ContextCreationFailed,
    TokenizationFailed,
    InferenceFailed,
    GpuOutOfMemory,
    ContextWindowExceeded,
    InvalidMessageSequence,
    InvalidTemplate,
    RequestCancelled,
    QueueFull,
    AgentNotRunning,
    McpTransportFailed,
    McpSessionFailed,
    McpProtocolError,
    McpServerError,
    McpTimeout,
    McpDisconnected,
    Unknown,
}

impl ErrorKind {
    /// Short stable code string for logs and client-facing surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidConfig => "INVALID_CONFIG",
            ErrorKind::ModelLoadFailed => "MODEL_LOAD_FAILED",
            ErrorKind::BackendInitFailed => "BACKEND_INIT_FAILED",
            ErrorKind::ContextCreationFailed => "CONTEXT_CREATION_FAILED",
            ErrorKind::TokenizationFailed => "TOKENIZATION_FAILED",
            ErrorKind::InferenceFailed => "INFERENCE_FAILED",
            ErrorKind::GpuOutOfMemory => "GPU_OUT_OF_MEMORY",
            ErrorKind::ContextWindowExceeded => "CONTEXT_WINDOW_EXCEEDED",
            ErrorKind::InvalidMessageSequence => "INVALID_MESSAGE_SEQUENCE",
            ErrorKind::InvalidTemplate => "INVALID_TEMPLATE",
            ErrorKind::RequestCancelled => "REQUEST_CANCELLED",
            ErrorKind::QueueFull => "QUEUE_FULL",
            ErrorKind::AgentNotRunning => "AGENT_NOT_RUNNING",
            ErrorKind::McpTransportFailed => "MCP_TRANSPORT_FAILED",
            ErrorKind::McpSessionFailed => "MCP_SESSION_FAILED",
            ErrorKind::McpProtocolError => "MCP_PROTOCOL_ERROR",
            ErrorKind::McpServerError => "MCP_SERVER_ERROR",
            ErrorKind::McpTimeout => "MCP_TIMEOUT",
            ErrorKind::McpDisconnected => "MCP_DISCONNECTED",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

/// Engine-wide error value: a kind, a human-readable message, and an
/// optional context string (path, counters, hint).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    context: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    /// Attach a context string (e.g. a file path or token counts).
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Fatal errors stop the agent; everything else is recoverable at
    /// turn, request, or session scope.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::InvalidConfig
                | ErrorKind::ModelLoadFailed
                | ErrorKind::BackendInitFailed
                | ErrorKind::ContextCreationFailed
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.code(), self.message)?;
        if let Some(ctx) = &self.context {
            write!(f, " ({ctx})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
