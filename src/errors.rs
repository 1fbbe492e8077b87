//! Error types shared by the client, schema and codegen layers.
//!
//! Every variant carries the context needed to act on it without re-deriving
//! schema intent: the server or tool involved and, for validation failures,
//! the exact field path.

use thiserror::Error;

/// Coarse classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// I/O, timeout, or process exit. The host may reconnect and retry.
    Transport,
    /// The server answered with a JSON-RPC error object.
    Protocol,
    /// The requested tool is not in the cache.
    ToolNotFound,
    /// An argument or artifact failed its type contract.
    SchemaValidation,
    /// A tool schema could not be modelled.
    UnsupportedSchema,
    /// Bad or missing configuration.
    Config,
    /// The client was used after `close()`.
    Lifecycle,
}

/// Errors surfaced by toolbridge operations.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Pipe broken, process exited, malformed frame, or spawn failure.
    #[error("transport error for server '{server}': {reason}")]
    Transport { server: String, reason: String },

    /// A request did not complete within its deadline.
    #[error("'{method}' on server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server '{server}' rejected '{method}' [{code}]: {message}")]
    ServerError {
        server: String,
        method: String,
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Tool name absent from the discovered tool set.
    #[error("unknown tool: '{tool}'{}", format_suggestions(.suggestions))]
    ToolNotFound {
        tool: String,
        suggestions: Vec<String>,
    },

    /// A value does not satisfy the type it is checked against.
    #[error("invalid arguments for '{tool}' at '{path}': {reason}")]
    SchemaValidation {
        tool: String,
        path: String,
        reason: String,
    },

    /// Schema inference met a shape it cannot model.
    #[error("unsupported schema for '{tool}' at '{path}': {reason}")]
    UnsupportedSchema {
        tool: String,
        path: String,
        reason: String,
    },

    /// A generated artifact failed structural validation.
    #[error("artifact '{artifact}' rejected with {} violation(s): {}", .violations.len(), .violations.join("; "))]
    ArtifactInvalid {
        artifact: String,
        violations: Vec<String>,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// The client has been closed.
    #[error("client for server '{server}' is closed")]
    Closed { server: String },
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

impl ClientError {
    /// Map this error onto the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport { .. } | ClientError::Timeout { .. } => ErrorKind::Transport,
            ClientError::ServerError { .. } => ErrorKind::Protocol,
            ClientError::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            ClientError::SchemaValidation { .. } | ClientError::ArtifactInvalid { .. } => {
                ErrorKind::SchemaValidation
            }
            ClientError::UnsupportedSchema { .. } => ErrorKind::UnsupportedSchema,
            ClientError::Config { .. } => ErrorKind::Config,
            ClientError::Closed { .. } => ErrorKind::Lifecycle,
        }
    }

    /// Whether a host retry policy may reasonably retry after reconnecting.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Field path for validation and inference failures.
    pub fn field_path(&self) -> Option<&str> {
        match self {
            ClientError::SchemaValidation { path, .. }
            | ClientError::UnsupportedSchema { path, .. } => Some(path),
            _ => None,
        }
    }
}
