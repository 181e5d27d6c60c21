//! MCP subsystem error types.

use thiserror::Error;

/// Errors that can occur while managing and talking to MCP servers.
///
/// Transport- and process-level failures are converted into these
/// structured variants at the subsystem boundary; callers never see raw
/// I/O errors.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start or exited immediately.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// No initialize response arrived within the handshake deadline.
    #[error("server '{name}' handshake timed out: {reason}")]
    HandshakeTimeout { name: String, reason: String },

    /// The server answered initialize with an error, or the exchange
    /// broke down before the deadline.
    #[error("server '{name}' handshake failed: {reason}")]
    HandshakeFailed { name: String, reason: String },

    /// An operation that requires an active server found none.
    #[error("no active MCP server")]
    NoActiveServer,

    /// Activation was requested for a name with no definition.
    #[error("unknown server: '{name}'")]
    UnknownServer { name: String },

    /// Activation was requested for a disabled definition.
    #[error("server '{name}' is disabled")]
    ServerDisabled { name: String },

    /// The stdio pipe closed or broke mid-call. The active slot is
    /// cleared when this surfaces so subsequent calls fail fast.
    #[error("transport closed for server '{server}': {reason}")]
    TransportClosed { server: String, reason: String },

    /// A correlated response did not arrive within the per-call timeout.
    #[error("request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// The server returned a JSON-RPC error payload. Application-level;
    /// the session survives.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Built-in tool dispatch: no handler registered under that name.
    #[error("unknown MCP tool: '{name}'")]
    UnknownTool { name: String },

    /// Built-in tool parameters failed validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// Built-in tool execution failed (I/O and the like).
    #[error("tool '{tool}' failed: {reason}")]
    ToolFailed { tool: String, reason: String },

    /// Configuration store error (bad file, failed persist).
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}
