//! Shared types for the MCP subsystem.
//!
//! JSON-RPC 2.0 message types, server definitions, and tool descriptors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// One decoded inbound message from a server's stdout.
///
/// The wire is bidirectional: besides responses to our own calls, the
/// server may send us *requests* (notably `roots/list`) and
/// notifications. Classification is structural: a `method` plus an `id`
/// is a request, a `method` without an `id` is a notification, an `id`
/// with `result` or `error` is a response.
#[derive(Debug, Clone)]
pub enum RpcInbound {
    /// Server-initiated request that we must answer (e.g. `roots/list`).
    /// The id is kept as raw JSON so the reply echoes it verbatim.
    Request {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    /// Response to one of our requests.
    Response(JsonRpcResponse),
    /// Fire-and-forget notification from the server.
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

impl RpcInbound {
    /// Classify a parsed JSON value as an inbound message.
    ///
    /// Returns `None` for values that are valid JSON but not JSON-RPC
    /// (stray provider output that happens to parse).
    pub fn classify(value: serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;

        if let Some(method) = obj.get("method").and_then(|m| m.as_str()) {
            let method = method.to_string();
            let params = obj.get("params").cloned();
            return Some(match obj.get("id") {
                Some(id) => RpcInbound::Request {
                    id: id.clone(),
                    method,
                    params,
                },
                None => RpcInbound::Notification { method, params },
            });
        }

        if obj.contains_key("result") || obj.contains_key("error") {
            // Responses with non-numeric ids cannot belong to any of our
            // calls; treat them as noise.
            return serde_json::from_value::<JsonRpcResponse>(value)
                .ok()
                .map(RpcInbound::Response);
        }

        None
    }
}

// ─── Request IDs ─────────────────────────────────────────────────────────────

/// Fixed per-call-site request ids.
///
/// The source protocol dialect reuses small constant ids rather than a
/// monotonic space. This is correct only because all calls against an
/// active server are serialized — one in-flight request per channel.
/// If pipelining is ever introduced, these must become unique per
/// in-flight request.
pub mod request_ids {
    /// `initialize` — the handshake request.
    pub const INITIALIZE: u64 = 1;
    /// `tools/list`.
    pub const TOOLS_LIST: u64 = 2;
    /// `tools/call`.
    pub const TOOLS_CALL: u64 = 3;
}

// ─── Server Definitions ──────────────────────────────────────────────────────

/// A named MCP server definition, as stored in `mcp_servers.json`.
///
/// The name is the map key in the config document, not a field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDefinition {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_icon")]
    pub icon: String,
}

fn default_enabled() -> bool {
    true
}

fn default_icon() -> String {
    "🔧".to_string()
}

/// Top-level `mcp_servers.json` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServersFile {
    #[serde(default)]
    pub servers: HashMap<String, ServerDefinition>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// Tool descriptor as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// `tools/list` result payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// Server summary exposed to the message router.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub description: String,
    pub icon: String,
    pub enabled: bool,
    pub active: bool,
}

/// Envelope returned to the router for tool invocations.
///
/// Transport and process failures are folded into `error` here — raw
/// I/O errors never cross this boundary.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallEnvelope {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message.into()),
        }
    }
}

// ─── Standard JSON-RPC Error Codes ───────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
