//! MCP (Model Context Protocol) client — JSON-RPC over stdio.
//!
//! This module handles:
//! - Spawning and tearing down MCP tool-provider child processes
//! - Line-delimited JSON-RPC 2.0 communication over process stdio
//! - The initialize handshake, including answering server-initiated
//!   `roots/list` requests within the handshake window
//! - The single active-server slot and tool invocation against it
//! - Session-scoped filesystem roots and persisted server definitions
//! - Built-in local tools and the optional LLM task agent
//!
//! The message router drives this subsystem through [`McpService`].

pub mod agent;
pub mod errors;
pub mod handshake;
pub mod launcher;
pub mod registry;
pub mod roots;
pub mod service;
pub mod store;
pub mod tools;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use agent::TaskAgent;
pub use errors::McpError;
pub use registry::McpRegistry;
pub use roots::SessionRootsBinder;
pub use service::McpService;
pub use store::ServerStore;
pub use tools::BuiltinToolset;
pub use types::{ServerDefinition, ServerInfo, ToolCallEnvelope, ToolDescriptor};
