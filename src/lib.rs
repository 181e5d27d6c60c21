//! Screen2Action backend — MCP tool-provider process manager.
//!
//! The subsystem with real protocol complexity lives in [`mcp`]: child
//! process lifecycle, line-delimited JSON-RPC over stdio, the
//! initialize/roots handshake, and tool invocation against the single
//! active server. The capture pipeline, OCR/LLM calls, and the
//! WebSocket bridge to the desktop shell are external collaborators
//! and talk to this crate through [`mcp::McpService`].

pub mod config;
pub mod logging;
pub mod mcp;

pub use config::AppConfig;
pub use mcp::{McpError, McpService};

/// Async mutex alias for state shared with the message router.
pub type TokioMutex<T> = tokio::sync::Mutex<T>;

/// Build the service from resolved configuration and set up logging.
///
/// The intended embedding: call once at startup, park the service
/// behind a [`TokioMutex`], and hand it to the router.
pub fn bootstrap() -> anyhow::Result<(AppConfig, McpService)> {
    let config = AppConfig::resolve();
    logging::init_tracing(&config)?;
    let service = McpService::new(&config);
    Ok((config, service))
}
