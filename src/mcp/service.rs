//! Service facade — the Activation API consumed by the message router.
//!
//! Converts registry/tool errors into structured envelopes. Raw
//! transport or process failures never cross this boundary, and after
//! any fatal activation or transport error `active_server()` reports
//! `None`.
//!
//! The service is designed to live behind a `tokio::sync::Mutex`: all
//! operations take `&mut self` and traffic against the active server
//! is serialized by construction.

use std::sync::Arc;

use serde_json::{json, Value};

use super::agent::{enhance_task, TaskAgent};
use super::errors::McpError;
use super::registry::McpRegistry;
use super::tools::BuiltinToolset;
use super::types::{ServerDefinition, ServerInfo, ToolCallEnvelope, ToolDescriptor};
use crate::config::AppConfig;

/// High-level MCP service: definitions, the single active server,
/// built-in local tools, and the optional task agent.
pub struct McpService {
    registry: McpRegistry,
    builtins: BuiltinToolset,
    agent: Option<Arc<dyn TaskAgent>>,
}

impl McpService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            registry: McpRegistry::new(config),
            builtins: BuiltinToolset::new(),
            agent: None,
        }
    }

    /// Attach an LLM-driven task agent.
    pub fn with_agent(mut self, agent: Arc<dyn TaskAgent>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn is_agent_available(&self) -> bool {
        self.agent.is_some()
    }

    // ─── Server Catalog ──────────────────────────────────────────────────

    /// All configured servers, sorted by name, with the active flag set.
    pub fn get_servers(&self) -> Vec<ServerInfo> {
        let active = self.registry.active_server().map(str::to_string);
        let mut servers: Vec<ServerInfo> = self
            .registry
            .store()
            .all()
            .iter()
            .map(|(name, def)| ServerInfo {
                name: name.clone(),
                description: def.description.clone(),
                icon: def.icon.clone(),
                enabled: def.enabled,
                active: Some(name.as_str()) == active.as_deref(),
            })
            .collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }

    pub fn add_server(&mut self, name: &str, definition: ServerDefinition) -> Result<(), McpError> {
        self.registry.store_mut().add(name, definition)
    }

    pub fn update_server(
        &mut self,
        name: &str,
        edit: impl FnOnce(&mut ServerDefinition),
    ) -> Result<(), McpError> {
        self.registry.store_mut().update(name, edit)
    }

    pub fn remove_server(&mut self, name: &str) -> Result<(), McpError> {
        self.registry.store_mut().remove(name)
    }

    // ─── Activation ──────────────────────────────────────────────────────

    /// Activate a server for a session. Returns `false` on any failure;
    /// the error detail goes to the log, and the active slot is
    /// guaranteed empty after a failed attempt.
    pub async fn activate_server(&mut self, name: &str, session_id: Option<&str>) -> bool {
        match self.registry.activate(name, session_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(server = %name, error = %e, "failed to activate server");
                false
            }
        }
    }

    pub async fn deactivate_server(&mut self) {
        self.registry.deactivate().await;
    }

    pub fn active_server(&self) -> Option<&str> {
        self.registry.active_server()
    }

    // ─── Remote Tools (active server) ────────────────────────────────────

    /// Tools exposed by the active server; empty when none is active or
    /// the call fails (detail in the log).
    pub async fn list_mcp_tools(&mut self) -> Vec<ToolDescriptor> {
        match self.registry.list_tools().await {
            Ok(tools) => tools,
            Err(McpError::NoActiveServer) => Vec::new(),
            Err(e) => {
                tracing::error!(error = %e, "failed to list tools");
                Vec::new()
            }
        }
    }

    /// Invoke a tool on the active server, folded into an envelope.
    pub async fn execute_mcp_tool(&mut self, tool: &str, arguments: Value) -> ToolCallEnvelope {
        match self.registry.call_tool(tool, arguments).await {
            Ok(result) => ToolCallEnvelope::ok(result),
            Err(McpError::ServerError { code, message, .. }) => {
                ToolCallEnvelope::err(format!("[{code}] {message}"))
            }
            Err(e) => ToolCallEnvelope::err(e.to_string()),
        }
    }

    // ─── Built-in Tools ──────────────────────────────────────────────────

    /// Dispatch to a built-in local tool.
    pub async fn execute_tool(&self, name: &str, params: &Value) -> Result<Value, McpError> {
        self.builtins.execute(name, params).await
    }

    /// `name → description` for the built-in tools.
    pub fn list_tools(&self) -> std::collections::HashMap<String, String> {
        self.builtins.list()
    }

    // ─── Intelligent Tasks ───────────────────────────────────────────────

    /// Run a free-form task through the attached agent.
    ///
    /// With no agent wired, returns the structured fallback envelope
    /// rather than an error — callers degrade to direct tool calls.
    pub async fn run_intelligent_task(
        &self,
        description: &str,
        context: Option<&serde_json::Map<String, Value>>,
    ) -> Value {
        let Some(agent) = &self.agent else {
            return json!({"error": "MCP agent not available", "fallback": true});
        };

        let task = enhance_task(description, context);
        match agent.run_task(&task).await {
            Ok(result) => json!({"success": true, "result": result, "agent_used": true}),
            Err(e) => {
                tracing::error!(error = %e, "agent task failed");
                json!({"error": e.to_string(), "agent_used": true})
            }
        }
    }

    // ─── Sessions ────────────────────────────────────────────────────────

    /// Re-point the filesystem scope at a different session.
    ///
    /// Roots are negotiated only at handshake time, so an active server
    /// is restarted against the new session directory; with nothing
    /// active, the binding is just re-pinned for the next activation.
    pub async fn prepare_for_session(&mut self, session_id: Option<&str>) {
        match self.registry.active_server().map(str::to_string) {
            Some(name) => {
                tracing::info!(server = %name, session = ?session_id, "restarting for session");
                if let Err(e) = self.registry.activate(&name, session_id).await {
                    tracing::warn!(server = %name, error = %e, "restart for session failed");
                }
            }
            None => {
                let dir = match self.registry.binder().resolve(session_id) {
                    Ok(dir) => dir,
                    Err(e) => {
                        tracing::warn!(error = %e, "could not resolve session directory");
                        return;
                    }
                };
                if let Err(e) = self.registry.store().pin_filesystem_root(&dir) {
                    tracing::warn!(error = %e, "could not pin session directory");
                }
            }
        }
    }

    // ─── Health ──────────────────────────────────────────────────────────

    pub fn is_healthy(&self) -> bool {
        self.builtins.is_healthy()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
