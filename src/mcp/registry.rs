//! Active-server registry and tool invocation.
//!
//! Tracks at most one active tool-provider at a time. Activation fully
//! deactivates any predecessor before the new child is spawned, so two
//! live children are never attributed to the registry. All traffic
//! against the active server is serialized through `&mut self` — one
//! in-flight request per channel, which is what makes the fixed
//! request ids safe.

use std::time::{Duration, Instant};

use tokio::process::{Child, ChildStderr};

use super::errors::McpError;
use super::handshake::HandshakeCoordinator;
use super::launcher::{self, LaunchedProcess};
use super::roots::SessionRootsBinder;
use super::store::{ServerStore, FILESYSTEM_SERVER};
use super::transport::{extract_result, StdioChannel};
use super::types::{
    error_codes, request_ids, RpcInbound, ToolDescriptor, ToolsListResult,
};
use crate::config::AppConfig;

// ─── ActiveServer ────────────────────────────────────────────────────────────

/// The single live tool-provider process, owned by the registry.
struct ActiveServer {
    name: String,
    child: Child,
    channel: StdioChannel,
    /// Retained for post-mortem capture when the process dies mid-session.
    stderr: Option<ChildStderr>,
}

impl ActiveServer {
    /// Send one correlated request and wait for its response.
    async fn request(
        &mut self,
        id: u64,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, McpError> {
        self.channel.send_request(id, method, Some(params)).await?;

        let started = Instant::now();
        loop {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }

            match self.channel.try_receive(timeout - elapsed).await? {
                None => {
                    return Err(McpError::Timeout {
                        method: method.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
                Some(RpcInbound::Response(resp)) if resp.id == id => {
                    return extract_result(resp);
                }
                Some(other) => {
                    // Post-handshake the provider should only speak in
                    // responses; anything else is drained and ignored.
                    tracing::debug!(
                        server = %self.name,
                        message = ?other,
                        "ignoring uncorrelated message"
                    );
                }
            }
        }
    }
}

// ─── McpRegistry ─────────────────────────────────────────────────────────────

/// Owns server definitions, the session-roots binder, and the single
/// active server slot.
pub struct McpRegistry {
    store: ServerStore,
    binder: SessionRootsBinder,
    handshake_deadline: Duration,
    call_timeout: Duration,
    spawn_grace: Duration,
    shutdown_grace: Duration,
    active: Option<ActiveServer>,
}

impl McpRegistry {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            store: ServerStore::load(&config.config_dir),
            binder: SessionRootsBinder::new(&config.recordings_dir),
            handshake_deadline: config.handshake_deadline,
            call_timeout: config.call_timeout,
            spawn_grace: config.spawn_grace,
            shutdown_grace: config.shutdown_grace,
            active: None,
        }
    }

    pub fn store(&self) -> &ServerStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ServerStore {
        &mut self.store
    }

    pub fn binder(&self) -> &SessionRootsBinder {
        &self.binder
    }

    /// Name of the active server, if any.
    pub fn active_server(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.name.as_str())
    }

    // ─── Activation ──────────────────────────────────────────────────────

    /// Activate a server by name, deactivating any predecessor first.
    ///
    /// For the filesystem provider the session's allowed directory is
    /// resolved, pinned into `mcp_config.json`, and appended as the
    /// final launch argument; the same directory is what the handshake
    /// advertises as the root. On any failure the child is terminated
    /// best-effort and the active slot stays empty.
    pub async fn activate(
        &mut self,
        name: &str,
        session_id: Option<&str>,
    ) -> Result<(), McpError> {
        let definition = self
            .store
            .get(name)
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })?
            .clone();
        if !definition.enabled {
            return Err(McpError::ServerDisabled {
                name: name.to_string(),
            });
        }

        // At most one active server — deactivate the predecessor fully
        // before the new child exists.
        self.deactivate().await;

        let (extra_args, root_dir) = if name == FILESYSTEM_SERVER {
            let dir = self.binder.resolve(session_id)?;
            if let Err(e) = self.store.pin_filesystem_root(&dir) {
                tracing::warn!(error = %e, "could not pin filesystem allowed directory");
            }
            tracing::info!(
                server = %name,
                dir = %dir.display(),
                "filesystem provider scoped to session directory"
            );
            (vec![dir.to_string_lossy().into_owned()], dir)
        } else {
            let cwd = std::env::current_dir().map_err(|e| McpError::ConfigError {
                reason: format!("cannot resolve working directory: {e}"),
            })?;
            (Vec::new(), cwd)
        };

        let mut launched =
            launcher::launch(name, &definition, &extra_args, self.spawn_grace).await?;

        let handshake = HandshakeCoordinator::new(
            &mut launched.channel,
            name,
            &root_dir,
            self.handshake_deadline,
        )
        .run()
        .await;

        match handshake {
            Ok(outcome) => {
                tracing::info!(
                    server = %name,
                    roots_served = outcome.roots_served,
                    "activated MCP server"
                );
                let LaunchedProcess {
                    child,
                    channel,
                    stderr,
                } = launched;
                self.active = Some(ActiveServer {
                    name: name.to_string(),
                    child,
                    channel,
                    stderr,
                });
                Ok(())
            }
            Err(e) => Err(Self::fail_activation(launched, e).await),
        }
    }

    /// Tear down a failed activation: capture stderr when the child has
    /// already died, then make sure it is gone.
    async fn fail_activation(mut launched: LaunchedProcess, error: McpError) -> McpError {
        let exited = matches!(launched.child.try_wait(), Ok(Some(_)));
        let stderr_text = if exited {
            launcher::read_stderr(launched.stderr.take()).await
        } else {
            String::new()
        };

        let _ = launched.child.start_kill();
        let _ = launched.child.wait().await;

        if stderr_text.is_empty() {
            return error;
        }
        let suffix = launcher::stderr_suffix(&stderr_text);
        match error {
            McpError::HandshakeTimeout { name, reason } => McpError::HandshakeTimeout {
                name,
                reason: format!("{reason}{suffix}"),
            },
            McpError::HandshakeFailed { name, reason } => McpError::HandshakeFailed {
                name,
                reason: format!("{reason}{suffix}"),
            },
            McpError::TransportClosed { server, reason } => McpError::TransportClosed {
                server,
                reason: format!("{reason}{suffix}"),
            },
            other => other,
        }
    }

    /// Deactivate the active server, if any.
    ///
    /// Closing the pipes is the graceful stop signal for a stdio
    /// provider (and unblocks any pending read); the child then gets a
    /// grace period to exit before the forceful kill. Safe to call
    /// repeatedly and on an already-dead process.
    pub async fn deactivate(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        tracing::info!(server = %active.name, "deactivating MCP server");
        drop(active.channel);

        match tokio::time::timeout(self.shutdown_grace, active.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!(
                    server = %active.name,
                    "server did not exit within grace period, killing"
                );
                let _ = active.child.start_kill();
                let _ = active.child.wait().await;
            }
        }
    }

    // ─── Tool Invocation ─────────────────────────────────────────────────

    /// List the active server's tools (`tools/list`, id 2).
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, McpError> {
        let result = self
            .request(request_ids::TOOLS_LIST, "tools/list", serde_json::json!({}))
            .await?;

        let parsed: ToolsListResult =
            serde_json::from_value(result).map_err(|e| McpError::ServerError {
                code: error_codes::INTERNAL_ERROR,
                message: format!("malformed tools/list result: {e}"),
                data: None,
            })?;

        tracing::info!(count = parsed.tools.len(), "listed tools from active server");
        Ok(parsed.tools)
    }

    /// Invoke a tool on the active server (`tools/call`, id 3).
    ///
    /// A JSON-RPC error payload surfaces as `ServerError` and leaves
    /// the session alive; transport failures clear the active slot.
    pub async fn call_tool(
        &mut self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let params = serde_json::json!({
            "name": tool,
            "arguments": arguments,
        });
        self.request(request_ids::TOOLS_CALL, "tools/call", params)
            .await
    }

    /// Shared request path with lazy dead-process detection.
    async fn request(
        &mut self,
        id: u64,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let call_timeout = self.call_timeout;

        let Some(active) = self.active.as_mut() else {
            return Err(McpError::NoActiveServer);
        };

        // Lazy liveness check: a child that died since the last call is
        // discovered here, before we write into a broken pipe.
        if let Ok(Some(status)) = active.child.try_wait() {
            let server = active.name.clone();
            let stderr_text = launcher::read_stderr(active.stderr.take()).await;
            tracing::error!(
                server = %server,
                %status,
                stderr = %stderr_text,
                "active MCP server has terminated"
            );
            self.deactivate().await;
            return Err(McpError::TransportClosed {
                server,
                reason: format!(
                    "process exited ({status}){}",
                    launcher::stderr_suffix(&stderr_text)
                ),
            });
        }

        let outcome = active.request(id, method, params, call_timeout).await;

        match outcome {
            Err(McpError::TransportClosed { server, reason }) => {
                // Self-heal: a half-dead server must not shadow the
                // "no active server" state.
                let stderr_text = match self.active.as_mut() {
                    Some(a) => launcher::read_stderr(a.stderr.take()).await,
                    None => String::new(),
                };
                self.deactivate().await;
                Err(McpError::TransportClosed {
                    server,
                    reason: format!("{reason}{}", launcher::stderr_suffix(&stderr_text)),
                })
            }
            Err(e @ McpError::Timeout { .. }) => {
                let died = self
                    .active
                    .as_mut()
                    .map(|a| matches!(a.child.try_wait(), Ok(Some(_))))
                    .unwrap_or(false);
                if died {
                    self.deactivate().await;
                }
                Err(e)
            }
            other => other,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
