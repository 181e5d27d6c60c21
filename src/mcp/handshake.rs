//! The `initialize` handshake, including inline roots negotiation.
//!
//! The exchange is not a plain request/response: while waiting for the
//! initialize result the child may itself send a `roots/list` request,
//! before or after acknowledging initialize. That request must be
//! answered promptly and truthfully — the filesystem provider's entire
//! access scope hangs on it — so the read loop services it inline.
//!
//! State machine: `NotStarted → AwaitingInitResponse → Ready | Failed`.

use std::path::Path;
use std::time::{Duration, Instant};

use super::errors::McpError;
use super::roots;
use super::transport::StdioChannel;
use super::types::{request_ids, RpcInbound};

/// Quiet window after the initialize result: if nothing further arrives
/// within this long, no roots request is pending and the handshake can
/// finish early instead of draining the full deadline.
const POST_INIT_QUIET: Duration = Duration::from_secs(1);

/// Handshake progression, mostly for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    NotStarted,
    AwaitingInitResponse,
    Ready,
    Failed,
}

/// What the handshake observed.
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// The initialize result payload.
    pub init_result: serde_json::Value,
    /// Whether a `roots/list` request was served during the window.
    pub roots_served: bool,
}

/// Drives the initialize exchange for one freshly launched server.
pub struct HandshakeCoordinator<'a> {
    channel: &'a mut StdioChannel,
    server_name: &'a str,
    /// Directory advertised through the roots capability.
    root_dir: &'a Path,
    deadline: Duration,
    phase: HandshakePhase,
}

impl<'a> HandshakeCoordinator<'a> {
    pub fn new(
        channel: &'a mut StdioChannel,
        server_name: &'a str,
        root_dir: &'a Path,
        deadline: Duration,
    ) -> Self {
        Self {
            channel,
            server_name,
            root_dir,
            deadline,
            phase: HandshakePhase::NotStarted,
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Run the handshake to completion or failure.
    ///
    /// Sends `initialize` (id 1) advertising the tools and roots
    /// capabilities, then reads until the deadline, answering any
    /// `roots/list` request as it arrives. After the initialize result
    /// a `roots/list_changed` notification nudges providers that only
    /// request roots lazily. Finishes early once the result has been
    /// seen and no further roots request is pending.
    pub async fn run(&mut self) -> Result<HandshakeOutcome, McpError> {
        match self.drive().await {
            Ok(outcome) => {
                self.phase = HandshakePhase::Ready;
                Ok(outcome)
            }
            Err(e) => {
                self.phase = HandshakePhase::Failed;
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<HandshakeOutcome, McpError> {
        let params = serde_json::json!({
            "protocolVersion": "2025-06-18",
            "clientInfo": {
                "name": "Screen2Action",
                "version": env!("CARGO_PKG_VERSION"),
            },
            // Advertise roots so the server knows it can ask for them
            "capabilities": {"tools": {}, "roots": {}},
        });

        tracing::info!(server = %self.server_name, "sending initialize request");
        self.channel
            .send_request(request_ids::INITIALIZE, "initialize", Some(params))
            .await?;
        self.phase = HandshakePhase::AwaitingInitResponse;

        let roots_payload = roots::build_roots(self.root_dir);
        let started = Instant::now();
        let mut init_result: Option<serde_json::Value> = None;
        let mut roots_served = false;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= self.deadline {
                break;
            }
            let remaining = self.deadline - elapsed;

            // Once initialized, only wait a short quiet window for a
            // late roots request instead of the full deadline.
            let window = if init_result.is_some() {
                remaining.min(POST_INIT_QUIET)
            } else {
                remaining
            };

            let msg = match self.channel.try_receive(window).await? {
                Some(msg) => msg,
                None => {
                    if init_result.is_some() {
                        // Quiet window drained — nothing pending.
                        break;
                    }
                    continue; // outer loop re-checks the deadline
                }
            };

            match msg {
                RpcInbound::Request { id, method, .. } if method == "roots/list" => {
                    self.channel
                        .send_response(id, serde_json::json!({"roots": roots_payload.clone()}))
                        .await?;
                    roots_served = true;
                    tracing::info!(
                        server = %self.server_name,
                        roots = %roots_payload,
                        "answered roots/list"
                    );
                    if init_result.is_some() {
                        break;
                    }
                }
                RpcInbound::Request { method, .. } => {
                    tracing::debug!(
                        server = %self.server_name,
                        %method,
                        "ignoring unexpected server request during handshake"
                    );
                }
                RpcInbound::Response(resp) if resp.id == request_ids::INITIALIZE => {
                    if let Some(err) = resp.error {
                        return Err(McpError::HandshakeFailed {
                            name: self.server_name.to_string(),
                            reason: format!("initialize error [{}]: {}", err.code, err.message),
                        });
                    }
                    tracing::info!(server = %self.server_name, "initialize acknowledged");
                    init_result = Some(resp.result.unwrap_or(serde_json::Value::Null));

                    // Nudge providers that request roots lazily.
                    if let Err(e) = self
                        .channel
                        .send_notification("roots/list_changed", Some(serde_json::json!({})))
                        .await
                    {
                        tracing::debug!(
                            server = %self.server_name,
                            error = %e,
                            "unable to send roots/list_changed"
                        );
                    }

                    if roots_served {
                        break;
                    }
                }
                RpcInbound::Response(resp) => {
                    tracing::debug!(
                        server = %self.server_name,
                        id = resp.id,
                        "ignoring uncorrelated response during handshake"
                    );
                }
                RpcInbound::Notification { method, .. } => {
                    tracing::debug!(
                        server = %self.server_name,
                        %method,
                        "ignoring notification during handshake"
                    );
                }
            }
        }

        match init_result {
            Some(init_result) => Ok(HandshakeOutcome {
                init_result,
                roots_served,
            }),
            None => Err(McpError::HandshakeTimeout {
                name: self.server_name.to_string(),
                reason: format!(
                    "no initialize response within {}s",
                    self.deadline.as_secs_f32()
                ),
            }),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tempfile::TempDir;
    use tokio::process::{Child, Command};

    fn spawn_fake(script: &str, env: &[(&str, &str)]) -> (Child, StdioChannel) {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        for (k, v) in env {
            cmd.env(k, v);
        }
        let mut child = cmd.spawn().unwrap();
        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();
        let channel = StdioChannel::new("fake", stdin, stdout);
        (child, channel)
    }

    async fn kill(mut child: Child) {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }

    #[tokio::test]
    async fn test_happy_path_initialize() {
        let tmp = TempDir::new().unwrap();
        let script = r#"
            read -r _init
            printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18"}}'
            # keep the pipe open while the client drains its quiet window
            sleep 5
        "#;
        let (child, mut channel) = spawn_fake(script, &[]);

        let mut coordinator =
            HandshakeCoordinator::new(&mut channel, "fake", tmp.path(), Duration::from_secs(5));
        let outcome = coordinator.run().await.unwrap();

        assert_eq!(coordinator.phase(), HandshakePhase::Ready);
        assert_eq!(outcome.init_result["protocolVersion"], "2025-06-18");
        assert!(!outcome.roots_served);

        kill(child).await;
    }

    #[tokio::test]
    async fn test_roots_request_before_init_response() {
        let tmp = TempDir::new().unwrap();
        let session = tmp.path().join("S1");
        std::fs::create_dir(&session).unwrap();
        let reply_capture = tmp.path().join("roots_reply.json");

        // The fake asks for roots BEFORE acknowledging initialize, and
        // records the reply it receives so the test can inspect it.
        let script = r#"
            read -r _init
            printf '%s\n' '{"jsonrpc":"2.0","id":42,"method":"roots/list"}'
            read -r reply
            printf '%s\n' "$reply" > "$REPLY_CAPTURE"
            printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'
            sleep 5
        "#;
        let (child, mut channel) =
            spawn_fake(script, &[("REPLY_CAPTURE", reply_capture.to_str().unwrap())]);

        let mut coordinator =
            HandshakeCoordinator::new(&mut channel, "fake", &session, Duration::from_secs(5));
        let outcome = coordinator.run().await.unwrap();
        assert!(outcome.roots_served);

        let reply: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&reply_capture).unwrap()).unwrap();
        assert_eq!(reply["id"], 42);
        let uri = reply["result"]["roots"][0]["uri"].as_str().unwrap();
        assert!(uri.starts_with("file://"));
        assert!(uri.ends_with("/S1"), "uri: {uri}");
        assert_eq!(reply["result"]["roots"][0]["name"], "S1");
        // The advertised directory exists on disk
        assert!(session.is_dir());

        kill(child).await;
    }

    #[tokio::test]
    async fn test_roots_request_after_init_response() {
        let tmp = TempDir::new().unwrap();
        let script = r#"
            read -r _init
            printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'
            # the client now sends roots/list_changed; request roots in return
            read -r _notify
            printf '%s\n' '{"jsonrpc":"2.0","id":2,"method":"roots/list"}'
            read -r _reply
            sleep 5
        "#;
        let (child, mut channel) = spawn_fake(script, &[]);

        let mut coordinator =
            HandshakeCoordinator::new(&mut channel, "fake", tmp.path(), Duration::from_secs(5));
        let outcome = coordinator.run().await.unwrap();
        assert!(outcome.roots_served);

        kill(child).await;
    }

    #[tokio::test]
    async fn test_timeout_without_init_response() {
        let tmp = TempDir::new().unwrap();
        let script = r#"
            read -r _init
            sleep 10
        "#;
        let (child, mut channel) = spawn_fake(script, &[]);

        let mut coordinator = HandshakeCoordinator::new(
            &mut channel,
            "fake",
            tmp.path(),
            Duration::from_millis(300),
        );
        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(err, McpError::HandshakeTimeout { .. }));
        assert_eq!(coordinator.phase(), HandshakePhase::Failed);

        kill(child).await;
    }

    #[tokio::test]
    async fn test_initialize_error_fails_handshake() {
        let tmp = TempDir::new().unwrap();
        let script = r#"
            read -r _init
            printf '%s\n' '{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"unsupported protocol"}}'
            sleep 5
        "#;
        let (child, mut channel) = spawn_fake(script, &[]);

        let mut coordinator =
            HandshakeCoordinator::new(&mut channel, "fake", tmp.path(), Duration::from_secs(5));
        let err = coordinator.run().await.unwrap_err();
        match err {
            McpError::HandshakeFailed { reason, .. } => {
                assert!(reason.contains("unsupported protocol"), "reason: {reason}");
            }
            other => panic!("expected HandshakeFailed, got {other:?}"),
        }

        kill(child).await;
    }

    #[tokio::test]
    async fn test_child_exit_surfaces_transport_closed() {
        let tmp = TempDir::new().unwrap();
        let script = r#"read -r _init; exit 1"#;
        let (child, mut channel) = spawn_fake(script, &[]);

        let mut coordinator =
            HandshakeCoordinator::new(&mut channel, "fake", tmp.path(), Duration::from_secs(5));
        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(err, McpError::TransportClosed { .. }));

        kill(child).await;
    }

    #[tokio::test]
    async fn test_stray_output_does_not_break_handshake() {
        let tmp = TempDir::new().unwrap();
        let script = r#"
            read -r _init
            echo 'npm WARN deprecated something'
            printf '%s\n' '{"jsonrpc":"2.0","method":"notifications/initialized"}'
            printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'
            sleep 5
        "#;
        let (child, mut channel) = spawn_fake(script, &[]);

        let mut coordinator =
            HandshakeCoordinator::new(&mut channel, "fake", tmp.path(), Duration::from_secs(5));
        let outcome = coordinator.run().await.unwrap();
        assert_eq!(outcome.init_result, serde_json::json!({}));

        kill(child).await;
    }
}
