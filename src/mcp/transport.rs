//! Line-framed JSON-RPC channel over a child process's stdio.
//!
//! The wire protocol is one JSON object per line. Outgoing messages are
//! written and flushed immediately — correctness under slow consumers
//! depends on the synchronous flush, there is no cross-call buffering.
//! Incoming reads are bounded by an explicit timeout and skip malformed
//! lines so a provider emitting stray non-protocol output does not kill
//! the session.
//!
//! The channel is exclusively owned by the active-server registry entry
//! for its lifetime; all calls are serialized through `&mut` access.
//! That serialization is what makes the fixed per-call-site request ids
//! (see [`super::types::request_ids`]) unambiguous.

use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};

use super::errors::McpError;
use super::types::{JsonRpcRequest, RpcInbound};

/// JSON-RPC framing over a child's stdin/stdout pair.
#[derive(Debug)]
pub struct StdioChannel {
    server_name: String,
    writer: ChildStdin,
    reader: BufReader<ChildStdout>,
}

impl StdioChannel {
    /// Create a channel from a child process's captured stdin/stdout.
    pub fn new(server_name: &str, stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self {
            server_name: server_name.to_string(),
            writer: stdin,
            reader: BufReader::new(stdout),
        }
    }

    /// Send a JSON-RPC request (no waiting — reading is the caller's job).
    pub async fn send_request(
        &mut self,
        id: u64,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_value(&req).map_err(|e| McpError::TransportClosed {
            server: self.server_name.clone(),
            reason: format!("failed to serialize request: {e}"),
        })?;
        self.write_line(&json).await
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn send_notification(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write_line(&notification).await
    }

    /// Answer a server-initiated request, echoing its id verbatim.
    pub async fn send_response(
        &mut self,
        id: serde_json::Value,
        result: serde_json::Value,
    ) -> Result<(), McpError> {
        let response = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        });
        self.write_line(&response).await
    }

    /// Wait up to `timeout` for one inbound message.
    ///
    /// Reads exactly one classifiable line. Malformed or non-protocol
    /// lines are logged and skipped within the remaining window.
    /// Returns `Ok(None)` when the window elapses with no message;
    /// EOF on stdout is a `TransportClosed` error (the process has
    /// exited or closed its pipe).
    pub async fn try_receive(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<RpcInbound>, McpError> {
        let deadline = Instant::now() + timeout;
        let mut line_buf = String::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            line_buf.clear();
            let read = tokio::time::timeout(remaining, self.reader.read_line(&mut line_buf)).await;

            let bytes_read = match read {
                Err(_) => return Ok(None), // window elapsed
                Ok(result) => result.map_err(|e| McpError::TransportClosed {
                    server: self.server_name.clone(),
                    reason: format!("failed to read from stdout: {e}"),
                })?,
            };

            if bytes_read == 0 {
                return Err(McpError::TransportClosed {
                    server: self.server_name.clone(),
                    reason: "stdout closed (process may have exited)".into(),
                });
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<serde_json::Value>(trimmed) {
                Ok(value) => match RpcInbound::classify(value) {
                    Some(msg) => return Ok(Some(msg)),
                    None => {
                        tracing::debug!(
                            server = %self.server_name,
                            line = %trimmed,
                            "skipping non-protocol JSON line"
                        );
                    }
                },
                Err(_) => {
                    // Not JSON at all — provider log output, most likely.
                    tracing::debug!(
                        server = %self.server_name,
                        line = %trimmed,
                        "skipping malformed line"
                    );
                }
            }
        }
    }

    async fn write_line(&mut self, value: &serde_json::Value) -> Result<(), McpError> {
        let mut json = value.to_string();
        json.push('\n');

        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| McpError::TransportClosed {
                server: self.server_name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        self.writer
            .flush()
            .await
            .map_err(|e| McpError::TransportClosed {
                server: self.server_name.clone(),
                reason: format!("failed to flush stdin: {e}"),
            })
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting an `error`
/// member into `McpError::ServerError`.
pub fn extract_result(
    response: super::types::JsonRpcResponse,
) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: super::types::error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::JsonRpcResponse;

    #[test]
    fn test_extract_result_success() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: 1,
            result: Some(serde_json::json!({"text": "hello"})),
            error: None,
        };
        let result = extract_result(resp).unwrap();
        assert_eq!(result["text"], "hello");
    }

    #[test]
    fn test_extract_result_error() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: 1,
            result: None,
            error: Some(crate::mcp::types::JsonRpcError {
                code: -32601,
                message: "Method not found".into(),
                data: None,
            }),
        };
        let err = extract_result(resp).unwrap_err();
        match err {
            McpError::ServerError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            _ => panic!("expected ServerError"),
        }
    }

    #[test]
    fn test_extract_result_missing_both() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: 1,
            result: None,
            error: None,
        };
        let err = extract_result(resp).unwrap_err();
        assert!(matches!(err, McpError::ServerError { .. }));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::process::Stdio;
        use tokio::process::Command;

        /// Spawn `sh -c <script>` with piped stdio and wrap it in a channel.
        fn spawn_channel(script: &str) -> (tokio::process::Child, StdioChannel) {
            let mut child = Command::new("sh")
                .arg("-c")
                .arg(script)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
                .unwrap();
            let stdin = child.stdin.take().unwrap();
            let stdout = child.stdout.take().unwrap();
            let channel = StdioChannel::new("fake", stdin, stdout);
            (child, channel)
        }

        #[tokio::test]
        async fn test_round_trip_through_cat() {
            // cat echoes our own request back; it classifies as a Request
            // because it carries both method and id.
            let (mut child, mut channel) = spawn_channel("cat");

            channel
                .send_request(1, "initialize", Some(serde_json::json!({"x": 1})))
                .await
                .unwrap();

            let msg = channel
                .try_receive(Duration::from_secs(2))
                .await
                .unwrap()
                .expect("expected echoed message");

            match msg {
                RpcInbound::Request { id, method, params } => {
                    assert_eq!(id, serde_json::json!(1));
                    assert_eq!(method, "initialize");
                    assert_eq!(params.unwrap()["x"], 1);
                }
                other => panic!("expected Request, got {other:?}"),
            }

            let _ = child.kill().await;
        }

        #[tokio::test]
        async fn test_timeout_returns_none() {
            let (mut child, mut channel) = spawn_channel("sleep 5");

            let got = channel.try_receive(Duration::from_millis(100)).await.unwrap();
            assert!(got.is_none());

            let _ = child.kill().await;
        }

        #[tokio::test]
        async fn test_malformed_lines_are_skipped() {
            let script = r#"
                echo 'this is not json'
                echo '{"also": "not rpc"}'
                echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}'
                sleep 2
            "#;
            let (mut child, mut channel) = spawn_channel(script);

            let msg = channel
                .try_receive(Duration::from_secs(2))
                .await
                .unwrap()
                .expect("expected the valid response");

            match msg {
                RpcInbound::Response(resp) => assert_eq!(resp.id, 2),
                other => panic!("expected Response, got {other:?}"),
            }

            let _ = child.kill().await;
        }

        #[tokio::test]
        async fn test_eof_is_transport_closed() {
            let (mut child, mut channel) = spawn_channel("exit 0");

            // Give the shell a moment to exit so the pipe is closed.
            let err = channel.try_receive(Duration::from_secs(2)).await.unwrap_err();
            assert!(matches!(err, McpError::TransportClosed { .. }));

            let _ = child.wait().await;
        }
    }
}
