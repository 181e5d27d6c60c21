//! Child process launcher for MCP tool providers.
//!
//! Builds the argv, merges environment overrides, wires piped stdio,
//! and verifies the process survives a short grace period before
//! handing it to the handshake. Early exits surface the child's stderr
//! in the failure reason.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, Command};

use super::errors::McpError;
use super::transport::StdioChannel;
use super::types::ServerDefinition;

/// The stdio transport is the provider default; the literal token must
/// never be passed as an argument.
const STDIO_TOKEN: &str = "stdio";

/// Cap on captured stderr text attached to failure reasons.
const STDERR_CAPTURE_LIMIT: usize = 2000;

/// How long to wait for stderr to drain when capturing after a failure.
const STDERR_CAPTURE_TIMEOUT: Duration = Duration::from_millis(500);

/// A freshly spawned provider process, not yet initialized.
#[derive(Debug)]
pub struct LaunchedProcess {
    pub child: Child,
    pub channel: StdioChannel,
    /// Retained for post-mortem capture when the handshake fails.
    pub stderr: Option<ChildStderr>,
}

/// Spawn a provider process from its definition.
///
/// argv is `command + args + extra_args`, with any literal `stdio`
/// token filtered out of the configured args (some stored definitions
/// carry it; the transport is implicit). `extra_args` is how the
/// registry appends the allowed directory for filesystem-type
/// providers. The definition's env overrides are merged on top of the
/// inherited process environment.
///
/// After spawning, the process is given `grace` to prove it can stay
/// up; if it has already exited, stderr is drained and returned inside
/// `SpawnFailed`.
pub async fn launch(
    name: &str,
    definition: &ServerDefinition,
    extra_args: &[String],
    grace: Duration,
) -> Result<LaunchedProcess, McpError> {
    let args: Vec<&str> = definition
        .args
        .iter()
        .map(String::as_str)
        .filter(|a| *a != STDIO_TOKEN)
        .chain(extra_args.iter().map(String::as_str))
        .collect();

    tracing::info!(
        server = %name,
        command = %definition.command,
        args = ?args,
        "starting MCP server"
    );

    let mut cmd = Command::new(&definition.command);
    cmd.args(&args);
    cmd.envs(&definition.env);

    // Windows: prevent console window from appearing for child processes
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    // Wire stdio for JSON-RPC; stderr captured for diagnostics
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{e}"),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdin".into(),
    })?;

    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdout".into(),
    })?;

    let stderr = child.stderr.take();

    // Short grace period: a provider that dies immediately (bad package
    // name, missing interpreter) should fail activation with its stderr
    // rather than a later opaque handshake timeout.
    tokio::time::sleep(grace).await;

    if let Ok(Some(status)) = child.try_wait() {
        let stderr_text = read_stderr(stderr).await;
        tracing::error!(
            server = %name,
            %status,
            stderr = %stderr_text,
            "MCP server exited during startup grace period"
        );
        return Err(McpError::SpawnFailed {
            name: name.to_string(),
            reason: format!("exited during startup ({status}){}", stderr_suffix(&stderr_text)),
        });
    }

    let channel = StdioChannel::new(name, stdin, stdout);

    Ok(LaunchedProcess {
        child,
        channel,
        stderr,
    })
}

/// Read whatever stderr output a failed process produced.
///
/// Bounded by a short timeout so an empty or still-open pipe cannot
/// stall the failure path; truncated to keep log messages readable.
pub async fn read_stderr(stderr: Option<ChildStderr>) -> String {
    use tokio::io::AsyncReadExt;

    let Some(mut stderr) = stderr else {
        return String::new();
    };

    let mut buf = String::new();
    match tokio::time::timeout(STDERR_CAPTURE_TIMEOUT, stderr.read_to_string(&mut buf)).await {
        Ok(Ok(_)) => {
            if buf.len() > STDERR_CAPTURE_LIMIT {
                buf.truncate(STDERR_CAPTURE_LIMIT);
                buf.push_str("...(truncated)");
            }
            buf
        }
        _ => String::new(),
    }
}

/// Format a stderr suffix for error messages (empty when no stderr).
pub fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn definition(command: &str, args: &[&str]) -> ServerDefinition {
        ServerDefinition {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
            enabled: true,
            description: String::new(),
            icon: "🔧".to_string(),
        }
    }

    #[tokio::test]
    async fn test_spawn_unknown_command_fails() {
        let def = definition("/nonexistent/definitely-not-a-command", &[]);
        let err = launch("ghost", &def, &[], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::SpawnFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_captures_stderr() {
        let def = definition("sh", &["-c", "echo 'boom: missing package' >&2; exit 1"]);
        let err = launch("broken", &def, &[], Duration::from_millis(200))
            .await
            .unwrap_err();
        match err {
            McpError::SpawnFailed { name, reason } => {
                assert_eq!(name, "broken");
                assert!(reason.contains("boom: missing package"), "reason: {reason}");
            }
            other => panic!("expected SpawnFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_token_is_filtered() {
        // The script prints its argv to stderr and exits, so the grace
        // check fails with the argv text as the captured reason.
        let def = definition(
            "sh",
            &["-c", r#"echo "$@" >&2; exit 1"#, "argv0", "stdio", "-y", "pkg"],
        );
        let extra = vec!["/tmp/allowed".to_string()];
        let err = launch("echoer", &def, &extra, Duration::from_millis(200))
            .await
            .unwrap_err();
        match err {
            McpError::SpawnFailed { reason, .. } => {
                assert!(reason.contains("-y pkg /tmp/allowed"), "argv: {reason}");
                assert!(!reason.contains("stdio"), "argv: {reason}");
            }
            other => panic!("expected SpawnFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_overrides_reach_child() {
        let mut def = definition("sh", &["-c", r#"echo "$S2A_TEST_MARKER" >&2; exit 3"#]);
        def.env
            .insert("S2A_TEST_MARKER".to_string(), "marker-value".to_string());
        let err = launch("env-check", &def, &[], Duration::from_millis(200))
            .await
            .unwrap_err();
        match err {
            McpError::SpawnFailed { reason, .. } => {
                assert!(reason.contains("marker-value"), "reason: {reason}");
            }
            other => panic!("expected SpawnFailed, got {other:?}"),
        }
    }
}
