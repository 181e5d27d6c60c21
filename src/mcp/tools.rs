//! Built-in local tools.
//!
//! A fixed set of named handlers behind one trait, registered in a
//! name→handler map at startup. These run in-process and do not touch
//! the active MCP server.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::errors::McpError;

/// Timeout for `execute_command`.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Commands `execute_command` is willing to run.
const ALLOWED_COMMANDS: &[&str] = &["ls", "pwd", "echo", "date", "whoami"];

// ─── Trait ───────────────────────────────────────────────────────────────────

/// One built-in tool handler.
#[async_trait]
pub trait BuiltinTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn execute(&self, params: &Value) -> Result<Value, McpError>;
}

// ─── Toolset ─────────────────────────────────────────────────────────────────

/// Registry of built-in tools, keyed by name.
pub struct BuiltinToolset {
    tools: HashMap<&'static str, Box<dyn BuiltinTool>>,
}

impl BuiltinToolset {
    /// Register the fixed built-in set.
    pub fn new() -> Self {
        let handlers: Vec<Box<dyn BuiltinTool>> = vec![
            Box::new(FileRead),
            Box::new(FileWrite),
            Box::new(FileList),
            Box::new(JsonParse),
            Box::new(TextExtract),
            Box::new(ExecuteCommand),
        ];

        let mut tools: HashMap<&'static str, Box<dyn BuiltinTool>> = HashMap::new();
        for handler in handlers {
            tools.insert(handler.name(), handler);
        }
        tracing::info!(count = tools.len(), "registered built-in MCP tools");

        Self { tools }
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, params: &Value) -> Result<Value, McpError> {
        let tool = self.tools.get(name).ok_or_else(|| McpError::UnknownTool {
            name: name.to_string(),
        })?;
        let result = tool.execute(params).await;
        match &result {
            Ok(_) => tracing::info!(tool = %name, "executed built-in tool"),
            Err(e) => tracing::error!(tool = %name, error = %e, "built-in tool failed"),
        }
        result
    }

    /// `name → description` for all registered tools.
    pub fn list(&self) -> HashMap<String, String> {
        self.tools
            .values()
            .map(|t| (t.name().to_string(), t.description().to_string()))
            .collect()
    }

    pub fn is_healthy(&self) -> bool {
        !self.tools.is_empty()
    }
}

impl Default for BuiltinToolset {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Param Helpers ───────────────────────────────────────────────────────────

fn required_str<'a>(params: &'a Value, key: &str, tool: &str) -> Result<&'a str, McpError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| McpError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("missing required parameter: {key}"),
        })
}

// ─── Handlers ────────────────────────────────────────────────────────────────

/// Read the contents of a file.
struct FileRead;

#[async_trait]
impl BuiltinTool for FileRead {
    fn name(&self) -> &'static str {
        "file_read"
    }
    fn description(&self) -> &'static str {
        "Read contents of a file"
    }
    async fn execute(&self, params: &Value) -> Result<Value, McpError> {
        let path = required_str(params, "path", self.name())?;
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| McpError::ToolFailed {
                    tool: self.name().to_string(),
                    reason: format!("cannot read {path}: {e}"),
                })?;
        Ok(Value::String(content))
    }
}

/// Write contents to a file, creating parent directories.
struct FileWrite;

#[async_trait]
impl BuiltinTool for FileWrite {
    fn name(&self) -> &'static str {
        "file_write"
    }
    fn description(&self) -> &'static str {
        "Write contents to a file"
    }
    async fn execute(&self, params: &Value) -> Result<Value, McpError> {
        let path = required_str(params, "path", self.name())?;
        let content = params
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| McpError::InvalidArguments {
                tool: self.name().to_string(),
                reason: "missing required parameters: path, content".to_string(),
            })?;

        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| McpError::ToolFailed {
                    tool: self.name().to_string(),
                    reason: format!("cannot create parent of {path}: {e}"),
                })?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| McpError::ToolFailed {
                tool: self.name().to_string(),
                reason: format!("cannot write {path}: {e}"),
            })?;

        Ok(json!({"success": true, "path": path}))
    }
}

/// List files in a directory, optionally filtered by a glob pattern.
struct FileList;

#[async_trait]
impl BuiltinTool for FileList {
    fn name(&self) -> &'static str {
        "file_list"
    }
    fn description(&self) -> &'static str {
        "List files in a directory"
    }
    async fn execute(&self, params: &Value) -> Result<Value, McpError> {
        let dir = params.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let pattern = params.get("pattern").and_then(|v| v.as_str()).unwrap_or("*");

        if !Path::new(dir).is_dir() {
            return Err(McpError::InvalidArguments {
                tool: self.name().to_string(),
                reason: format!("not a directory: {dir}"),
            });
        }

        let matcher = glob_to_regex(pattern).map_err(|e| McpError::InvalidArguments {
            tool: self.name().to_string(),
            reason: format!("bad pattern '{pattern}': {e}"),
        })?;

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| McpError::ToolFailed {
                tool: self.name().to_string(),
                reason: format!("cannot list {dir}: {e}"),
            })?;

        let mut files = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if matcher.is_match(&name) {
                files.push(entry.path().to_string_lossy().into_owned());
            }
        }
        files.sort();

        Ok(json!(files))
    }
}

/// Translate a shell-style glob into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<regex::Regex, regex::Error> {
    let mut escaped = String::with_capacity(pattern.len() + 8);
    escaped.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => escaped.push_str(".*"),
            '?' => escaped.push('.'),
            other => escaped.push_str(&regex::escape(&other.to_string())),
        }
    }
    escaped.push('$');
    regex::Regex::new(&escaped)
}

/// Parse a JSON string into a value.
struct JsonParse;

#[async_trait]
impl BuiltinTool for JsonParse {
    fn name(&self) -> &'static str {
        "json_parse"
    }
    fn description(&self) -> &'static str {
        "Parse JSON string"
    }
    async fn execute(&self, params: &Value) -> Result<Value, McpError> {
        let data = required_str(params, "data", self.name())?;
        serde_json::from_str(data).map_err(|e| McpError::InvalidArguments {
            tool: self.name().to_string(),
            reason: format!("invalid JSON: {e}"),
        })
    }
}

/// Extract text matching a regex, matches joined by newlines.
struct TextExtract;

#[async_trait]
impl BuiltinTool for TextExtract {
    fn name(&self) -> &'static str {
        "text_extract"
    }
    fn description(&self) -> &'static str {
        "Extract text based on pattern"
    }
    async fn execute(&self, params: &Value) -> Result<Value, McpError> {
        let text = params.get("text").and_then(|v| v.as_str()).unwrap_or("");
        let Some(pattern) = params.get("pattern").and_then(|v| v.as_str()) else {
            // No pattern — the input passes through unchanged
            return Ok(Value::String(text.to_string()));
        };

        let re = regex::Regex::new(pattern).map_err(|e| McpError::InvalidArguments {
            tool: self.name().to_string(),
            reason: format!("bad pattern '{pattern}': {e}"),
        })?;

        let matches: Vec<&str> = re.find_iter(text).map(|m| m.as_str()).collect();
        Ok(Value::String(matches.join("\n")))
    }
}

/// Run an allowlisted shell command with a timeout.
struct ExecuteCommand;

#[async_trait]
impl BuiltinTool for ExecuteCommand {
    fn name(&self) -> &'static str {
        "execute_command"
    }
    fn description(&self) -> &'static str {
        "Execute a system command (with caution)"
    }
    async fn execute(&self, params: &Value) -> Result<Value, McpError> {
        let command = required_str(params, "command", self.name())?;

        let first = command.split_whitespace().next().unwrap_or("");
        if !ALLOWED_COMMANDS.contains(&first) {
            return Err(McpError::InvalidArguments {
                tool: self.name().to_string(),
                reason: format!("command not allowed: {first}"),
            });
        }

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = tokio::process::Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = tokio::process::Command::new("sh");
            c.args(["-c", command]);
            c
        };

        let output = match tokio::time::timeout(COMMAND_TIMEOUT, cmd.output()).await {
            Err(_) => return Ok(json!({"error": "Command timed out"})),
            Ok(Err(e)) => return Ok(json!({"error": e.to_string()})),
            Ok(Ok(output)) => output,
        };

        Ok(json!({
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "returncode": output.status.code(),
        }))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
