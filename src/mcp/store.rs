//! Persistent store for named MCP server definitions.
//!
//! Built-in defaults are seeded on first run and merged with (and
//! overridden by) the persisted user config in `mcp_servers.json`.
//! Every add/update/remove re-persists the whole registry atomically
//! (write to a temp file, then rename). A companion `mcp_config.json`
//! document pins the filesystem provider's allowed-directory argument
//! and is rewritten whenever the session binding changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::errors::McpError;
use super::types::{ServerDefinition, ServersFile};

/// Registry file name under the config directory.
const SERVERS_FILE: &str = "mcp_servers.json";

/// Companion document pinning the filesystem provider's allowed directory.
const PINNED_CONFIG_FILE: &str = "mcp_config.json";

/// The built-in filesystem provider's name. Activation special-cases it
/// to append the session directory as the final launch argument.
pub const FILESYSTEM_SERVER: &str = "filesystem";

/// Store of named server definitions backed by a JSON file.
#[derive(Debug, Clone)]
pub struct ServerStore {
    config_dir: PathBuf,
    servers: HashMap<String, ServerDefinition>,
}

impl ServerStore {
    /// Load the store: built-in defaults, overridden per-name by
    /// whatever `mcp_servers.json` carries.
    pub fn load(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        let mut servers: HashMap<String, ServerDefinition> = default_definitions();

        let path = config_dir.join(SERVERS_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<ServersFile>(&content) {
                Ok(file) => {
                    for (name, def) in file.servers {
                        tracing::info!(server = %name, "loaded server config");
                        servers.insert(name, def);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        path = %path.display(),
                        error = %e,
                        "failed to parse server config, using defaults"
                    );
                }
            },
            Err(_) => {
                tracing::debug!(path = %path.display(), "no server config file, using defaults");
            }
        }

        Self {
            config_dir,
            servers,
        }
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    pub fn get(&self, name: &str) -> Option<&ServerDefinition> {
        self.servers.get(name)
    }

    /// All definitions, name-keyed.
    pub fn all(&self) -> &HashMap<String, ServerDefinition> {
        &self.servers
    }

    /// Names of enabled servers.
    pub fn enabled_names(&self) -> Vec<String> {
        self.servers
            .iter()
            .filter(|(_, def)| def.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    // ─── Mutations (each re-persists the whole registry) ─────────────────

    pub fn add(&mut self, name: &str, definition: ServerDefinition) -> Result<(), McpError> {
        self.servers.insert(name.to_string(), definition);
        self.save()
    }

    /// Apply an in-place edit to a definition. Returns `UnknownServer`
    /// when the name has no entry.
    pub fn update(
        &mut self,
        name: &str,
        edit: impl FnOnce(&mut ServerDefinition),
    ) -> Result<(), McpError> {
        match self.servers.get_mut(name) {
            Some(def) => {
                edit(def);
                self.save()
            }
            None => Err(McpError::UnknownServer {
                name: name.to_string(),
            }),
        }
    }

    pub fn remove(&mut self, name: &str) -> Result<(), McpError> {
        if self.servers.remove(name).is_none() {
            return Err(McpError::UnknownServer {
                name: name.to_string(),
            });
        }
        self.save()
    }

    /// Persist the whole registry to `mcp_servers.json`.
    fn save(&self) -> Result<(), McpError> {
        let file = ServersFile {
            servers: self.servers.clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| McpError::ConfigError {
            reason: format!("failed to serialize server config: {e}"),
        })?;
        write_atomic(&self.config_dir.join(SERVERS_FILE), &json)?;
        tracing::info!(count = self.servers.len(), "saved MCP server configurations");
        Ok(())
    }

    // ─── Filesystem provider pin ─────────────────────────────────────────

    /// Rewrite `mcp_config.json` so the filesystem provider's argv ends
    /// in `allowed_dir`. Any previous absolute-path argument and any
    /// literal `stdio` token are dropped first.
    pub fn pin_filesystem_root(&self, allowed_dir: &Path) -> Result<(), McpError> {
        let path = self.config_dir.join(PINNED_CONFIG_FILE);

        let mut doc: serde_json::Value = std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_else(|| default_pinned_config(allowed_dir));

        if let Some(fs_config) = doc
            .get_mut("mcpServers")
            .and_then(|s| s.get_mut(FILESYSTEM_SERVER))
        {
            let args = fs_config
                .as_object_mut()
                .and_then(|obj| {
                    obj.entry("args")
                        .or_insert_with(|| serde_json::json!([]))
                        .as_array_mut()
                })
                .ok_or(McpError::ConfigError {
                    reason: "malformed mcp_config.json: args is not an array".into(),
                })?;

            args.retain(|arg| match arg.as_str() {
                Some(s) => s != "stdio" && !Path::new(s).is_absolute(),
                None => false,
            });
            args.push(serde_json::json!(allowed_dir.to_string_lossy()));
        }

        let json = serde_json::to_string_pretty(&doc).map_err(|e| McpError::ConfigError {
            reason: format!("failed to serialize pinned config: {e}"),
        })?;
        write_atomic(&path, &json)?;
        tracing::info!(
            dir = %allowed_dir.display(),
            "pinned filesystem provider allowed directory"
        );
        Ok(())
    }
}

/// Default pinned-config document for a fresh install.
fn default_pinned_config(allowed_dir: &Path) -> serde_json::Value {
    serde_json::json!({
        "mcpServers": {
            "filesystem": {
                "command": "npx",
                "args": ["-y", "@modelcontextprotocol/server-filesystem", allowed_dir.to_string_lossy()]
            }
        }
    })
}

/// Write a config file atomically: temp file in the same directory,
/// then rename over the target.
fn write_atomic(path: &Path, content: &str) -> Result<(), McpError> {
    let dir = path.parent().ok_or(McpError::ConfigError {
        reason: format!("config path has no parent: {}", path.display()),
    })?;
    std::fs::create_dir_all(dir).map_err(|e| McpError::ConfigError {
        reason: format!("failed to create config dir {}: {e}", dir.display()),
    })?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content).map_err(|e| McpError::ConfigError {
        reason: format!("failed to write {}: {e}", tmp.display()),
    })?;
    std::fs::rename(&tmp, path).map_err(|e| McpError::ConfigError {
        reason: format!("failed to replace {}: {e}", path.display()),
    })
}

// ─── Built-in Defaults ───────────────────────────────────────────────────────

/// Built-in server definitions, seeded when no user config overrides
/// them. The disabled ones need credentials the user must supply.
fn default_definitions() -> HashMap<String, ServerDefinition> {
    let mut servers = HashMap::new();

    servers.insert(
        FILESYSTEM_SERVER.to_string(),
        ServerDefinition {
            command: "npx".to_string(),
            args: vec!["-y".to_string(), "@modelcontextprotocol/server-filesystem".to_string()],
            env: HashMap::new(),
            enabled: true,
            description: "File system operations (read, write, list)".to_string(),
            icon: "📁".to_string(),
        },
    );
    servers.insert(
        "web-search".to_string(),
        ServerDefinition {
            command: "npx".to_string(),
            args: vec!["-y".to_string(), "@modelcontextprotocol/server-brave-search".to_string()],
            env: HashMap::from([("BRAVE_API_KEY".to_string(), String::new())]),
            enabled: false,
            description: "Web search using Brave Search API".to_string(),
            icon: "🔍".to_string(),
        },
    );
    servers.insert(
        "github".to_string(),
        ServerDefinition {
            command: "npx".to_string(),
            args: vec!["-y".to_string(), "@modelcontextprotocol/server-github".to_string()],
            env: HashMap::from([("GITHUB_TOKEN".to_string(), String::new())]),
            enabled: false,
            description: "GitHub repository operations".to_string(),
            icon: "🐙".to_string(),
        },
    );
    servers.insert(
        "postgres".to_string(),
        ServerDefinition {
            command: "npx".to_string(),
            args: vec!["-y".to_string(), "@modelcontextprotocol/server-postgres".to_string()],
            env: HashMap::from([("DATABASE_URL".to_string(), String::new())]),
            enabled: false,
            description: "PostgreSQL database operations".to_string(),
            icon: "🐘".to_string(),
        },
    );
    servers.insert(
        "puppeteer".to_string(),
        ServerDefinition {
            command: "npx".to_string(),
            args: vec!["-y".to_string(), "@modelcontextprotocol/server-puppeteer".to_string()],
            env: HashMap::new(),
            enabled: true,
            description: "Web browser automation".to_string(),
            icon: "🎭".to_string(),
        },
    );
    servers.insert(
        "memory".to_string(),
        ServerDefinition {
            command: "npx".to_string(),
            args: vec!["-y".to_string(), "@modelcontextprotocol/server-memory".to_string()],
            env: HashMap::new(),
            enabled: true,
            description: "In-memory knowledge graph".to_string(),
            icon: "🧠".to_string(),
        },
    );

    servers
}

// ─── Tests ───────────────────────────────────────────────────────────────────
