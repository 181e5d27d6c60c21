//! Application configuration.
//!
//! One explicit struct, resolved once at startup and passed into the
//! registry at construction — no global mutable state. Resolution
//! order for each directory: environment variable, then
//! `config/app.json`, then the platform default.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

// ─── Defaults ────────────────────────────────────────────────────────────────

/// Fixed window for the initialize exchange, roots negotiation included.
const DEFAULT_HANDSHAKE_DEADLINE: Duration = Duration::from_secs(5);

/// Per-call timeout for tools/list and tools/call.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a freshly spawned provider gets to prove it stays up.
const DEFAULT_SPAWN_GRACE: Duration = Duration::from_millis(500);

/// How long to wait for a graceful exit before force-killing.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

// ─── AppConfig ───────────────────────────────────────────────────────────────

/// Resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root directory holding one subdirectory per recording session.
    pub recordings_dir: PathBuf,
    /// Directory for the rotating backend log.
    pub logs_dir: PathBuf,
    /// Directory holding `mcp_servers.json` and `mcp_config.json`.
    pub config_dir: PathBuf,
    pub handshake_deadline: Duration,
    pub call_timeout: Duration,
    pub spawn_grace: Duration,
    pub shutdown_grace: Duration,
}

/// The subset of `config/app.json` this crate reads.
#[derive(Debug, Default, Deserialize)]
struct AppFile {
    #[serde(default, rename = "recordingsDir")]
    recordings_dir: Option<String>,
    #[serde(default, rename = "logsDir")]
    logs_dir: Option<String>,
}

impl AppConfig {
    /// Resolve configuration from the environment and `config/app.json`.
    pub fn resolve() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let app_file = load_app_file(&[
            cwd.join("config").join("app.json"),
            cwd.join("..").join("config").join("app.json"),
        ]);

        let recordings_dir = resolve_dir(
            std::env::var("S2A_RECORDINGS_DIR").ok(),
            app_file.recordings_dir.clone(),
            default_recordings_dir(),
        );
        let logs_dir = resolve_dir(
            std::env::var("S2A_LOGS_DIR").ok(),
            app_file.logs_dir.clone(),
            default_logs_dir(),
        );
        let config_dir = match std::env::var("S2A_CONFIG_DIR") {
            Ok(dir) if !dir.trim().is_empty() => expand_home(dir.trim()),
            _ => cwd.join("config"),
        };

        tracing::info!(
            recordings = %recordings_dir.display(),
            logs = %logs_dir.display(),
            config = %config_dir.display(),
            "resolved application directories"
        );

        Self::with_dirs(recordings_dir, logs_dir, config_dir)
    }

    /// Build a config with explicit directories and default timeouts.
    pub fn with_dirs(
        recordings_dir: impl Into<PathBuf>,
        logs_dir: impl Into<PathBuf>,
        config_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            recordings_dir: recordings_dir.into(),
            logs_dir: logs_dir.into(),
            config_dir: config_dir.into(),
            handshake_deadline: DEFAULT_HANDSHAKE_DEADLINE,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            spawn_grace: DEFAULT_SPAWN_GRACE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn handshake_deadline(mut self, deadline: Duration) -> Self {
        self.handshake_deadline = deadline;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn spawn_grace(mut self, grace: Duration) -> Self {
        self.spawn_grace = grace;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

// ─── Resolution Helpers ──────────────────────────────────────────────────────

/// Pick a directory: env var wins, then the config file, then the
/// platform default. The chosen directory is created if missing.
fn resolve_dir(
    env_value: Option<String>,
    file_value: Option<String>,
    default: PathBuf,
) -> PathBuf {
    let dir = env_value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            file_value
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .map(|s| expand_home(&s))
        .unwrap_or(default);

    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "could not create directory");
    }
    dir
}

/// Read the first parseable `app.json` among the candidates.
fn load_app_file(candidates: &[PathBuf]) -> AppFile {
    for path in candidates {
        if let Ok(content) = std::fs::read_to_string(path) {
            match serde_json::from_str::<AppFile>(&content) {
                Ok(file) => {
                    tracing::info!(path = %path.display(), "loaded app config");
                    return file;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to parse app config");
                }
            }
        }
    }
    AppFile::default()
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches('/'));
        }
    }
    PathBuf::from(path)
}

fn default_recordings_dir() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Screen2Action")
        .join("recordings")
}

fn default_logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Platform-standard data directory for Screen2Action.
///
/// Falls back to `~/.screen2action/` only when the platform dir cannot
/// be resolved.
pub(crate) fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("com.screen2action.app");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".screen2action")
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_env_value_wins() {
        let tmp = TempDir::new().unwrap();
        let env_dir = tmp.path().join("from-env");
        let dir = resolve_dir(
            Some(env_dir.to_string_lossy().into_owned()),
            Some("/should/not/be/used".to_string()),
            PathBuf::from("/also/unused"),
        );
        assert_eq!(dir, env_dir);
        assert!(env_dir.is_dir());
    }

    #[test]
    fn test_file_value_when_env_missing() {
        let tmp = TempDir::new().unwrap();
        let file_dir = tmp.path().join("from-file");
        let dir = resolve_dir(
            None,
            Some(file_dir.to_string_lossy().into_owned()),
            PathBuf::from("/unused"),
        );
        assert_eq!(dir, file_dir);
    }

    #[test]
    fn test_blank_env_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let file_dir = tmp.path().join("from-file");
        let dir = resolve_dir(
            Some("   ".to_string()),
            Some(file_dir.to_string_lossy().into_owned()),
            PathBuf::from("/unused"),
        );
        assert_eq!(dir, file_dir);
    }

    #[test]
    fn test_default_when_nothing_configured() {
        let tmp = TempDir::new().unwrap();
        let fallback = tmp.path().join("fallback");
        let dir = resolve_dir(None, None, fallback.clone());
        assert_eq!(dir, fallback);
        assert!(fallback.is_dir());
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/recordings"), home.join("recordings"));
        }
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn test_load_app_file_prefers_first_parseable() {
        let tmp = TempDir::new().unwrap();
        let bad = tmp.path().join("bad.json");
        let good = tmp.path().join("good.json");
        std::fs::write(&bad, "not json").unwrap();
        std::fs::write(&good, r#"{"recordingsDir": "/data/recordings"}"#).unwrap();

        let file = load_app_file(&[bad, good]);
        assert_eq!(file.recordings_dir.as_deref(), Some("/data/recordings"));
    }

    #[test]
    fn test_load_app_file_missing_everywhere() {
        let file = load_app_file(&[PathBuf::from("/nonexistent/app.json")]);
        assert!(file.recordings_dir.is_none());
        assert!(file.logs_dir.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let config = AppConfig::with_dirs("/r", "/l", "/c")
            .call_timeout(Duration::from_secs(10))
            .handshake_deadline(Duration::from_secs(1));
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert_eq!(config.handshake_deadline, Duration::from_secs(1));
        assert_eq!(config.spawn_grace, DEFAULT_SPAWN_GRACE);
    }
}
