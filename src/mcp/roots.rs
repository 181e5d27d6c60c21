//! Session-to-directory binding for the roots capability.
//!
//! Computes which directory a provider (notably the filesystem
//! provider) is allowed to access, derived from an external recording
//! session id. The binding is renegotiated only at handshake time —
//! re-pointing an active provider at a different session means
//! restarting it.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::errors::McpError;

/// Resolves recording session ids to allowed directories.
#[derive(Debug, Clone)]
pub struct SessionRootsBinder {
    recordings_dir: PathBuf,
}

impl SessionRootsBinder {
    pub fn new(recordings_dir: impl Into<PathBuf>) -> Self {
        Self {
            recordings_dir: recordings_dir.into(),
        }
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    /// Resolve the allowed directory for a session.
    ///
    /// With an explicit id the directory is `<recordings>/<id>`. With
    /// none, the most recently modified session subdirectory wins
    /// (ties broken by name, descending, so the outcome is
    /// deterministic); an empty recordings root resolves to the root
    /// itself. The returned directory always exists on disk.
    pub fn resolve(&self, session_id: Option<&str>) -> Result<PathBuf, McpError> {
        let target = match session_id {
            Some(id) => self.recordings_dir.join(id),
            None => match self.latest_session() {
                Some(latest) => {
                    tracing::info!(
                        session = %latest,
                        "no session id provided; defaulting to latest session"
                    );
                    self.recordings_dir.join(latest)
                }
                None => self.recordings_dir.clone(),
            },
        };

        std::fs::create_dir_all(&target).map_err(|e| McpError::ConfigError {
            reason: format!("failed to create session directory {}: {e}", target.display()),
        })?;
        Ok(target)
    }

    /// Name of the most recently modified immediate subdirectory of the
    /// recordings root, if any.
    fn latest_session(&self) -> Option<String> {
        let entries = std::fs::read_dir(&self.recordings_dir).ok()?;

        let mut candidates: Vec<(String, SystemTime)> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_string();
                let mtime = e.metadata().ok()?.modified().ok()?;
                Some((name, mtime))
            })
            .collect();

        if candidates.is_empty() {
            return None;
        }

        // mtime descending, then name descending for equal mtimes
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        Some(candidates.remove(0).0)
    }
}

// ─── Roots Payload ───────────────────────────────────────────────────────────

/// File URI for a local directory, `file://` scheme.
pub fn file_uri(path: &Path) -> String {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", canonical.display())
}

/// Build the `roots` payload for a roots/list reply from a local path.
pub fn build_roots(path: &Path) -> serde_json::Value {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("root")
        .to_string();
    serde_json::json!([{ "uri": file_uri(path), "name": name }])
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_explicit_session_creates_dir() {
        let tmp = TempDir::new().unwrap();
        let binder = SessionRootsBinder::new(tmp.path());

        let dir = binder.resolve(Some("S1")).unwrap();
        assert_eq!(dir, tmp.path().join("S1"));
        assert!(dir.is_dir());
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let binder = SessionRootsBinder::new(tmp.path());

        let first = binder.resolve(Some("S")).unwrap();
        let second = binder.resolve(Some("S")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_none_with_empty_root() {
        let tmp = TempDir::new().unwrap();
        let binder = SessionRootsBinder::new(tmp.path());

        let dir = binder.resolve(None).unwrap();
        assert_eq!(dir, tmp.path());
    }

    #[test]
    fn test_resolve_none_picks_latest_by_mtime() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("A")).unwrap();
        // Ensure B's mtime is strictly newer
        std::thread::sleep(std::time::Duration::from_millis(50));
        std::fs::create_dir(tmp.path().join("B")).unwrap();

        let binder = SessionRootsBinder::new(tmp.path());
        let dir = binder.resolve(None).unwrap();
        assert_eq!(dir, tmp.path().join("B"));
    }

    #[test]
    fn test_resolve_none_ignores_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("session")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        std::fs::write(tmp.path().join("stray.json"), "{}").unwrap();

        let binder = SessionRootsBinder::new(tmp.path());
        let dir = binder.resolve(None).unwrap();
        assert_eq!(dir, tmp.path().join("session"));
    }

    #[test]
    fn test_resolve_creates_missing_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("recordings");
        let binder = SessionRootsBinder::new(&root);

        let dir = binder.resolve(None).unwrap();
        assert_eq!(dir, root);
        assert!(root.is_dir());
    }

    #[test]
    fn test_file_uri_shape() {
        let tmp = TempDir::new().unwrap();
        let uri = file_uri(tmp.path());
        assert!(uri.starts_with("file:///"), "uri: {uri}");
    }

    #[test]
    fn test_build_roots_payload() {
        let tmp = TempDir::new().unwrap();
        let session = tmp.path().join("S1");
        std::fs::create_dir(&session).unwrap();

        let roots = build_roots(&session);
        assert_eq!(roots[0]["name"], "S1");
        let uri = roots[0]["uri"].as_str().unwrap();
        assert!(uri.starts_with("file://"));
        assert!(uri.ends_with("/S1"), "uri: {uri}");
    }
}
