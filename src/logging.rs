//! Tracing setup — structured logs to a rotating file.

use std::path::Path;

use anyhow::Context;

use crate::config::AppConfig;

/// Log files kept after rotation (`backend.log.1` … `.3`).
const KEEP_ROTATED: u32 = 3;

/// Initialize the tracing subscriber — writes structured logs to the
/// configured logs directory.
///
/// On each startup:
/// 1. Rotates existing logs (backend.log → backend.log.1 → .2 → .3).
/// 2. Opens a fresh backend.log with a line-flushing writer for crash
///    resilience.
/// 3. Logs a startup banner with the resolved directories.
pub fn init_tracing(config: &AppConfig) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(&config.logs_dir)
        .with_context(|| format!("creating logs dir {}", config.logs_dir.display()))?;

    let log_path = config.logs_dir.join("backend.log");
    rotate_log_file(&log_path, KEEP_ROTATED);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;

    let flushing_writer = FlushingWriter::new(log_file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("screen2action=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(flushing_writer)
        .with_ansi(false)
        .with_target(true)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        recordings_dir = %config.recordings_dir.display(),
        log_file = %log_path.display(),
        "=== Screen2Action backend starting ==="
    );

    Ok(())
}

/// Rotate log files: `backend.log` → `.1` → `.2` → … → `.{keep}`.
///
/// The oldest file beyond `keep` is deleted. Missing files in the chain
/// are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that flushes after every write.
///
/// `tracing-subscriber` buffers internally; without the per-line flush,
/// entries can sit in OS buffers and vanish on a crash — exactly the
/// moment the log matters.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
