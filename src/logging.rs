//! Tracing subscriber setup.
//!
//! Hosts call [`init_tracing`] once at startup. `RUST_LOG` overrides the
//! configured level. With a log file configured, the previous files are
//! rotated first (`toolbridge.log` → `.1` → `.2` …) and every line is
//! flushed as it is written.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::errors::ClientError;

/// Install the global subscriber. Fails, rather than panicking, if one is
/// already installed or the log file cannot be opened.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ClientError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(rust_log.as_deref(), &config.level)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);

    let installed = match &config.file {
        Some(path) => {
            let writer = open_log_file(path, config.keep_files)?;
            let builder = builder.with_writer(writer).with_ansi(false);
            if config.json {
                builder.json().try_init()
            } else {
                builder.try_init()
            }
        }
        None => {
            let builder = builder.with_writer(std::io::stderr);
            if config.json {
                builder.json().try_init()
            } else {
                builder.try_init()
            }
        }
    };
    installed.map_err(|e| ClientError::Config {
        reason: format!("failed to install tracing subscriber: {e}"),
    })?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?config.file,
        pid = std::process::id(),
        "toolbridge logging initialised"
    );
    Ok(())
}

/// A valid `RUST_LOG` wins; otherwise the configured level must parse.
fn build_filter(rust_log: Option<&str>, level: &str) -> Result<EnvFilter, ClientError> {
    if let Some(filter) = rust_log.and_then(|directives| EnvFilter::try_new(directives).ok()) {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| ClientError::Config {
        reason: format!("invalid log level '{level}': {e}"),
    })
}

fn open_log_file(path: &Path, keep: u32) -> Result<FlushingWriter, ClientError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| ClientError::Config {
            reason: format!("failed to create log directory {}: {e}", dir.display()),
        })?;
    }
    rotate_log_file(path, keep);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ClientError::Config {
            reason: format!("failed to open log file {}: {e}", path.display()),
        })?;
    Ok(FlushingWriter::new(file))
}

/// Shift `path` → `path.1` → … → `path.{keep}`, dropping the oldest.
/// Gaps in the chain are skipped. `keep == 0` just truncates history.
fn rotate_log_file(path: &Path, keep: u32) {
    let numbered = |i: u32| format!("{}.{i}", path.display());

    if keep == 0 {
        let _ = std::fs::remove_file(path);
        return;
    }
    let _ = std::fs::remove_file(numbered(keep));
    for i in (1..keep).rev() {
        let _ = std::fs::rename(numbered(i), numbered(i + 1));
    }
    if path.exists() {
        let _ = std::fs::rename(path, numbered(1));
    }
}

/// File writer that flushes after every write, so log lines survive a
/// crash of the host process.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<Mutex<File>>,
}

impl FlushingWriter {
    fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = f.write(buf)?;
        f.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        f.flush()
    }
}

impl<'a> MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap_or_default()
    }

    #[test]
    fn test_rotate_shifts_and_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("toolbridge.log");
        std::fs::write(&log, "current").unwrap();
        std::fs::write(dir.path().join("toolbridge.log.1"), "one").unwrap();
        std::fs::write(dir.path().join("toolbridge.log.2"), "two").unwrap();

        rotate_log_file(&log, 2);

        assert!(!log.exists());
        assert_eq!(read(&dir.path().join("toolbridge.log.1")), "current");
        assert_eq!(read(&dir.path().join("toolbridge.log.2")), "one");
        assert!(!dir.path().join("toolbridge.log.3").exists());
    }

    #[test]
    fn test_rotate_with_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("toolbridge.log");
        std::fs::write(&log, "current").unwrap();

        rotate_log_file(&log, 3);

        assert_eq!(read(&dir.path().join("toolbridge.log.1")), "current");
        assert!(!dir.path().join("toolbridge.log.2").exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/out.log");
        let mut writer = open_log_file(&path, 1).unwrap();
        writer.write_all(b"line one\n").unwrap();
        let mut second = writer.make_writer();
        second.write_all(b"line two\n").unwrap();
        assert_eq!(read(&path), "line one\nline two\n");
    }

    #[test]
    fn test_invalid_level_is_config_error() {
        let err = build_filter(None, "toolbridge=loud").unwrap_err();
        assert!(matches!(err, ClientError::Config { .. }));
        assert!(err.to_string().contains("toolbridge=loud"));
    }

    #[test]
    fn test_rust_log_overrides_configured_level() {
        assert!(build_filter(Some("debug"), "toolbridge=loud").is_ok());
        // An unusable RUST_LOG falls back to the configured level.
        assert!(build_filter(Some("toolbridge=loud"), "info").is_ok());
        assert!(build_filter(Some("toolbridge=loud"), "toolbridge=loud").is_err());
    }
}
