//! Structured logging: `tracing` for the live operator view, plus a
//! per-day JSON-lines audit trail for durable, machine-readable history.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// Respects `RUST_LOG` via [`EnvFilter`]; defaults to `info` when unset.
/// Emits newline-delimited JSON so the live stream and the audit files share
/// a format.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init();
}

/// Severity of a [`StructuredLogger`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// Appends one JSON object per call to `<log_dir>/<component>-<date>.jsonl`,
/// rotating to a new file when the UTC date changes.
///
/// A write failure degrades to a `tracing::warn!` and is never propagated --
/// logging must not be able to fail the operation it is observing.
pub struct StructuredLogger {
    log_dir: PathBuf,
    component: String,
    state: Mutex<Option<(String, std::fs::File)>>,
}

impl StructuredLogger {
    pub fn new(log_dir: impl Into<PathBuf>, component: impl Into<String>) -> Self {
        Self {
            log_dir: log_dir.into(),
            component: component.into(),
            state: Mutex::new(None),
        }
    }

    fn path_for(log_dir: &Path, component: &str, date: &str) -> PathBuf {
        log_dir.join(format!("{component}-{date}.jsonl"))
    }

    /// Append a structured entry. Never panics or returns an error to the
    /// caller; failures are logged via `tracing::warn!` and swallowed.
    pub fn log(&self, level: Level, message: &str, context: serde_json::Value) {
        let now = Utc::now();
        let date = now.format("%Y-%m-%d").to_string();
        let record = json!({
            "timestamp": now.to_rfc3339(),
            "level": level,
            "component": self.component,
            "message": message,
            "context": context,
        });

        let mut state = self.state.lock().expect("logger mutex poisoned");
        let needs_new_file = match state.as_ref() {
            Some((current_date, _)) => current_date != &date,
            None => true,
        };

        if needs_new_file {
            if let Err(e) = std::fs::create_dir_all(&self.log_dir) {
                tracing::warn!(error = %e, "failed to create log directory");
                return;
            }
            let path = Self::path_for(&self.log_dir, &self.component, &date);
            match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => *state = Some((date.clone(), file)),
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "failed to open audit log file");
                    return;
                }
            }
        }

        if let Some((_, file)) = state.as_mut() {
            if let Err(e) = writeln!(file, "{record}") {
                tracing::warn!(error = %e, "failed to write audit log entry");
            }
        }
    }

    pub fn info(&self, message: &str, context: serde_json::Value) {
        self.log(Level::Info, message, context);
    }

    pub fn warn(&self, message: &str, context: serde_json::Value) {
        self.log(Level::Warn, message, context);
    }

    pub fn error(&self, message: &str, context: serde_json::Value) {
        self.log(Level::Error, message, context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_one_line_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let logger = StructuredLogger::new(dir.path(), "worker");
        logger.info("claimed task", json!({"repo": "acme/widgets", "issue": 7}));
        logger.warn("retrying", json!({"attempt": 2}));

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let path = dir.path().join(format!("worker-{date}.jsonl"));
        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["message"], "claimed task");
        assert_eq!(first["level"], "info");
        assert_eq!(first["context"]["issue"], 7);
    }

    #[test]
    fn creates_log_dir_if_absent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("logs");
        let logger = StructuredLogger::new(&nested, "monitor");
        logger.error("boom", json!({}));
        assert!(nested.exists());
    }
}
