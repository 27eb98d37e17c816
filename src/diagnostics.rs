use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::errors::AppResult;

/// Structured record of what a run dropped, kept in memory and optionally
/// appended to a JSON-lines file.
#[derive(Clone, Default)]
pub struct DiagnosticsLog {
    events: Arc<Mutex<Vec<DiagnosticEvent>>>,
    flushed: Arc<Mutex<usize>>,
    sink_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEvent {
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl DiagnosticsLog {
    pub fn new(sink_path: Option<PathBuf>) -> Self {
        Self {
            sink_path,
            ..Self::default()
        }
    }

    pub fn record(&self, kind: impl Into<String>, payload: serde_json::Value) {
        self.events.lock().push(DiagnosticEvent {
            kind: kind.into(),
            timestamp: Utc::now(),
            payload,
        });
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().clone()
    }

    pub fn sink_path(&self) -> Option<&Path> {
        self.sink_path.as_deref()
    }

    /// Appends events recorded since the last successful flush.
    pub fn flush(&self) -> AppResult<()> {
        let Some(path) = &self.sink_path else {
            return Ok(());
        };

        let events = self.events.lock();
        let mut flushed = self.flushed.lock();
        if *flushed >= events.len() {
            return Ok(());
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut encoded = Vec::new();
        for event in &events[*flushed..] {
            serde_json::to_writer(&mut encoded, event)?;
            encoded.push(b'\n');
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&encoded)?;
        file.flush()?;
        *flushed = events.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn keeps_events_in_memory_without_sink() {
        let log = DiagnosticsLog::new(None);
        log.record("row_skipped", json!({ "name": "A" }));
        log.flush().unwrap();
        let events = log.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "row_skipped");
        assert!(log.sink_path().is_none());
    }

    #[test]
    fn appends_each_event_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/diagnostics.jsonl");
        let log = DiagnosticsLog::new(Some(path.clone()));

        log.record("row_skipped", json!({ "name": "first" }));
        log.flush().unwrap();
        log.record("run_completed", json!({ "resolved": 3 }));
        log.flush().unwrap();
        log.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines = contents.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("first"));
        assert!(lines[1].contains("run_completed"));
    }

    #[test]
    fn keeps_file_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("diagnostics.jsonl");
        {
            let log = DiagnosticsLog::new(Some(path.clone()));
            log.record("first", json!({}));
            log.flush().unwrap();
        }
        let log = DiagnosticsLog::new(Some(path.clone()));
        log.record("second", json!({}));
        log.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("first"));
        assert!(contents.contains("second"));
    }

    #[test]
    fn reports_unwritable_sink_and_retries_later() {
        let dir = tempdir().unwrap();
        let log = DiagnosticsLog::new(Some(dir.path().to_path_buf()));
        log.record("row_skipped", json!({}));
        assert!(log.flush().is_err());
        assert_eq!(log.events().len(), 1);
    }
}
