//! Execution log
//!
//! Append-only, one line per attempt. Workers write concurrently; each entry
//! is written and flushed under a single lock so lines never interleave.

use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::models::RunStatus;

#[derive(Debug, Default)]
struct LogState {
    lines: Vec<String>,
    file: Option<File>,
}

/// Shared execution log
#[derive(Debug, Default)]
pub struct ExecutionLog {
    state: Mutex<LogState>,
}

impl ExecutionLog {
    /// In-memory log
    pub fn new() -> Self {
        Self::default()
    }

    /// Log that also appends every entry to `path`
    pub fn to_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            state: Mutex::new(LogState {
                lines: Vec::new(),
                file: Some(file),
            }),
        })
    }

    /// Record one attempt of a unit
    pub fn record(&self, worker: usize, unit_id: &str, attempt: u32, status: RunStatus) {
        let line = format!(
            "{} [worker-{}] {} attempt {}: {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            worker,
            unit_id,
            attempt,
            status
        );
        self.append(line);
    }

    /// Record a unit that never got a worker
    pub fn record_unstarted(&self, unit_id: &str, reason: &str) {
        let line = format!(
            "{} [scheduler] {} not run: {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            unit_id,
            reason
        );
        self.append(line);
    }

    /// Append a free-form line
    pub fn append(&self, line: impl Into<String>) {
        let line = line.into();
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(file) = state.file.as_mut() {
            if let Err(e) = writeln!(file, "{line}").and_then(|()| file.flush()) {
                tracing::warn!("Failed to write execution log: {}", e);
            }
        }
        state.lines.push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .lines
            .clone()
    }
}
