//! Built-in event sinks

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use super::{Event, EventKind, Sink};
use crate::error::SinkError;

/// Renders events through the logger
#[derive(Debug, Default)]
pub struct LogSink;

impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn send(&self, event: &Event) -> Result<(), SinkError> {
        match (&event.kind, &event.outcome, &event.statistics) {
            (EventKind::RunStarted, _, _) => info!("Run {} started", event.session_id),
            (EventKind::RunFinished, _, _) => info!("Run {} finished", event.session_id),
            (EventKind::RunSummary, _, Some(stats)) => info!("Run summary: {}", stats),
            (EventKind::UnitFailed, Some(outcome), _) => warn!("{}", outcome),
            (EventKind::UnitRerun, Some(outcome), _) => {
                info!("Rerunning {} ({})", outcome.unit.id, outcome.unit.locator())
            }
            (_, Some(outcome), _) => info!("{}", outcome),
            (kind, None, _) => info!("{}", kind),
        }
        Ok(())
    }
}

/// Appends every event as one JSON line to a file
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Create (or truncate) the target file
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
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
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for JsonLinesSink {
    fn name(&self) -> &str {
        "json-lines"
    }

    fn send(&self, event: &Event) -> Result<(), SinkError> {
        let line = serde_json::to_string(event)?;
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}
