//! BDD engine invocation
//!
//! The [`UnitExecutor`] contract between the scheduler and the external
//! execution engine, and the subprocess implementation of it.

mod args;
mod command;
mod manifest;

pub use args::{fragment_path, manifest_path, resolve_args};
pub use command::CommandExecutor;
pub use manifest::{parse_manifest, read_manifest};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ExecutionError;
use crate::models::{ReportFragment, RunUnit, UnitLocator};

/// Everything an executor needs to run one attempt of a unit
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    pub unit: RunUnit,

    /// 0 for the original attempt, 1.. for reruns
    pub attempt: u32,

    /// Locators to execute; the unit's own locator on the original attempt
    pub scope: Vec<UnitLocator>,

    /// Directory for this attempt's fragments and rerun manifest
    pub report_dir: PathBuf,
}

impl ExecutionRequest {
    pub fn original(unit: RunUnit, report_root: &Path) -> Self {
        let scope = vec![unit.locator()];
        Self::attempt(unit, 0, scope, report_root)
    }

    pub fn attempt(
        unit: RunUnit,
        attempt: u32,
        scope: Vec<UnitLocator>,
        report_root: &Path,
    ) -> Self {
        let report_dir = report_root.join(attempt_dir_name(&unit.id, attempt));
        Self {
            unit,
            attempt,
            scope,
            report_dir,
        }
    }

    pub fn is_rerun(&self) -> bool {
        self.attempt > 0
    }
}

/// What the engine produced for one attempt
#[derive(Clone, Debug, Default)]
pub struct ExecutionResult {
    pub passed: bool,

    pub exit_code: Option<i32>,

    pub fragments: Vec<ReportFragment>,

    /// Rerun manifest listing the failed sub-elements, if one was written
    pub rerun_manifest: Option<PathBuf>,
}

impl ExecutionResult {
    pub fn passed(fragments: Vec<ReportFragment>) -> Self {
        Self {
            passed: true,
            exit_code: Some(0),
            fragments,
            rerun_manifest: None,
        }
    }

    pub fn failed(fragments: Vec<ReportFragment>) -> Self {
        Self {
            passed: false,
            exit_code: Some(1),
            fragments,
            rerun_manifest: None,
        }
    }

    pub fn with_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.rerun_manifest = Some(path.into());
        self
    }
}

/// Runs one attempt of a unit against the external engine
///
/// Implementations block until the attempt finishes. A test failure is an
/// `Ok` result with `passed == false`; `Err` is reserved for failures to run
/// the engine at all.
pub trait UnitExecutor: Send + Sync {
    fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationFlag,
    ) -> Result<ExecutionResult, ExecutionError>;
}

/// Shared flag telling in-flight executions to stop
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Directory name for one attempt, safe for any unit id
///
/// Every byte outside `[A-Za-z0-9-]` is escaped as `_XX`, so distinct ids
/// never share a directory.
fn attempt_dir_name(unit_id: &str, attempt: u32) -> String {
    let mut name = String::with_capacity(unit_id.len() + 4);
    for byte in unit_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("_{byte:02X}"));
        }
    }
    format!("{name}-{attempt}")
}
