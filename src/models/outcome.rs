//! Outcome models
//!
//! Defines run statuses, report fragments and the terminal outcome of a unit.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::io;
use std::path::PathBuf;

use super::{RunUnit, UnitLocator};

/// Report formats the engine can produce and the aggregator can merge
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Cucumber JSON: a top-level array of feature elements
    Json,
    /// JUnit XML: one `<testsuite>` document
    Junit,
    /// Line-delimited message envelopes (NDJSON)
    Message,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ReportFormat::Json),
            "junit" | "xml" => Some(ReportFormat::Junit),
            "message" | "messages" | "ndjson" => Some(ReportFormat::Message),
            _ => None,
        }
    }

    /// Engine plugin name
    pub fn plugin(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Junit => "junit",
            ReportFormat::Message => "message",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Junit => "xml",
            ReportFormat::Message => "ndjson",
        }
    }

    pub fn all() -> Vec<ReportFormat> {
        vec![ReportFormat::Json, ReportFormat::Junit, ReportFormat::Message]
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.plugin())
    }
}

/// Where a fragment's bytes live
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentSource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// One unit's raw report output in one format
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportFragment {
    pub format: ReportFormat,
    pub source: FragmentSource,
}

impl ReportFragment {
    pub fn file(format: ReportFormat, path: impl Into<PathBuf>) -> Self {
        Self {
            format,
            source: FragmentSource::File(path.into()),
        }
    }

    pub fn bytes(format: ReportFormat, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            format,
            source: FragmentSource::Bytes(bytes.into()),
        }
    }

    /// Read the fragment content
    pub fn read(&self) -> io::Result<Cow<'_, [u8]>> {
        match &self.source {
            FragmentSource::File(path) => std::fs::read(path).map(Cow::Owned),
            FragmentSource::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
        }
    }

    /// Human readable origin, for diagnostics
    pub fn origin(&self) -> String {
        match &self.source {
            FragmentSource::File(path) => path.display().to_string(),
            FragmentSource::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

/// Status of a unit
///
/// `Rerun` is transient: it is only observed while a rerun is in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Passed,
    Failed,
    Rerun,
    PassedAfterRerun,
    FailedAfterRerun,
}

impl RunStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            RunStatus::Passed => "✓",
            RunStatus::Failed => "✗",
            RunStatus::Rerun => "↻",
            RunStatus::PassedAfterRerun => "✓",
            RunStatus::FailedAfterRerun => "✗",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Passed | RunStatus::PassedAfterRerun)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Rerun)
    }

    pub fn was_rerun(&self) -> bool {
        matches!(
            self,
            RunStatus::PassedAfterRerun | RunStatus::FailedAfterRerun
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Passed => write!(f, "PASSED"),
            RunStatus::Failed => write!(f, "FAILED"),
            RunStatus::Rerun => write!(f, "RERUN"),
            RunStatus::PassedAfterRerun => write!(f, "PASSED_AFTER_RERUN"),
            RunStatus::FailedAfterRerun => write!(f, "FAILED_AFTER_RERUN"),
        }
    }
}

/// Terminal result of one run unit
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunOutcome {
    pub unit: RunUnit,
    pub status: RunStatus,

    /// Fragments of the original attempt
    pub fragments: Vec<ReportFragment>,

    /// Fragments of the last rerun attempt, kept apart from the original
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rerun_fragments: Vec<ReportFragment>,

    /// Number of rerun attempts performed
    #[serde(default)]
    pub rerun_attempts: u32,

    /// Locators still failing after the last attempt
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_locators: Vec<UnitLocator>,

    pub duration_ms: u64,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn passed(unit: RunUnit, fragments: Vec<ReportFragment>, duration_ms: u64) -> Self {
        Self {
            unit,
            status: RunStatus::Passed,
            fragments,
            rerun_fragments: Vec::new(),
            rerun_attempts: 0,
            failed_locators: Vec::new(),
            duration_ms,
            error: None,
        }
    }

    pub fn failed(unit: RunUnit, fragments: Vec<ReportFragment>, duration_ms: u64) -> Self {
        Self {
            status: RunStatus::Failed,
            ..Self::passed(unit, fragments, duration_ms)
        }
    }

    /// Failure that produced no report, e.g. the engine could not be launched
    pub fn error(unit: RunUnit, error: impl Into<String>) -> Self {
        Self::failed(unit, Vec::new(), 0).with_error(error)
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Fragments to merge into the aggregated report: the original attempt
    /// followed by the last rerun attempt
    pub fn report_fragments(&self) -> impl Iterator<Item = &ReportFragment> {
        self.fragments.iter().chain(self.rerun_fragments.iter())
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} [{}ms]",
            self.status.symbol(),
            self.unit.id,
            self.status,
            self.duration_ms
        )?;
        if let Some(error) = &self.error {
            write!(f, " - {error}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_success() {
        assert!(RunStatus::Passed.is_success());
        assert!(RunStatus::PassedAfterRerun.is_success());
        assert!(!RunStatus::FailedAfterRerun.is_success());
        assert!(!RunStatus::Rerun.is_terminal());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&RunStatus::PassedAfterRerun).unwrap();
        assert_eq!(json, "\"PASSED_AFTER_RERUN\"");
    }

    #[test]
    fn test_report_fragments_order() {
        let unit = RunUnit::feature("a", "a.feature");
        let mut outcome = RunOutcome::failed(
            unit,
            vec![ReportFragment::bytes(ReportFormat::Json, "[1]")],
            10,
        );
        outcome.rerun_fragments = vec![ReportFragment::bytes(ReportFormat::Json, "[2]")];

        let origins: Vec<_> = outcome.report_fragments().map(|f| f.read().unwrap().to_vec()).collect();
        assert_eq!(origins, vec![b"[1]".to_vec(), b"[2]".to_vec()]);
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!(ReportFormat::from_str("XML"), Some(ReportFormat::Junit));
        assert_eq!(ReportFormat::from_str("ndjson"), Some(ReportFormat::Message));
        assert_eq!(ReportFormat::from_str("html"), None);
    }
}
