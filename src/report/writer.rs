//! Run artifacts
//!
//! Writes the merged reports, the execution log footer, the consolidated
//! rerun file and the optional CSV outcome table.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::ReportAggregator;
use crate::context::RunContext;
use crate::executor::ExecutionLog;
use crate::models::{ReportFormat, RunOutcome};
use crate::stats::RunStatistics;

pub const EXECUTION_LOG_FILE: &str = "execution.log";
pub const RERUN_FILE: &str = "rerun.txt";
pub const CSV_FILE: &str = "outcomes.csv";

/// Files produced at the end of a run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactSet {
    pub reports: Vec<PathBuf>,
    pub execution_log: Option<PathBuf>,
    pub rerun_file: Option<PathBuf>,
    pub csv: Option<PathBuf>,
}

impl ArtifactSet {
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.reports
            .iter()
            .chain(self.execution_log.iter())
            .chain(self.rerun_file.iter())
            .chain(self.csv.iter())
    }
}

/// Writes every artifact of a run under the configured output directory
pub struct ReportWriter {
    output_dir: PathBuf,
    formats: Vec<ReportFormat>,
    execution_log: bool,
    rerun_file: bool,
    csv_summary: bool,
    aggregator: ReportAggregator,
}

impl ReportWriter {
    pub fn new(context: &RunContext) -> Self {
        let report = &context.config().report;
        Self {
            output_dir: report.output_dir.clone(),
            formats: report.formats.clone(),
            execution_log: report.execution_log,
            rerun_file: report.rerun_file,
            csv_summary: report.csv_summary,
            aggregator: ReportAggregator::new(context),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the merged report in `format`
    pub fn report_path(&self, format: ReportFormat) -> PathBuf {
        self.output_dir
            .join(format!("cucumber-report.{}", format.extension()))
    }

    /// Path the execution log is streamed to while the run is in progress
    pub fn execution_log_path(&self) -> Option<PathBuf> {
        self.execution_log
            .then(|| self.output_dir.join(EXECUTION_LOG_FILE))
    }

    /// Write every configured artifact
    pub fn write_all(
        &self,
        outcomes: &[RunOutcome],
        statistics: &RunStatistics,
        log: &ExecutionLog,
    ) -> Result<ArtifactSet> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!(
                "Failed to create output directory: {}",
                self.output_dir.display()
            )
        })?;

        let mut artifacts = ArtifactSet::default();
        for format in &self.formats {
            artifacts.reports.push(self.write_report(outcomes, *format)?);
        }

        if let Some(path) = self.execution_log_path() {
            write_log_footer(log, outcomes, statistics);
            artifacts.execution_log = Some(path);
        }

        if self.rerun_file {
            artifacts.rerun_file = Some(self.write_rerun_file(outcomes)?);
        }

        if self.csv_summary {
            artifacts.csv = Some(self.write_csv(outcomes)?);
        }

        Ok(artifacts)
    }

    fn write_report(&self, outcomes: &[RunOutcome], format: ReportFormat) -> Result<PathBuf> {
        let report = self.aggregator.merge_outcomes(outcomes, format);
        if report.dropped > 0 {
            warn!(
                "{} {} fragment(s) could not be merged",
                report.dropped, format
            );
        }

        let path = self.report_path(format);
        fs::write(&path, &report.content)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        info!(
            "Wrote {} report with {} fragment(s) to {}",
            format,
            report.merged,
            path.display()
        );
        Ok(path)
    }

    /// One locator per unit that is still failing; empty when all passed
    fn write_rerun_file(&self, outcomes: &[RunOutcome]) -> Result<PathBuf> {
        let content: String = outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| format!("{}\n", o.unit.locator()))
            .collect();

        let path = self.output_dir.join(RERUN_FILE);
        fs::write(&path, content)
            .with_context(|| format!("Failed to write rerun file: {}", path.display()))?;
        Ok(path)
    }

    fn write_csv(&self, outcomes: &[RunOutcome]) -> Result<PathBuf> {
        let path = self.output_dir.join(CSV_FILE);
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;

        writer.write_record([
            "unit",
            "feature",
            "scenario_line",
            "status",
            "rerun_attempts",
            "duration_ms",
            "error",
        ])?;
        for outcome in outcomes {
            writer.write_record([
                outcome.unit.id.clone(),
                outcome.unit.feature_uri.clone(),
                outcome
                    .unit
                    .scenario_line
                    .map(|l| l.to_string())
                    .unwrap_or_default(),
                outcome.status.to_string(),
                outcome.rerun_attempts.to_string(),
                outcome.duration_ms.to_string(),
                outcome.error.clone().unwrap_or_default(),
            ])?;
        }
        writer.flush()?;

        Ok(path)
    }
}

/// Summary appended to the execution log once every unit is terminal
fn write_log_footer(log: &ExecutionLog, outcomes: &[RunOutcome], statistics: &RunStatistics) {
    log.append("----");
    for outcome in outcomes {
        log.append(format!("{}: {}", outcome.unit.id, outcome.status));
    }
    log.append(format!("Elapsed: {}ms", statistics.duration_ms));
    log.append(statistics.to_string());

    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.is_success())
        .map(|o| o.unit.id.as_str())
        .collect();
    if failed.is_empty() {
        log.append("Failed units: none");
    } else {
        log.append(format!("Failed units: {}", failed.join(", ")));
    }
}
