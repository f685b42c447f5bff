//! Console formatters for run results
//!
//! Provides table, JSON and one-line summary renderings of a run report.

use std::fmt::Write;

use crate::executor::RunReport;
use crate::models::{RunOutcome, RunStatus};
use crate::stats::RunStatistics;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Format a single unit outcome
    pub fn format_outcome(&self, outcome: &RunOutcome) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(outcome).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(outcome).unwrap_or_default(),
            OutputFormat::Table => self.format_outcome_row(outcome),
            OutputFormat::Summary => format!(
                "{} {} ({}ms)",
                outcome.status.symbol(),
                outcome.unit.id,
                outcome.duration_ms
            ),
        }
    }

    fn format_outcome_row(&self, outcome: &RunOutcome) -> String {
        let status = self.paint_status(outcome.status);
        let reruns = if outcome.rerun_attempts > 0 {
            format!(" (reruns: {})", outcome.rerun_attempts)
        } else {
            String::new()
        };
        format!(
            "{:30} {} [{:>7}ms]{}",
            outcome.unit.id, status, outcome.duration_ms, reruns
        )
    }

    fn paint_status(&self, status: RunStatus) -> String {
        let label = format!("{} {}", status.symbol(), status);
        if !self.colorize {
            return label;
        }
        match status {
            RunStatus::Passed => format!("\x1b[32m{label}\x1b[0m"),
            RunStatus::PassedAfterRerun | RunStatus::Rerun => format!("\x1b[33m{label}\x1b[0m"),
            RunStatus::Failed | RunStatus::FailedAfterRerun => format!("\x1b[31m{label}\x1b[0m"),
        }
    }

    /// Format the complete run report
    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(report).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Table => self.format_report_table(report),
            OutputFormat::Summary => {
                let mut output = self.format_statistics_brief(&report.statistics);
                output.push('\n');
                output.push_str(&self.format_failures(&report.failed_units()));
                output
            }
        }
    }

    fn format_report_table(&self, report: &RunReport) -> String {
        let mut output = String::new();
        let stats = &report.statistics;

        let _ = writeln!(output, "\n{:=^70}", format!(" Run {} ", report.session_id));
        for outcome in &report.outcomes {
            let _ = writeln!(output, "  {}", self.format_outcome_row(outcome));
        }
        let _ = writeln!(output, "{:-^70}", "");

        let failed = if self.colorize && stats.failed > 0 {
            format!("\x1b[31m{}\x1b[0m", stats.failed)
        } else {
            stats.failed.to_string()
        };
        let _ = writeln!(
            output,
            "  Total: {} | Passed: {} | Failed: {} | Rerun: {} | Passed after rerun: {}",
            stats.total, stats.passed, failed, stats.rerun, stats.passed_after_rerun
        );
        let _ = writeln!(
            output,
            "  Pass Rate: {:5.1}% | Duration: {}ms",
            stats.pass_rate(),
            stats.duration_ms
        );

        let artifacts: Vec<_> = report.artifacts.paths().collect();
        if !artifacts.is_empty() {
            let _ = writeln!(output, "{:-^70}", " Artifacts ");
            for path in artifacts {
                let _ = writeln!(output, "  {}", path.display());
            }
        }
        let _ = writeln!(output, "{:=^70}", "");
        output.push_str(&self.format_failures(&report.failed_units()));

        output
    }

    fn format_statistics_brief(&self, stats: &RunStatistics) -> String {
        format!(
            "{}/{} passed ({:.1}%), {} rerun, {} passed after rerun, in {}ms",
            stats.passed,
            stats.total,
            stats.pass_rate(),
            stats.rerun,
            stats.passed_after_rerun,
            stats.duration_ms
        )
    }

    /// Combined list of the units that did not pass
    pub fn format_failures(&self, failed: &[&RunOutcome]) -> String {
        if failed.is_empty() {
            return String::new();
        }

        let mut output = format!("Failed units ({}):\n", failed.len());
        for outcome in failed {
            let _ = write!(output, "  - {} [{}]", outcome.unit.id, outcome.unit.locator());
            if let Some(error) = &outcome.error {
                let _ = write!(output, ": {error}");
            }
            output.push('\n');
        }
        output
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunUnit;
    use crate::report::ArtifactSet;
    use std::time::Duration;

    fn report() -> RunReport {
        let mut failed = RunOutcome::failed(RunUnit::scenario("cart", "cart.feature", 9), Vec::new(), 30)
            .with_error("engine exited with status 1");
        failed.status = RunStatus::FailedAfterRerun;
        failed.rerun_attempts = 1;
        let outcomes = vec![
            failed,
            RunOutcome::passed(RunUnit::feature("login", "login.feature"), Vec::new(), 12),
        ];
        let statistics = RunStatistics::from_outcomes(&outcomes, Duration::from_millis(50));
        RunReport {
            session_id: "20240101_000000_0001".to_string(),
            outcomes,
            statistics,
            artifacts: ArtifactSet::default(),
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("csv"), None);
    }

    #[test]
    fn test_table_lists_failures() {
        let output = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_report(&report());

        assert!(output.contains("✗ FAILED_AFTER_RERUN"));
        assert!(output.contains("(reruns: 1)"));
        assert!(output.contains("Failed units (1):"));
        assert!(output.contains("- cart [cart.feature:9]: engine exited with status 1"));
        assert!(!output.contains("\x1b["));
    }

    #[test]
    fn test_json_report() {
        let output = ResultFormatter::new(OutputFormat::Json).format_report(&report());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["statistics"]["failed"], 1);
        assert_eq!(value["outcomes"][0]["status"], "FAILED_AFTER_RERUN");
    }

    #[test]
    fn test_no_failures_no_list() {
        let formatter = ResultFormatter::default();
        assert!(formatter.format_failures(&[]).is_empty());
    }
}
