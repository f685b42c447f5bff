//! Engine argument resolution
//!
//! Turns a request into the engine's command-line flags, cucumber style.

use std::path::{Path, PathBuf};

use super::ExecutionRequest;
use crate::models::ReportFormat;

const MANIFEST_FILE: &str = "rerun.txt";

/// Path the engine writes a fragment of `format` to for one attempt
pub fn fragment_path(report_dir: &Path, format: ReportFormat) -> PathBuf {
    report_dir.join(format!("report.{}", format.extension()))
}

/// Path the engine writes the rerun manifest to for one attempt
pub fn manifest_path(report_dir: &Path) -> PathBuf {
    report_dir.join(MANIFEST_FILE)
}

/// Resolve the full argument set for one attempt
///
/// `formats` is the run-level format list; a unit's own `plugins` take
/// precedence when non-empty.
pub fn resolve_args(request: &ExecutionRequest, formats: &[ReportFormat]) -> Vec<String> {
    let options = &request.unit.options;
    let mut args = Vec::new();

    for glue in &options.glue {
        args.push("--glue".to_string());
        args.push(glue.clone());
    }
    for tag in &options.tags {
        args.push("--tags".to_string());
        args.push(tag.clone());
    }

    for format in requested_formats(request, formats) {
        args.push("--plugin".to_string());
        args.push(format!(
            "{}:{}",
            format.plugin(),
            fragment_path(&request.report_dir, format).display()
        ));
    }
    args.push("--plugin".to_string());
    args.push(format!("rerun:{}", manifest_path(&request.report_dir).display()));

    args.extend(options.extra_args.iter().cloned());
    args.extend(request.scope.iter().map(|locator| locator.to_string()));

    args
}

/// Formats requested for one attempt, deduplicated, in stable order
pub(crate) fn requested_formats(
    request: &ExecutionRequest,
    formats: &[ReportFormat],
) -> Vec<ReportFormat> {
    let mut requested = if request.unit.options.plugins.is_empty() {
        formats.to_vec()
    } else {
        request.unit.options.plugins.clone()
    };
    requested.sort();
    requested.dedup();
    requested
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RunOptions, RunUnit, UnitLocator};

    #[test]
    fn test_resolve_args() {
        let unit = RunUnit::feature("login", "features/login.feature").with_options(RunOptions {
            tags: vec!["@smoke".to_string()],
            glue: vec!["steps".to_string()],
            plugins: Vec::new(),
            extra_args: vec!["--strict".to_string()],
        });
        let request = ExecutionRequest::attempt(
            unit,
            1,
            vec![UnitLocator::new("features/login.feature", vec![5, 12])],
            Path::new("out"),
        );

        let args = resolve_args(&request, &[ReportFormat::Json]);
        assert_eq!(
            args,
            vec![
                "--glue",
                "steps",
                "--tags",
                "@smoke",
                "--plugin",
                "json:out/login-1/report.json",
                "--plugin",
                "rerun:out/login-1/rerun.txt",
                "--strict",
                "features/login.feature:5:12",
            ]
        );
    }

    #[test]
    fn test_unit_plugins_override() {
        let unit = RunUnit::feature("a", "a.feature").with_options(RunOptions {
            plugins: vec![ReportFormat::Message, ReportFormat::Junit, ReportFormat::Message],
            ..RunOptions::default()
        });
        let request = ExecutionRequest::original(unit, Path::new("out"));

        assert_eq!(
            requested_formats(&request, &ReportFormat::all()),
            vec![ReportFormat::Junit, ReportFormat::Message]
        );
    }
}
