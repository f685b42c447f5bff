//! Subprocess executor
//!
//! Runs the configured engine command once per attempt.

use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use super::args::{fragment_path, manifest_path, requested_formats, resolve_args};
use super::{CancellationFlag, ExecutionRequest, ExecutionResult, UnitExecutor};
use crate::config::EngineConfig;
use crate::error::ExecutionError;
use crate::models::{ReportFormat, ReportFragment};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Executor that launches the engine as a child process
#[derive(Clone, Debug)]
pub struct CommandExecutor {
    program: String,
    base_args: Vec<String>,
    working_dir: Option<PathBuf>,
    formats: Vec<ReportFormat>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            working_dir: None,
            formats: ReportFormat::all(),
        }
    }

    /// Build from the engine section of the run configuration
    pub fn from_config(config: &EngineConfig, formats: &[ReportFormat]) -> Self {
        let mut command = config.command.iter();
        let program = command.next().cloned().unwrap_or_default();

        Self {
            program,
            base_args: command.cloned().collect(),
            working_dir: config.working_dir.clone(),
            formats: formats.to_vec(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.base_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_formats(mut self, formats: Vec<ReportFormat>) -> Self {
        self.formats = formats;
        self
    }

    fn build_command(&self, request: &ExecutionRequest) -> Result<Command, ExecutionError> {
        fs::create_dir_all(&request.report_dir)?;
        let stdout = File::create(request.report_dir.join("stdout.log"))?;
        let stderr = File::create(request.report_dir.join("stderr.log"))?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.base_args)
            .args(resolve_args(request, &self.formats))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        Ok(command)
    }

    fn collect_fragments(&self, request: &ExecutionRequest) -> Vec<ReportFragment> {
        requested_formats(request, &self.formats)
            .into_iter()
            .filter_map(|format| {
                let path = fragment_path(&request.report_dir, format);
                if path.is_file() {
                    Some(ReportFragment::file(format, path))
                } else {
                    warn!(
                        "Engine produced no {} report for {} (attempt {})",
                        format, request.unit.id, request.attempt
                    );
                    None
                }
            })
            .collect()
    }
}

impl UnitExecutor for CommandExecutor {
    fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationFlag,
    ) -> Result<ExecutionResult, ExecutionError> {
        let mut command = self.build_command(request)?;
        debug!("Launching {:?} for {}", command, request.unit.id);

        let mut child = command.spawn().map_err(|source| ExecutionError::Launch {
            program: self.program.clone(),
            source,
        })?;

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if cancel.is_cancelled() {
                warn!("Killing engine for {}", request.unit.id);
                // The child may exit between try_wait and kill
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExecutionError::Cancelled);
            }
            thread::sleep(POLL_INTERVAL);
        };

        let manifest = manifest_path(&request.report_dir);
        Ok(ExecutionResult {
            passed: status.success(),
            exit_code: status.code(),
            fragments: self.collect_fragments(request),
            rerun_manifest: manifest.is_file().then_some(manifest),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunUnit;
    use tempfile::tempdir;

    #[test]
    fn test_from_config() {
        let config = EngineConfig {
            command: vec!["java".to_string(), "-jar".to_string(), "engine.jar".to_string()],
            ..EngineConfig::default()
        };
        let executor = CommandExecutor::from_config(&config, &[ReportFormat::Json]);
        assert_eq!(executor.program, "java");
        assert_eq!(executor.base_args, vec!["-jar", "engine.jar"]);
        assert_eq!(executor.formats, vec![ReportFormat::Json]);
    }

    #[test]
    fn test_launch_failure() {
        let dir = tempdir().unwrap();
        let executor = CommandExecutor::new("definitely-not-a-real-engine-binary");
        let request = ExecutionRequest::original(RunUnit::feature("a", "a.feature"), dir.path());

        let result = executor.execute(&request, &CancellationFlag::new());
        assert!(matches!(result, Err(ExecutionError::Launch { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_and_fragments() {
        let dir = tempdir().unwrap();
        let unit = RunUnit::feature("a", "a.feature");
        let request = ExecutionRequest::original(unit, dir.path());

        // The script ignores the engine flags and writes a JSON fragment
        let json = fragment_path(&request.report_dir, ReportFormat::Json);
        let script = format!("echo '[{{}}]' > {}; exit 3", json.display());
        let executor = CommandExecutor::new("sh")
            .with_args(["-c", script.as_str(), "engine"])
            .with_formats(vec![ReportFormat::Json]);

        let result = executor.execute(&request, &CancellationFlag::new()).unwrap();
        assert!(!result.passed);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.fragments, vec![ReportFragment::file(ReportFormat::Json, json)]);
        assert!(result.rerun_manifest.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_cancelled_child_is_killed() {
        let dir = tempdir().unwrap();
        let request = ExecutionRequest::original(RunUnit::feature("a", "a.feature"), dir.path());
        let executor = CommandExecutor::new("sh").with_args(["-c", "sleep 30", "engine"]);

        let cancel = CancellationFlag::new();
        cancel.cancel();
        let result = executor.execute(&request, &cancel);
        assert!(matches!(result, Err(ExecutionError::Cancelled)));
    }
}
