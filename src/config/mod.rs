//! Configuration module
//!
//! The explicit run configuration handed to the core by the caller.

mod file;

pub use file::{find_config_file, load_units};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::{Granularity, ReportFormat, RunUnit};

/// Run configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum number of units executed concurrently
    pub threads: usize,

    /// Whether units are features or scenarios
    pub granularity: Granularity,

    /// Overall run deadline in seconds
    pub timeout_secs: Option<u64>,

    pub rerun: RerunConfig,

    pub engine: EngineConfig,

    pub report: ReportConfig,

    pub events: EventsConfig,

    /// Log filter directive (e.g. "info", "featurepool=debug")
    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            granularity: Granularity::Feature,
            timeout_secs: None,
            rerun: RerunConfig::default(),
            engine: EngineConfig::default(),
            report: ReportConfig::default(),
            events: EventsConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a YAML or JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML or JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the options on their own
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if self.rerun.enabled && self.rerun.attempts == 0 {
            return Err(ConfigError::ZeroRerunAttempts);
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.engine.command.is_empty() || self.engine.command[0].trim().is_empty() {
            return Err(ConfigError::EmptyEngineCommand);
        }
        if self.report.formats.is_empty() {
            return Err(ConfigError::NoReportFormats);
        }
        Ok(())
    }

    /// Validate the options together with the units they will run
    pub fn validate_units(&self, units: &[RunUnit]) -> Result<(), ConfigError> {
        self.validate()?;

        let mut seen = HashSet::new();
        for unit in units {
            if unit.feature_uri.trim().is_empty() {
                return Err(ConfigError::EmptyFeatureUri(unit.id.clone()));
            }
            if !seen.insert(unit.id.as_str()) {
                return Err(ConfigError::DuplicateUnit(unit.id.clone()));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Number of rerun attempts, 0 when reruns are disabled
    pub fn rerun_attempts(&self) -> u32 {
        if self.rerun.enabled {
            self.rerun.attempts
        } else {
            0
        }
    }

    /// Generate an example configuration
    pub fn example() -> Self {
        Self {
            threads: 8,
            granularity: Granularity::Scenario,
            timeout_secs: Some(1800),
            rerun: RerunConfig {
                enabled: true,
                attempts: 2,
                missing_manifest: MissingManifestPolicy::Fail,
            },
            engine: EngineConfig {
                command: vec![
                    "java".to_string(),
                    "-cp".to_string(),
                    "target/test-classes:target/dependency/*".to_string(),
                    "io.cucumber.core.cli.Main".to_string(),
                ],
                ..EngineConfig::default()
            },
            report: ReportConfig {
                prefix_testcase_names: true,
                csv_summary: true,
                ..ReportConfig::default()
            },
            events: EventsConfig {
                log_sink: true,
                json_lines_file: Some(PathBuf::from("target/featurepool/events.jsonl")),
            },
            log_level: "info".to_string(),
        }
    }
}

/// What to do when a failed feature left no usable rerun manifest
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingManifestPolicy {
    /// Keep the unit failed and report a diagnostic
    #[default]
    Fail,
    /// Rerun the whole unit instead of the failed scenarios
    RetryUnit,
}

/// Rerun settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerunConfig {
    pub enabled: bool,

    /// Maximum rerun attempts per unit
    pub attempts: u32,

    pub missing_manifest: MissingManifestPolicy,
}

impl Default for RerunConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            attempts: 1,
            missing_manifest: MissingManifestPolicy::Fail,
        }
    }
}

/// External BDD engine invocation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Program followed by its fixed leading arguments
    pub command: Vec<String>,

    /// Working directory for the engine process
    pub working_dir: Option<PathBuf>,

    /// Directory receiving per-attempt fragments and rerun manifests
    pub report_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: vec!["cucumber".to_string()],
            working_dir: None,
            report_dir: PathBuf::from("target/featurepool/units"),
        }
    }
}

/// Aggregated report output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: PathBuf,

    pub formats: Vec<ReportFormat>,

    /// Name of the merged JUnit `<testsuite>`
    pub junit_suite_name: String,

    /// Prefix every JUnit testcase name with its unit id
    pub prefix_testcase_names: bool,

    pub execution_log: bool,

    pub rerun_file: bool,

    pub csv_summary: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("target/featurepool"),
            formats: ReportFormat::all(),
            junit_suite_name: "featurepool".to_string(),
            prefix_testcase_names: false,
            execution_log: true,
            rerun_file: true,
            csv_summary: false,
        }
    }
}

/// Built-in event sinks
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Render lifecycle events through the logger
    pub log_sink: bool,

    /// Append every event as a JSON line to this file
    pub json_lines_file: Option<PathBuf>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            log_sink: true,
            json_lines_file: None,
        }
    }
}

/// Check if file is YAML based on extension
pub(crate) fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.threads, 4);
        assert_eq!(config.rerun_attempts(), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let mut config = RunConfig::default();
        config.threads = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroThreads));

        let mut config = RunConfig::default();
        config.rerun.enabled = true;
        config.rerun.attempts = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroRerunAttempts));

        let mut config = RunConfig::default();
        config.engine.command.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptyEngineCommand));

        let mut config = RunConfig::default();
        config.timeout_secs = Some(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn test_validate_units() {
        let config = RunConfig::default();
        let units = vec![
            RunUnit::feature("a", "a.feature"),
            RunUnit::feature("a", "b.feature"),
        ];
        assert_eq!(
            config.validate_units(&units),
            Err(ConfigError::DuplicateUnit("a".to_string()))
        );

        let units = vec![RunUnit::feature("a", " ")];
        assert_eq!(
            config.validate_units(&units),
            Err(ConfigError::EmptyFeatureUri("a".to_string()))
        );
    }

    #[test]
    fn test_save_load_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("featurepool.yaml");

        let config = RunConfig::example();
        config.save(&path).unwrap();

        let loaded = RunConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("featurepool.json");
        std::fs::write(&path, r#"{"threads": 2, "rerun": {"enabled": true}}"#).unwrap();

        let loaded = RunConfig::load(&path).unwrap();
        assert_eq!(loaded.threads, 2);
        assert_eq!(loaded.rerun_attempts(), 1);
        assert_eq!(loaded.report.formats.len(), 3);
    }
}
