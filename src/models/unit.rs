//! Run unit models
//!
//! A run unit is one schedulable test: a whole feature file, or a single
//! scenario inside it, together with the options the engine runs it with.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ReportFormat;

/// Whether units are whole features or individual scenarios
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Feature,
    Scenario,
}

impl Granularity {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "feature" | "features" => Some(Granularity::Feature),
            "scenario" | "scenarios" => Some(Granularity::Scenario),
            _ => None,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Feature => write!(f, "feature"),
            Granularity::Scenario => write!(f, "scenario"),
        }
    }
}

/// Engine options a unit is executed with
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Tag expressions passed to the engine
    pub tags: Vec<String>,

    /// Glue (step definition) paths
    pub glue: Vec<String>,

    /// Report formats the engine should produce
    pub plugins: Vec<ReportFormat>,

    /// Extra engine arguments, passed through verbatim
    pub extra_args: Vec<String>,
}

/// One schedulable test unit, produced by the loader
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunUnit {
    /// Stable identifier, unique within a run
    pub id: String,

    /// Path or URI of the feature file
    pub feature_uri: String,

    /// Declaration line of the scenario, for scenario-level units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_line: Option<u32>,

    #[serde(default)]
    pub options: RunOptions,
}

impl RunUnit {
    pub fn feature(id: impl Into<String>, feature_uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            feature_uri: feature_uri.into(),
            scenario_line: None,
            options: RunOptions::default(),
        }
    }

    pub fn scenario(id: impl Into<String>, feature_uri: impl Into<String>, line: u32) -> Self {
        Self {
            scenario_line: Some(line),
            ..Self::feature(id, feature_uri)
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn granularity(&self) -> Granularity {
        if self.scenario_line.is_some() {
            Granularity::Scenario
        } else {
            Granularity::Feature
        }
    }

    /// Locator addressing exactly this unit
    pub fn locator(&self) -> UnitLocator {
        UnitLocator {
            uri: self.feature_uri.clone(),
            lines: self.scenario_line.into_iter().collect(),
        }
    }
}

impl fmt::Display for RunUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.locator())
    }
}

/// A feature path optionally narrowed to scenario lines: `uri[:line[:line...]]`
///
/// This is the format engines write into rerun manifests and accept as
/// positional arguments.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitLocator {
    pub uri: String,
    pub lines: Vec<u32>,
}

impl UnitLocator {
    pub fn new(uri: impl Into<String>, lines: Vec<u32>) -> Self {
        Self {
            uri: uri.into(),
            lines,
        }
    }

    pub fn is_whole_feature(&self) -> bool {
        self.lines.is_empty()
    }
}

impl FromStr for UnitLocator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty locator".to_string());
        }

        // Trailing `:<digits>` groups are scenario lines; everything before
        // them is the uri, which may itself contain colons (`file:///x`).
        let mut uri = s;
        let mut lines = Vec::new();
        while let Some((head, tail)) = uri.rsplit_once(':') {
            match tail.parse::<u32>() {
                Ok(line) if !head.is_empty() => {
                    lines.push(line);
                    uri = head;
                }
                _ => break,
            }
        }
        lines.reverse();

        Ok(Self::new(uri, lines))
    }
}

impl fmt::Display for UnitLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)?;
        for line in &self.lines {
            write!(f, ":{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_locator() {
        let feature = RunUnit::feature("login", "features/login.feature");
        assert_eq!(feature.locator().to_string(), "features/login.feature");
        assert_eq!(feature.granularity(), Granularity::Feature);

        let scenario = RunUnit::scenario("login-5", "features/login.feature", 5);
        assert_eq!(scenario.locator().to_string(), "features/login.feature:5");
        assert_eq!(scenario.granularity(), Granularity::Scenario);
    }

    #[test]
    fn test_parse_locator() {
        let loc: UnitLocator = "features/a.feature:3:9".parse().unwrap();
        assert_eq!(loc.uri, "features/a.feature");
        assert_eq!(loc.lines, vec![3, 9]);

        let loc: UnitLocator = "file:///tmp/a.feature".parse().unwrap();
        assert_eq!(loc.uri, "file:///tmp/a.feature");
        assert!(loc.is_whole_feature());

        assert!("   ".parse::<UnitLocator>().is_err());
    }

    #[test]
    fn test_granularity_from_str() {
        assert_eq!(Granularity::from_str("Scenario"), Some(Granularity::Scenario));
        assert_eq!(Granularity::from_str("features"), Some(Granularity::Feature));
        assert_eq!(Granularity::from_str("suite"), None);
    }

    #[test]
    fn test_unit_deserialize_defaults() {
        let unit: RunUnit =
            serde_json::from_str(r#"{"id":"a","feature_uri":"a.feature"}"#).unwrap();
        assert_eq!(unit.scenario_line, None);
        assert!(unit.options.tags.is_empty());
    }
}
