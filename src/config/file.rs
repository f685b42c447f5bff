//! Configuration and unit list files
//!
//! Finds the configuration file and reads the loader's unit list.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::is_yaml_file;
use crate::models::RunUnit;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./featurepool.yaml",
    "./featurepool.yml",
    "./featurepool.json",
    "./.featurepool.yaml",
    "~/.config/featurepool/config.yaml",
];

/// Find the configuration file in the standard locations
pub fn find_config_file() -> Option<PathBuf> {
    CONFIG_LOCATIONS
        .iter()
        .map(|location| expand_path(location))
        .find(|path| path.exists())
}

/// Load the run units produced by the loader from a YAML or JSON list
pub fn load_units(path: impl AsRef<Path>) -> Result<Vec<RunUnit>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read unit list: {}", path.display()))?;

    let units: Vec<RunUnit> = if is_yaml_file(path) {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML unit list: {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON unit list: {}", path.display()))?
    };

    Ok(units)
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
