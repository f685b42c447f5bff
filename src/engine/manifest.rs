//! Rerun manifests
//!
//! A manifest lists the failed sub-elements of a unit, one `uri:line:line`
//! locator per line (whitespace separated locators are accepted too).

use std::path::Path;

use crate::error::ManifestError;
use crate::models::UnitLocator;

/// Parse manifest content into locators, skipping blanks and malformed entries
pub fn parse_manifest(content: &str) -> Vec<UnitLocator> {
    content
        .split_whitespace()
        .filter_map(|token| match token.parse::<UnitLocator>() {
            Ok(locator) => Some(locator),
            Err(e) => {
                tracing::warn!("Ignoring rerun manifest entry {:?}: {}", token, e);
                None
            }
        })
        .collect()
}

/// Read and parse a manifest written by the engine
pub fn read_manifest(path: Option<&Path>) -> Result<Vec<UnitLocator>, ManifestError> {
    let path = path.ok_or(ManifestError::Missing)?;
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let locators = parse_manifest(&content);
    if locators.is_empty() {
        return Err(ManifestError::Empty(path.to_path_buf()));
    }
    Ok(locators)
}
