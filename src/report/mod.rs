//! Report aggregation
//!
//! Merges the per-unit report fragments of a run into one consolidated
//! artifact per format. Fragments are ordered by unit id before merging, so
//! the output does not depend on which worker finished first. Fragments that
//! cannot be read or parsed are dropped and logged; the remaining ones are
//! still merged.

mod json;
mod junit;
mod messages;
mod writer;

pub use messages::Timestamp;
pub use writer::{ArtifactSet, ReportWriter};

use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::context::RunContext;
use crate::models::{Granularity, ReportFormat, ReportFragment, RunOutcome};

/// Caller-supplied knobs of a merge
#[derive(Clone, Debug, PartialEq)]
pub struct MergeOptions {
    pub granularity: Granularity,

    /// Prefix every JUnit testcase name with its unit id
    pub prefix_testcase_names: bool,

    /// Name of the merged JUnit `<testsuite>`
    pub suite_name: String,

    /// Overall result written to the synthesized run-finished marker
    pub run_success: bool,

    /// Used when no fragment carries a run-started marker
    pub started_at: Option<DateTime<Utc>>,

    /// Used when no fragment carries a run-finished marker
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            granularity: Granularity::Feature,
            prefix_testcase_names: false,
            suite_name: "featurepool".to_string(),
            run_success: true,
            started_at: None,
            finished_at: None,
        }
    }
}

/// One merged report
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatedReport {
    pub format: ReportFormat,
    pub content: Vec<u8>,

    /// Fragments that made it into the output
    pub merged: usize,

    /// Fragments excluded because they were empty, unreadable or invalid
    pub dropped: usize,
}

/// A fragment's content together with the unit that produced it
pub(crate) struct RawFragment<'a> {
    pub owner: &'a str,
    pub origin: String,
    pub content: Cow<'a, [u8]>,
}

/// Result of a format-specific merge
pub(crate) struct Merged {
    pub content: Vec<u8>,
    pub merged: usize,
}

/// Report Aggregation Engine
#[derive(Clone, Debug, Default)]
pub struct ReportAggregator {
    options: MergeOptions,
}

impl ReportAggregator {
    /// Aggregator for the run described by `context`
    ///
    /// The run-finished marker reflects the statistics recorded on the
    /// context; a run without statistics is considered successful.
    pub fn new(context: &RunContext) -> Self {
        let config = context.config();
        let statistics = context.statistics();
        let finished_at = statistics.and_then(|stats| {
            chrono::Duration::from_std(stats.duration())
                .ok()
                .map(|elapsed| context.started_at() + elapsed)
        });

        Self::with_options(MergeOptions {
            granularity: config.granularity,
            prefix_testcase_names: config.report.prefix_testcase_names,
            suite_name: config.report.junit_suite_name.clone(),
            run_success: statistics.map(|s| s.is_success()).unwrap_or(true),
            started_at: Some(context.started_at()),
            finished_at: finished_at.or(Some(context.started_at())),
        })
    }

    pub fn with_options(options: MergeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Merge the fragments of `format`, keyed by owning unit id
    pub fn merge(
        &self,
        fragments: &BTreeMap<String, Vec<ReportFragment>>,
        format: ReportFormat,
    ) -> AggregatedReport {
        let mut raw = Vec::new();
        let mut dropped = 0;

        for (owner, unit_fragments) in fragments {
            for fragment in unit_fragments.iter().filter(|f| f.format == format) {
                match fragment.read() {
                    Ok(content) => raw.push(RawFragment {
                        owner: owner.as_str(),
                        origin: fragment.origin(),
                        content,
                    }),
                    Err(e) => {
                        warn!(
                            "Dropping {} fragment {} of {}: {}",
                            format,
                            fragment.origin(),
                            owner,
                            e
                        );
                        dropped += 1;
                    }
                }
            }
        }

        let total = raw.len();
        let merged = match format {
            ReportFormat::Json => json::merge(&raw),
            ReportFormat::Junit => junit::merge(&raw, &self.options),
            ReportFormat::Message => messages::merge(&raw, &self.options),
        };
        dropped += total - merged.merged;

        debug!(
            "Merged {} {} fragments ({} dropped)",
            merged.merged, format, dropped
        );

        AggregatedReport {
            format,
            content: merged.content,
            merged: merged.merged,
            dropped,
        }
    }

    /// Merge the report fragments of every outcome
    ///
    /// Each unit contributes its original fragments followed by those of its
    /// last rerun attempt.
    pub fn merge_outcomes(&self, outcomes: &[RunOutcome], format: ReportFormat) -> AggregatedReport {
        self.merge(&fragments_by_unit(outcomes), format)
    }
}

/// Key every outcome's report fragments by unit id
pub fn fragments_by_unit(outcomes: &[RunOutcome]) -> BTreeMap<String, Vec<ReportFragment>> {
    outcomes
        .iter()
        .map(|outcome| {
            (
                outcome.unit.id.clone(),
                outcome.report_fragments().cloned().collect(),
            )
        })
        .collect()
}
