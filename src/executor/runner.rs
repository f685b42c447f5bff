//! Run orchestration
//!
//! Validates the run, drives the scheduler, derives the statistics and
//! writes every artifact, publishing the run-level events on the way.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{ExecutionLog, ParallelScheduler};
use crate::context::RunContext;
use crate::engine::UnitExecutor;
use crate::error::ConfigError;
use crate::events::{EventBus, EventKind};
use crate::models::{RunOutcome, RunUnit};
use crate::report::{ArtifactSet, ReportWriter};
use crate::stats::RunStatistics;
use crate::utils::timer::Timer;

/// Everything a caller needs once a run is over
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub session_id: String,
    pub outcomes: Vec<RunOutcome>,
    pub statistics: RunStatistics,
    pub artifacts: ArtifactSet,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(RunOutcome::is_success)
    }

    /// Process exit code: 0 iff every unit passed, possibly after a rerun
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn failed_units(&self) -> Vec<&RunOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success()).collect()
    }
}

/// Runs a complete set of units
pub struct SuiteRunner {
    context: Arc<RunContext>,
    executor: Arc<dyn UnitExecutor>,
    bus: Arc<EventBus>,
}

impl SuiteRunner {
    pub fn new(
        context: Arc<RunContext>,
        executor: Arc<dyn UnitExecutor>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            context,
            executor,
            bus,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Run every unit and write the run artifacts
    ///
    /// Only invalid configuration aborts the run; it is detected before any
    /// unit starts. Failures while writing artifacts are logged and leave
    /// the outcomes untouched.
    pub async fn run(&self, units: Vec<RunUnit>) -> Result<RunReport, ConfigError> {
        let config = self.context.config();
        config.validate_units(&units)?;

        let timer = Timer::start("run");
        info!(
            "Starting run {} with {} units ({} threads, {} granularity)",
            self.context.session_id(),
            units.len(),
            config.threads,
            config.granularity
        );
        self.bus.publish(&self.bus.event(EventKind::RunStarted));

        let writer = ReportWriter::new(&self.context);
        let log = match writer.execution_log_path() {
            Some(path) => ExecutionLog::to_file(&path).unwrap_or_else(|e| {
                warn!(
                    "Cannot write execution log to {}: {}; keeping it in memory",
                    path.display(),
                    e
                );
                ExecutionLog::new()
            }),
            None => ExecutionLog::new(),
        };
        let log = Arc::new(log);

        let scheduler = ParallelScheduler::with_log(
            self.context.clone(),
            self.executor.clone(),
            self.bus.clone(),
            log.clone(),
        );
        let outcomes = scheduler.run(units, config.threads).await;

        let statistics = self
            .context
            .set_statistics(RunStatistics::from_outcomes(&outcomes, timer.elapsed()))
            .clone();
        info!("{}", statistics);

        let artifacts = match writer.write_all(&outcomes, &statistics, &log) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                error!("Failed to write run artifacts: {:#}", e);
                ArtifactSet::default()
            }
        };

        self.bus.publish(
            &self
                .bus
                .event(EventKind::RunSummary)
                .with_statistics(statistics.clone()),
        );
        self.bus.publish(&self.bus.event(EventKind::RunFinished));

        Ok(RunReport {
            session_id: self.context.session_id().to_string(),
            outcomes,
            statistics,
            artifacts,
        })
    }
}
