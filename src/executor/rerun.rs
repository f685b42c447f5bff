//! Rerun coordination
//!
//! Re-executes only the failed sub-elements of a unit, on the worker that
//! owns the unit, until an attempt passes or the attempt budget is spent.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::parallel::WorkerContext;
use super::run_attempt;
use crate::config::MissingManifestPolicy;
use crate::engine::{read_manifest, ExecutionRequest, UnitExecutor};
use crate::error::ManifestError;
use crate::events::EventKind;
use crate::models::{RunOutcome, RunStatus, RunUnit, UnitLocator};

/// Decides whether and how a failed unit is rerun
pub struct RerunCoordinator {
    executor: Arc<dyn UnitExecutor>,
    report_root: PathBuf,
    missing_manifest: MissingManifestPolicy,
}

impl RerunCoordinator {
    pub fn new(executor: Arc<dyn UnitExecutor>, report_root: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            report_root: report_root.into(),
            missing_manifest: MissingManifestPolicy::Fail,
        }
    }

    pub fn with_missing_manifest(mut self, policy: MissingManifestPolicy) -> Self {
        self.missing_manifest = policy;
        self
    }

    /// Rerun a failed unit up to `attempts` times
    ///
    /// `manifest` is the rerun manifest written by the failed attempt. Units
    /// that did not fail, or a zero budget, are returned unchanged.
    pub fn rerun(
        &self,
        prior: RunOutcome,
        manifest: Option<&Path>,
        attempts: u32,
        worker: &WorkerContext<'_>,
    ) -> RunOutcome {
        if attempts == 0 || prior.status != RunStatus::Failed {
            return prior;
        }
        if worker.cancel.is_cancelled() {
            return prior.with_error("timed out");
        }

        let mut scope = match self.initial_scope(&prior.unit, manifest) {
            Ok(scope) => scope,
            Err(e) => match self.missing_manifest {
                MissingManifestPolicy::Fail => {
                    warn!("Cannot rerun {}: {}; keeping it failed", prior.unit.id, e);
                    return prior.with_error(format!("rerun not possible: {e}"));
                }
                MissingManifestPolicy::RetryUnit => {
                    warn!("{} for {}; rerunning the whole unit", e, prior.unit.id);
                    vec![prior.unit.locator()]
                }
            },
        };

        let mut outcome = prior;

        for attempt in 1..=attempts {
            if worker.cancel.is_cancelled() {
                debug!("Run cancelled before rerun {} of {}", attempt, outcome.unit.id);
                break;
            }
            if attempt == 1 {
                worker.counters.record_rerun();
            }

            let mut announced = outcome.clone();
            announced.status = RunStatus::Rerun;
            announced.failed_locators = scope.clone();
            worker
                .bus
                .publish(&worker.bus.event(EventKind::UnitRerun).with_outcome(announced));

            info!(
                "Rerun {}/{} of {} ({} locator(s))",
                attempt,
                attempts,
                outcome.unit.id,
                scope.len()
            );

            let request = ExecutionRequest::attempt(
                outcome.unit.clone(),
                attempt,
                scope.clone(),
                &self.report_root,
            );
            let start = Instant::now();
            let result = run_attempt(self.executor.as_ref(), &request, worker.cancel);
            outcome.duration_ms += start.elapsed().as_millis() as u64;
            outcome.rerun_attempts = attempt;

            match result {
                Ok(result) if result.passed => {
                    outcome.status = RunStatus::PassedAfterRerun;
                    outcome.rerun_fragments = result.fragments;
                    outcome.failed_locators.clear();
                    outcome.error = None;
                    worker.log.record(worker.id, &outcome.unit.id, attempt, outcome.status);
                    return outcome;
                }
                Ok(result) => {
                    outcome.rerun_fragments = result.fragments;
                    outcome.error = result.exit_code.map(|code| {
                        format!("engine exited with status {code} on rerun {attempt}")
                    });
                    if outcome.unit.scenario_line.is_none() {
                        match read_manifest(result.rerun_manifest.as_deref()) {
                            Ok(next) => scope = next,
                            Err(e) => debug!(
                                "Keeping previous rerun scope for {}: {}",
                                outcome.unit.id, e
                            ),
                        }
                    }
                }
                Err(e) => {
                    warn!("Rerun {} of {} could not run: {}", attempt, outcome.unit.id, e);
                    outcome.error = Some(e.to_string());
                }
            }

            worker
                .log
                .record(worker.id, &outcome.unit.id, attempt, RunStatus::FailedAfterRerun);
            if worker.cancel.is_cancelled() {
                break;
            }
        }

        if worker.cancel.is_cancelled() {
            outcome.error = Some("timed out".to_string());
        }
        outcome.status = if outcome.rerun_attempts > 0 {
            RunStatus::FailedAfterRerun
        } else {
            RunStatus::Failed
        };
        outcome.failed_locators = scope;
        outcome
    }

    /// Locators to rerun first: the scenario itself, or the failed scenarios
    /// of a feature as listed by its manifest
    fn initial_scope(
        &self,
        unit: &RunUnit,
        manifest: Option<&Path>,
    ) -> Result<Vec<UnitLocator>, ManifestError> {
        if unit.scenario_line.is_some() {
            return Ok(vec![unit.locator()]);
        }
        read_manifest(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CancellationFlag, ExecutionResult};
    use crate::error::ExecutionError;
    use crate::events::EventBus;
    use crate::executor::ExecutionLog;
    use crate::stats::RunCounters;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Fails the first `failures` calls, then passes; records every scope
    struct FlakyExecutor {
        failures: u32,
        calls: Mutex<Vec<(u32, Vec<UnitLocator>)>>,
    }

    impl FlakyExecutor {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl UnitExecutor for FlakyExecutor {
        fn execute(
            &self,
            request: &ExecutionRequest,
            _cancel: &CancellationFlag,
        ) -> Result<ExecutionResult, ExecutionError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((request.attempt, request.scope.clone()));
            Ok(if calls.len() as u32 > self.failures {
                ExecutionResult::passed(Vec::new())
            } else {
                ExecutionResult::failed(Vec::new())
            })
        }
    }

    struct Harness {
        bus: EventBus,
        log: ExecutionLog,
        counters: RunCounters,
        cancel: CancellationFlag,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                bus: EventBus::with_session("test"),
                log: ExecutionLog::new(),
                counters: RunCounters::new(),
                cancel: CancellationFlag::new(),
            }
        }

        fn worker(&self) -> WorkerContext<'_> {
            WorkerContext {
                id: 0,
                bus: &self.bus,
                log: &self.log,
                counters: &self.counters,
                cancel: &self.cancel,
            }
        }
    }

    fn failed(unit: RunUnit) -> RunOutcome {
        RunOutcome::failed(unit, Vec::new(), 10)
    }

    #[test]
    fn test_scenario_passes_after_rerun() {
        let executor = Arc::new(FlakyExecutor::new(1));
        let coordinator = RerunCoordinator::new(executor.clone(), "reports");
        let harness = Harness::new();
        let unit = RunUnit::scenario("s", "a.feature", 7);

        let outcome = coordinator.rerun(failed(unit), None, 3, &harness.worker());

        assert_eq!(outcome.status, RunStatus::PassedAfterRerun);
        assert_eq!(outcome.rerun_attempts, 2);
        assert_eq!(harness.counters.snapshot().rerun, 1);

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], (1, vec![UnitLocator::new("a.feature", vec![7])]));
        assert_eq!(calls[1].0, 2);
    }

    #[test]
    fn test_attempts_are_bounded() {
        let executor = Arc::new(FlakyExecutor::new(u32::MAX));
        let coordinator = RerunCoordinator::new(executor.clone(), "reports");
        let harness = Harness::new();

        let outcome = coordinator.rerun(
            failed(RunUnit::scenario("s", "a.feature", 7)),
            None,
            2,
            &harness.worker(),
        );

        assert_eq!(outcome.status, RunStatus::FailedAfterRerun);
        assert_eq!(outcome.rerun_attempts, 2);
        assert_eq!(outcome.failed_locators, vec![UnitLocator::new("a.feature", vec![7])]);
        assert_eq!(executor.calls.lock().unwrap().len(), 2);
        assert_eq!(harness.log.lines().len(), 2);
    }

    #[test]
    fn test_feature_rerun_uses_manifest_scope() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("rerun.txt");
        std::fs::write(&manifest, "features/a.feature:5:12\n").unwrap();

        let executor = Arc::new(FlakyExecutor::new(0));
        let coordinator = RerunCoordinator::new(executor.clone(), dir.path());
        let harness = Harness::new();

        let outcome = coordinator.rerun(
            failed(RunUnit::feature("a", "features/a.feature")),
            Some(&manifest),
            1,
            &harness.worker(),
        );

        assert_eq!(outcome.status, RunStatus::PassedAfterRerun);
        let calls = executor.calls.lock().unwrap();
        assert_eq!(
            calls[0].1,
            vec![UnitLocator::new("features/a.feature", vec![5, 12])]
        );
    }

    #[test]
    fn test_missing_manifest_keeps_unit_failed() {
        let executor = Arc::new(FlakyExecutor::new(0));
        let coordinator = RerunCoordinator::new(executor.clone(), "reports");
        let harness = Harness::new();

        let outcome = coordinator.rerun(
            failed(RunUnit::feature("a", "features/a.feature")),
            None,
            3,
            &harness.worker(),
        );

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.rerun_attempts, 0);
        assert!(outcome.error.unwrap().contains("rerun manifest"));
        assert!(executor.calls.lock().unwrap().is_empty());
        assert_eq!(harness.counters.snapshot().rerun, 0);
    }

    #[test]
    fn test_missing_manifest_retry_unit_policy() {
        let executor = Arc::new(FlakyExecutor::new(0));
        let coordinator = RerunCoordinator::new(executor.clone(), "reports")
            .with_missing_manifest(MissingManifestPolicy::RetryUnit);
        let harness = Harness::new();

        let outcome = coordinator.rerun(
            failed(RunUnit::feature("a", "features/a.feature")),
            None,
            1,
            &harness.worker(),
        );

        assert_eq!(outcome.status, RunStatus::PassedAfterRerun);
        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0].1, vec![UnitLocator::new("features/a.feature", vec![])]);
    }

    #[test]
    fn test_cancelled_run_is_not_rerun() {
        let executor = Arc::new(FlakyExecutor::new(0));
        let coordinator = RerunCoordinator::new(executor.clone(), "reports");
        let harness = Harness::new();
        harness.cancel.cancel();

        let outcome = coordinator.rerun(
            failed(RunUnit::feature("a", "features/a.feature")),
            None,
            2,
            &harness.worker(),
        );

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("timed out"));
        assert_eq!(outcome.rerun_attempts, 0);
        assert_eq!(harness.counters.snapshot().rerun, 0);
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_passed_outcome_untouched() {
        let executor = Arc::new(FlakyExecutor::new(0));
        let coordinator = RerunCoordinator::new(executor.clone(), "reports");
        let harness = Harness::new();
        let passed = RunOutcome::passed(RunUnit::feature("a", "a.feature"), Vec::new(), 1);

        let outcome = coordinator.rerun(passed, None, 3, &harness.worker());
        assert_eq!(outcome.status, RunStatus::Passed);
        assert!(executor.calls.lock().unwrap().is_empty());
    }
}
