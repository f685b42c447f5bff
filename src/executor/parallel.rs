//! Parallel unit scheduling
//!
//! A fixed pool of workers drains a shared, immutable unit list. Each worker
//! runs its unit's attempts on a blocking thread, hands failures to the
//! rerun coordinator and reports exactly one terminal outcome per unit.

use futures::future::join_all;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::rerun::RerunCoordinator;
use super::{run_attempt, ExecutionLog};
use crate::context::RunContext;
use crate::engine::{CancellationFlag, ExecutionRequest, UnitExecutor};
use crate::error::ExecutionError;
use crate::events::{EventBus, EventKind};
use crate::models::{RunOutcome, RunUnit};
use crate::stats::RunCounters;
use crate::utils::timer::Timer;

/// How long in-flight units get to stop after the run deadline
const CANCEL_GRACE: Duration = Duration::from_secs(10);

/// Per-unit settlement state; whoever moves a unit to `SETTLED` first owns
/// its terminal counters and event
const PENDING: u8 = 0;
const FAILED_COUNTED: u8 = 1;
const SETTLED: u8 = 2;

/// Number of workers for `units` units: at least one, never more than units
pub fn pool_size(max_workers: usize, units: usize) -> usize {
    max_workers.min(units).max(1)
}

/// Per-worker view of the shared run state
pub struct WorkerContext<'a> {
    pub id: usize,
    pub bus: &'a EventBus,
    pub log: &'a ExecutionLog,
    pub counters: &'a RunCounters,
    pub cancel: &'a CancellationFlag,
}

/// State shared by every worker of one run
struct Shared {
    executor: Arc<dyn UnitExecutor>,
    coordinator: RerunCoordinator,
    bus: Arc<EventBus>,
    log: Arc<ExecutionLog>,
    counters: Arc<RunCounters>,
    report_root: PathBuf,
    rerun_attempts: u32,
}

impl Shared {
    /// Run one unit to its terminal outcome, blocking the calling thread
    ///
    /// Results that arrive after the scheduler gave up on the unit are
    /// returned but neither counted nor published.
    fn run_unit(
        &self,
        worker_id: usize,
        unit: RunUnit,
        state: &AtomicU8,
        cancel: &CancellationFlag,
    ) -> RunOutcome {
        let worker = WorkerContext {
            id: worker_id,
            bus: &self.bus,
            log: &self.log,
            counters: &self.counters,
            cancel,
        };

        debug!("[worker-{}] Starting {}", worker_id, unit);
        let request = ExecutionRequest::original(unit, &self.report_root);
        let start = Instant::now();

        let (outcome, manifest) = match run_attempt(self.executor.as_ref(), &request, cancel) {
            Ok(result) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                if result.passed {
                    (
                        RunOutcome::passed(request.unit, result.fragments, duration_ms),
                        None,
                    )
                } else {
                    let mut outcome =
                        RunOutcome::failed(request.unit, result.fragments, duration_ms);
                    if let Some(code) = result.exit_code {
                        outcome = outcome.with_error(format!("engine exited with status {code}"));
                    }
                    (outcome, result.rerun_manifest)
                }
            }
            Err(ExecutionError::Cancelled) if cancel.is_cancelled() => {
                (RunOutcome::error(request.unit, "timed out"), None)
            }
            Err(e) => {
                error!("Failed to execute {}: {}", request.unit.id, e);
                (RunOutcome::error(request.unit, e.to_string()), None)
            }
        };
        self.log.record(worker_id, &outcome.unit.id, 0, outcome.status);

        if outcome.is_success() {
            if claim(state, PENDING, SETTLED) {
                self.counters.record_passed();
                self.publish_terminal(&outcome);
            }
            return outcome;
        }

        if !claim(state, PENDING, FAILED_COUNTED) {
            debug!("Dropping late result of {}", outcome.unit.id);
            return outcome;
        }
        self.counters.record_failed();

        let outcome = if cancel.is_cancelled() {
            debug!("Run cancelled; not rerunning {}", outcome.unit.id);
            outcome.with_error("timed out")
        } else {
            self.coordinator
                .rerun(outcome, manifest.as_deref(), self.rerun_attempts, &worker)
        };

        if claim(state, FAILED_COUNTED, SETTLED) {
            if outcome.is_success() {
                self.counters.record_passed_after_rerun();
            }
            self.publish_terminal(&outcome);
        } else {
            debug!("Dropping late rerun result of {}", outcome.unit.id);
        }
        outcome
    }

    /// Settle a unit as failed unless it was already settled
    fn settle_failed(&self, state: &AtomicU8, outcome: &RunOutcome) {
        match state.swap(SETTLED, Ordering::SeqCst) {
            PENDING => {
                self.counters.record_failed();
                self.publish_terminal(outcome);
            }
            FAILED_COUNTED => self.publish_terminal(outcome),
            _ => debug!("{} already settled", outcome.unit.id),
        }
    }

    fn publish_terminal(&self, outcome: &RunOutcome) {
        let event = self
            .bus
            .event(EventKind::for_status(outcome.status))
            .with_outcome(outcome.clone());
        self.bus.publish(&event);
    }
}

/// Bounded worker pool running units concurrently
pub struct ParallelScheduler {
    context: Arc<RunContext>,
    shared: Arc<Shared>,
}

impl ParallelScheduler {
    pub fn new(
        context: Arc<RunContext>,
        executor: Arc<dyn UnitExecutor>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self::with_log(context, executor, bus, Arc::new(ExecutionLog::new()))
    }

    pub fn with_log(
        context: Arc<RunContext>,
        executor: Arc<dyn UnitExecutor>,
        bus: Arc<EventBus>,
        log: Arc<ExecutionLog>,
    ) -> Self {
        let config = context.config();
        let report_root = config.engine.report_dir.join(context.session_id());
        let coordinator = RerunCoordinator::new(executor.clone(), report_root.clone())
            .with_missing_manifest(config.rerun.missing_manifest);

        let shared = Shared {
            executor,
            coordinator,
            bus,
            log,
            counters: Arc::new(RunCounters::new()),
            report_root,
            rerun_attempts: config.rerun_attempts(),
        };

        Self {
            context,
            shared: Arc::new(shared),
        }
    }

    /// Live counters, readable while the run is in progress
    pub fn counters(&self) -> Arc<RunCounters> {
        self.shared.counters.clone()
    }

    pub fn log(&self) -> Arc<ExecutionLog> {
        self.shared.log.clone()
    }

    /// Run every unit with at most `max_workers` in flight
    ///
    /// Returns one terminal outcome per unit, sorted by unit id. Units that
    /// never finished because the run deadline expired are reported as
    /// failed.
    pub async fn run(&self, units: Vec<RunUnit>, max_workers: usize) -> Vec<RunOutcome> {
        if units.is_empty() {
            return Vec::new();
        }

        let units: Arc<[RunUnit]> = units.into();
        let workers = pool_size(max_workers, units.len());
        let timer = Timer::start("scheduler");
        info!("Scheduling {} units on {} workers", units.len(), workers);

        let cursor = Arc::new(AtomicUsize::new(0));
        let states: Arc<[AtomicU8]> = units.iter().map(|_| AtomicU8::new(PENDING)).collect();
        let cancel = CancellationFlag::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handles: Vec<_> = (0..workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    units.clone(),
                    cursor.clone(),
                    states.clone(),
                    cancel.clone(),
                    self.shared.clone(),
                    tx.clone(),
                ))
            })
            .collect();
        drop(tx);

        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let mut all_workers = Box::pin(join_all(handles));

        let timed_out = match self.context.config().timeout() {
            Some(deadline) => match tokio::time::timeout(deadline, &mut all_workers).await {
                Ok(results) => {
                    log_worker_failures(results);
                    false
                }
                Err(_) => {
                    warn!(
                        "Run deadline of {}s expired; cancelling remaining units",
                        deadline.as_secs()
                    );
                    cancel.cancel();
                    match tokio::time::timeout(CANCEL_GRACE, &mut all_workers).await {
                        Ok(results) => log_worker_failures(results),
                        Err(_) => {
                            error!("Workers ignored cancellation; abandoning in-flight units");
                            for handle in &abort_handles {
                                handle.abort();
                            }
                        }
                    }
                    true
                }
            },
            None => {
                log_worker_failures(all_workers.await);
                false
            }
        };

        let mut slots: Vec<Option<RunOutcome>> = vec![None; units.len()];
        while let Ok((index, outcome)) = rx.try_recv() {
            slots[index] = Some(outcome);
        }

        let mut outcomes: Vec<RunOutcome> = slots
            .into_iter()
            .zip(units.iter().zip(states.iter()))
            .map(|(slot, (unit, state))| {
                slot.unwrap_or_else(|| self.unfinished(unit, state, timed_out))
            })
            .collect();
        outcomes.sort_by(|a, b| a.unit.id.cmp(&b.unit.id));

        info!(
            "Scheduling finished in {}ms ({} units)",
            timer.elapsed_ms(),
            outcomes.len()
        );
        outcomes
    }

    fn unfinished(&self, unit: &RunUnit, state: &AtomicU8, timed_out: bool) -> RunOutcome {
        let reason = if timed_out {
            "timed out"
        } else {
            "worker terminated before the unit finished"
        };
        warn!("{} did not finish: {}", unit.id, reason);

        let outcome = RunOutcome::error(unit.clone(), reason);
        self.shared.log.record_unstarted(&unit.id, reason);
        self.shared.settle_failed(state, &outcome);
        outcome
    }
}

async fn worker_loop(
    worker_id: usize,
    units: Arc<[RunUnit]>,
    cursor: Arc<AtomicUsize>,
    states: Arc<[AtomicU8]>,
    cancel: CancellationFlag,
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<(usize, RunOutcome)>,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let index = cursor.fetch_add(1, Ordering::SeqCst);
        let Some(unit) = units.get(index).cloned() else {
            break;
        };

        let task_shared = shared.clone();
        let task_states = states.clone();
        let task_cancel = cancel.clone();
        let outcome = match tokio::task::spawn_blocking(move || {
            task_shared.run_unit(worker_id, unit, &task_states[index], &task_cancel)
        })
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("[worker-{}] Unit task failed: {}", worker_id, e);
                let outcome = RunOutcome::error(units[index].clone(), format!("unit task failed: {e}"));
                shared.settle_failed(&states[index], &outcome);
                outcome
            }
        };

        if tx.send((index, outcome)).is_err() {
            break;
        }
    }
    debug!("[worker-{}] Done", worker_id);
}

/// Move `state` from `from` to `to`; false if another party got there first
fn claim(state: &AtomicU8, from: u8, to: u8) -> bool {
    state
        .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

fn log_worker_failures(results: Vec<Result<(), tokio::task::JoinError>>) {
    for result in results {
        if let Err(e) = result {
            error!("Worker failed: {}", e);
        }
    }
}
