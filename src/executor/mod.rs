//! Run execution engine
//!
//! Parallel scheduling of run units, bounded reruns of failures, and the
//! orchestration of a complete run.

mod log;
mod parallel;
mod rerun;
mod runner;

pub use log::ExecutionLog;
pub use parallel::{pool_size, ParallelScheduler, WorkerContext};
pub use rerun::RerunCoordinator;
pub use runner::{RunReport, SuiteRunner};

use std::panic::{self, AssertUnwindSafe};

use crate::engine::{CancellationFlag, ExecutionRequest, ExecutionResult, UnitExecutor};
use crate::error::ExecutionError;
use crate::events::panic_message;

/// Run one attempt, turning a panicking executor into an execution error
pub(crate) fn run_attempt(
    executor: &dyn UnitExecutor,
    request: &ExecutionRequest,
    cancel: &CancellationFlag,
) -> Result<ExecutionResult, ExecutionError> {
    panic::catch_unwind(AssertUnwindSafe(|| executor.execute(request, cancel)))
        .unwrap_or_else(|payload| Err(ExecutionError::Panicked(panic_message(payload.as_ref()))))
}
