//! Run statistics
//!
//! Live counters updated by the scheduler's workers, and the read-only
//! snapshot derived from the final outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::models::{RunOutcome, RunStatus};

/// Final statistics of a run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total: usize,

    /// Units that ended PASSED or PASSED_AFTER_RERUN
    pub passed: usize,

    pub failed: usize,

    /// Units that were rerun at least once
    pub rerun: usize,

    pub passed_after_rerun: usize,

    pub duration_ms: u64,
}

impl RunStatistics {
    /// Derive statistics from the complete outcome list
    pub fn from_outcomes(outcomes: &[RunOutcome], duration: Duration) -> Self {
        let mut stats = Self {
            total: outcomes.len(),
            duration_ms: duration.as_millis() as u64,
            ..Self::default()
        };

        for outcome in outcomes {
            match outcome.status {
                RunStatus::Passed => stats.passed += 1,
                RunStatus::PassedAfterRerun => {
                    stats.passed += 1;
                    stats.passed_after_rerun += 1;
                }
                RunStatus::Failed | RunStatus::FailedAfterRerun | RunStatus::Rerun => {
                    stats.failed += 1
                }
            }
            if outcome.rerun_attempts > 0 {
                stats.rerun += 1;
            }
        }

        stats
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {} | Passed: {} | Failed: {} | Rerun: {} | Passed after rerun: {} | Duration: {}ms",
            self.total,
            self.passed,
            self.failed,
            self.rerun,
            self.passed_after_rerun,
            self.duration_ms
        )
    }
}

const PASSED_ONE: u64 = 1 << 32;
const FAILED_ONE: u64 = 1;
const LOW_MASK: u64 = (1 << 32) - 1;

/// Live pass/fail counters shared by the workers
///
/// Passed and failed share one word (passed in the high half, failed in the
/// low half) so that turning a failed unit into a passed one is a single
/// atomic step.
#[derive(Debug, Default)]
pub struct RunCounters {
    outcome: AtomicU64,
    rerun: AtomicU64,
    rerun_passed: AtomicU64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_passed(&self) {
        self.outcome.fetch_add(PASSED_ONE, Ordering::SeqCst);
    }

    pub fn record_failed(&self) {
        self.outcome.fetch_add(FAILED_ONE, Ordering::SeqCst);
    }

    pub fn record_rerun(&self) {
        self.rerun.fetch_add(1, Ordering::SeqCst);
    }

    /// A previously failed unit passed on rerun
    pub fn record_passed_after_rerun(&self) {
        // failed >= 1 here, so subtracting from the low half never borrows
        self.outcome
            .fetch_add(PASSED_ONE - FAILED_ONE, Ordering::SeqCst);
        self.rerun_passed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let outcome = self.outcome.load(Ordering::SeqCst);
        CounterSnapshot {
            passed: outcome >> 32,
            failed: outcome & LOW_MASK,
            rerun: self.rerun.load(Ordering::SeqCst),
            rerun_passed: self.rerun_passed.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time view of [`RunCounters`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub passed: u64,
    pub failed: u64,
    pub rerun: u64,
    pub rerun_passed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunUnit;
    use std::sync::Arc;

    fn outcome(id: &str, status: RunStatus, rerun_attempts: u32) -> RunOutcome {
        let mut outcome = RunOutcome::passed(RunUnit::feature(id, "a.feature"), Vec::new(), 1);
        outcome.status = status;
        outcome.rerun_attempts = rerun_attempts;
        outcome
    }

    #[test]
    fn test_from_outcomes() {
        let outcomes = vec![
            outcome("a", RunStatus::Passed, 0),
            outcome("b", RunStatus::PassedAfterRerun, 1),
            outcome("c", RunStatus::FailedAfterRerun, 2),
            outcome("d", RunStatus::Failed, 0),
        ];

        let stats = RunStatistics::from_outcomes(&outcomes, Duration::from_millis(1500));
        assert_eq!(stats.total, 4);
        assert_eq!(stats.passed, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.rerun, 2);
        assert_eq!(stats.passed_after_rerun, 1);
        assert_eq!(stats.duration_ms, 1500);
        assert!(!stats.is_success());
        assert_eq!(stats.pass_rate(), 50.0);
    }

    #[test]
    fn test_counters_flip() {
        let counters = RunCounters::new();
        counters.record_passed();
        counters.record_failed();
        counters.record_rerun();
        counters.record_passed_after_rerun();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.passed, 2);
        assert_eq!(snapshot.failed, 0);
        assert_eq!(snapshot.rerun, 1);
        assert_eq!(snapshot.rerun_passed, 1);
    }

    #[test]
    fn test_counters_concurrent() {
        let counters = Arc::new(RunCounters::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = counters.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.record_failed();
                        counters.record_passed_after_rerun();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.passed, 8000);
        assert_eq!(snapshot.failed, 0);
    }
}
