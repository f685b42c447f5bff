//! Data models for parallel feature runs
//!
//! Run units, outcomes and report fragments shared by every other module.

mod outcome;
mod unit;

pub use outcome::{FragmentSource, ReportFormat, ReportFragment, RunOutcome, RunStatus};
pub use unit::{Granularity, RunOptions, RunUnit, UnitLocator};
