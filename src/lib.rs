//! featurepool
//!
//! Parallel execution of BDD run units with bounded reruns of failures,
//! merging of the per-unit cucumber reports, run statistics, and a
//! lifecycle event bus for external sinks.
//!
//! The entry point is [`executor::SuiteRunner`]: give it a [`context::RunContext`],
//! an [`engine::UnitExecutor`] and an [`events::EventBus`], then run a list
//! of [`models::RunUnit`]s.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod models;
pub mod output;
pub mod report;
pub mod stats;
pub mod utils;
