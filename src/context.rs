//! Run context
//!
//! One per run. Shared by reference between the scheduler, the report
//! aggregator and the event bus; read-only once scheduling completes.

use chrono::{DateTime, Utc};
use std::sync::OnceLock;

use crate::config::RunConfig;
use crate::stats::RunStatistics;

#[derive(Debug)]
pub struct RunContext {
    session_id: String,
    config: RunConfig,
    started_at: DateTime<Utc>,
    statistics: OnceLock<RunStatistics>,
}

impl RunContext {
    pub fn new(config: RunConfig) -> Self {
        Self {
            session_id: generate_session_id(),
            config,
            started_at: Utc::now(),
            statistics: OnceLock::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Record the final statistics; only the first call has an effect
    pub fn set_statistics(&self, statistics: RunStatistics) -> &RunStatistics {
        self.statistics.get_or_init(|| statistics)
    }

    pub fn statistics(&self) -> Option<&RunStatistics> {
        self.statistics.get()
    }
}

/// Generate unique session ID
fn generate_session_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id();
        assert_eq!(id.len(), 20);
        assert_eq!(&id[8..9], "_");
    }

    #[test]
    fn test_statistics_set_once() {
        let context = RunContext::new(RunConfig::default());
        assert!(context.statistics().is_none());

        let first = RunStatistics {
            total: 3,
            ..RunStatistics::default()
        };
        context.set_statistics(first.clone());
        context.set_statistics(RunStatistics::default());

        assert_eq!(context.statistics(), Some(&first));
    }
}
