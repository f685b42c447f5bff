//! Lifecycle event bus
//!
//! Synchronous, in-process fan-out of run lifecycle events to registered
//! sinks. The bus knows nothing about what a sink does with an event.

mod sinks;

pub use sinks::{JsonLinesSink, LogSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

use crate::context::RunContext;
use crate::error::SinkError;
use crate::models::{RunOutcome, RunStatus};
use crate::stats::RunStatistics;

/// Kinds of lifecycle events
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    RunStarted,
    RunFinished,
    UnitPassed,
    UnitPassedAfterRerun,
    UnitFailed,
    UnitRerun,
    RunSummary,
}

impl EventKind {
    pub fn all() -> Vec<EventKind> {
        vec![
            EventKind::RunStarted,
            EventKind::RunFinished,
            EventKind::UnitPassed,
            EventKind::UnitPassedAfterRerun,
            EventKind::UnitFailed,
            EventKind::UnitRerun,
            EventKind::RunSummary,
        ]
    }

    /// Event announcing a unit that reached `status`
    pub fn for_status(status: RunStatus) -> EventKind {
        match status {
            RunStatus::Passed => EventKind::UnitPassed,
            RunStatus::PassedAfterRerun => EventKind::UnitPassedAfterRerun,
            RunStatus::Rerun => EventKind::UnitRerun,
            RunStatus::Failed | RunStatus::FailedAfterRerun => EventKind::UnitFailed,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::RunStarted => "RUN_STARTED",
            EventKind::RunFinished => "RUN_FINISHED",
            EventKind::UnitPassed => "UNIT_PASSED",
            EventKind::UnitPassedAfterRerun => "UNIT_PASSED_AFTER_RERUN",
            EventKind::UnitFailed => "UNIT_FAILED",
            EventKind::UnitRerun => "UNIT_RERUN",
            EventKind::RunSummary => "RUN_SUMMARY",
        };
        write!(f, "{name}")
    }
}

/// One lifecycle event
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<RunStatistics>,
}

impl Event {
    pub fn new(kind: EventKind, session_id: impl Into<String>) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            timestamp: Utc::now(),
            outcome: None,
            statistics: None,
        }
    }

    pub fn with_outcome(mut self, outcome: RunOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_statistics(mut self, statistics: RunStatistics) -> Self {
        self.statistics = Some(statistics);
        self
    }
}

/// External consumer of lifecycle events
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    fn send(&self, event: &Event) -> Result<(), SinkError>;
}

/// Event kinds a sink subscribes to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKinds {
    All,
    Only(BTreeSet<EventKind>),
}

impl EventKinds {
    pub fn only(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        EventKinds::Only(kinds.into_iter().collect())
    }

    fn kinds(&self) -> Vec<EventKind> {
        match self {
            EventKinds::All => EventKind::all(),
            EventKinds::Only(kinds) => kinds.iter().copied().collect(),
        }
    }
}

/// Publish/subscribe hub shared by the scheduler and the runner
///
/// Subscriptions happen before the run starts; during the run the bus is
/// shared read-only.
pub struct EventBus {
    session_id: String,
    sinks: BTreeMap<EventKind, Vec<Arc<dyn Sink>>>,
}

impl EventBus {
    pub fn new(context: &RunContext) -> Self {
        Self::with_session(context.session_id())
    }

    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            sinks: BTreeMap::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Register `sink` for `kinds`
    pub fn subscribe(&mut self, sink: Arc<dyn Sink>, kinds: EventKinds) {
        debug!("Subscribing sink {} to {:?}", sink.name(), kinds);
        for kind in kinds.kinds() {
            self.sinks.entry(kind).or_default().push(sink.clone());
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.sinks.get(&kind).map(Vec::len).unwrap_or(0)
    }

    /// Create an event stamped with this run's session id
    pub fn event(&self, kind: EventKind) -> Event {
        Event::new(kind, self.session_id.clone())
    }

    /// Deliver `event` to every sink subscribed to its kind, in subscription
    /// order, on the calling thread
    ///
    /// Sink failures are logged and never reach the caller.
    pub fn publish(&self, event: &Event) {
        let Some(sinks) = self.sinks.get(&event.kind) else {
            return;
        };

        for sink in sinks {
            match panic::catch_unwind(AssertUnwindSafe(|| sink.send(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Sink {} failed on {}: {}", sink.name(), event.kind, e);
                }
                Err(payload) => {
                    error!(
                        "Sink {} panicked on {}: {}",
                        sink.name(),
                        event.kind,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("session_id", &self.session_id)
            .field("kinds", &self.sinks.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        name: String,
        seen: Arc<Mutex<Vec<(String, EventKind)>>>,
    }

    impl Sink for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        fn send(&self, event: &Event) -> Result<(), SinkError> {
            self.seen.lock().unwrap().push((self.name.clone(), event.kind));
            Ok(())
        }
    }

    struct FailingSink;

    impl Sink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn send(&self, _event: &Event) -> Result<(), SinkError> {
            Err(SinkError::Other("service unavailable".to_string()))
        }
    }

    struct PanickingSink;

    impl Sink for PanickingSink {
        fn name(&self) -> &str {
            "panicking"
        }

        fn send(&self, _event: &Event) -> Result<(), SinkError> {
            panic!("boom")
        }
    }

    fn recorder(name: &str, seen: &Arc<Mutex<Vec<(String, EventKind)>>>) -> Arc<dyn Sink> {
        Arc::new(RecordingSink {
            name: name.to_string(),
            seen: seen.clone(),
        })
    }

    #[test]
    fn test_fan_out_in_subscription_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::with_session("s1");
        bus.subscribe(recorder("first", &seen), EventKinds::All);
        bus.subscribe(
            recorder("second", &seen),
            EventKinds::only([EventKind::RunFinished]),
        );

        bus.publish(&bus.event(EventKind::RunStarted));
        bus.publish(&bus.event(EventKind::RunFinished));

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ("first".to_string(), EventKind::RunStarted),
                ("first".to_string(), EventKind::RunFinished),
                ("second".to_string(), EventKind::RunFinished),
            ]
        );
    }

    #[test]
    fn test_sink_failures_are_contained() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::with_session("s1");
        bus.subscribe(Arc::new(FailingSink), EventKinds::All);
        bus.subscribe(Arc::new(PanickingSink), EventKinds::All);
        bus.subscribe(recorder("after", &seen), EventKinds::All);

        bus.publish(&bus.event(EventKind::UnitFailed));

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::with_session("s1");
        assert_eq!(bus.subscriber_count(EventKind::RunSummary), 0);
        bus.publish(&bus.event(EventKind::RunSummary));
    }

    #[test]
    fn test_kind_for_status() {
        assert_eq!(EventKind::for_status(RunStatus::FailedAfterRerun), EventKind::UnitFailed);
        assert_eq!(
            EventKind::for_status(RunStatus::PassedAfterRerun),
            EventKind::UnitPassedAfterRerun
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::new(EventKind::RunSummary, "s1").with_statistics(RunStatistics {
            total: 2,
            passed: 2,
            ..RunStatistics::default()
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "RUN_SUMMARY");
        assert_eq!(json["statistics"]["total"], 2);
        assert!(json.get("outcome").is_none());
    }
}
