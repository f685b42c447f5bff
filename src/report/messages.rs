//! Message stream merge
//!
//! Fragments are NDJSON streams of single-key envelopes. The merged stream
//! keeps one `meta`, one `gherkinDocument` per feature uri, one copy of each
//! global definition, and exactly one pair of run markers. Everything else
//! is concatenated in arrival order.
//!
//! A feature's document is rebuilt when units ran at scenario granularity or
//! when the feature arrived in more than one document. The rebuilt document
//! lists only the scenarios that were run (per the `pickle` envelopes), in
//! declaration order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, error, warn};

use super::{MergeOptions, Merged, RawFragment};
use crate::error::FragmentError;
use crate::models::Granularity;

/// Protobuf-style timestamp carried by run markers
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(default)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            seconds: at.timestamp(),
            nanos: at.timestamp_subsec_nanos(),
        }
    }

    /// Timestamp of a marker body, if it carries a valid one
    fn of(body: &Value) -> Option<Self> {
        serde_json::from_value(body.get("timestamp")?.clone()).ok()
    }
}

type Envelope = Map<String, Value>;

/// Definitions repeated by every fragment, keyed by the field that
/// identifies them
const GLOBAL_KEYS: [(&str, &str); 4] = [
    ("source", "uri"),
    ("stepDefinition", "id"),
    ("hook", "id"),
    ("parameterType", "id"),
];

/// Child node kinds of a feature or rule
const CHILD_KINDS: [&str; 3] = ["background", "scenario", "rule"];

enum Slot {
    Envelope(Envelope),
    /// Placeholder for the rebuilt document of a feature uri
    Document(String),
    /// Placeholder for the synthesized run-started marker
    RunStarted,
}

#[derive(Default)]
struct StreamMerge {
    meta: Option<Envelope>,
    started: Option<Timestamp>,
    finished: Option<Timestamp>,
    slots: Vec<Slot>,
    globals: HashSet<(String, String)>,
    documents: BTreeMap<String, Vec<Value>>,
    pickled: HashMap<String, HashSet<String>>,
}

pub(crate) fn merge(fragments: &[RawFragment<'_>], options: &MergeOptions) -> Merged {
    let mut stream = StreamMerge::default();
    let mut merged = 0;

    for fragment in fragments {
        match parse_stream(&fragment.content) {
            Ok(envelopes) if envelopes.is_empty() => debug!(
                "Skipping empty message fragment {} of {}",
                fragment.origin, fragment.owner
            ),
            Ok(envelopes) => {
                envelopes.into_iter().for_each(|e| stream.push(e));
                merged += 1;
            }
            Err(e) => warn!(
                "Dropping message fragment {} of {}: {}",
                fragment.origin, fragment.owner, e
            ),
        }
    }

    let content = match stream.finish(options) {
        Ok(content) => content,
        Err(e) => {
            error!("Failed to write merged message stream: {}", e);
            Vec::new()
        }
    };
    Merged { content, merged }
}

fn parse_stream(content: &[u8]) -> Result<Vec<Envelope>, FragmentError> {
    let text = std::str::from_utf8(content).map_err(|_| FragmentError::Utf8)?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| match serde_json::from_str(line)? {
            Value::Object(envelope) if envelope.len() == 1 => Ok(envelope),
            _ => Err(FragmentError::Structure(
                "envelope is not a single-key object".into(),
            )),
        })
        .collect()
}

/// The envelope's kind and body
fn split(envelope: &Envelope) -> Option<(&str, &Value)> {
    envelope.iter().next().map(|(kind, body)| (kind.as_str(), body))
}

fn str_field<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field).and_then(Value::as_str)
}

impl StreamMerge {
    fn push(&mut self, envelope: Envelope) {
        let Some((kind, body)) = split(&envelope) else {
            return;
        };

        match kind {
            "meta" => {
                if self.meta.is_none() {
                    self.meta = Some(envelope);
                }
            }
            "testRunStarted" => {
                if !self.has_run_started() {
                    self.slots.push(Slot::RunStarted);
                }
                self.started = earliest(self.started, Timestamp::of(body));
            }
            "testRunFinished" => {
                self.finished = earliest(self.finished, Timestamp::of(body));
            }
            "gherkinDocument" => {
                let uri = str_field(body, "uri").unwrap_or_default().to_string();
                let documents = self.documents.entry(uri.clone()).or_default();
                if documents.is_empty() {
                    self.slots.push(Slot::Document(uri));
                }
                documents.push(body.clone());
            }
            "pickle" => {
                if let Some(uri) = str_field(body, "uri") {
                    let ids = body
                        .get("astNodeIds")
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                        .filter_map(Value::as_str)
                        .map(str::to_string);
                    self.pickled.entry(uri.to_string()).or_default().extend(ids);
                }
                self.slots.push(Slot::Envelope(envelope));
            }
            _ => {
                let global = GLOBAL_KEYS
                    .iter()
                    .find(|(global, _)| *global == kind)
                    .and_then(|(_, field)| str_field(body, field));
                if let Some(key) = global {
                    if !self.globals.insert((kind.to_string(), key.to_string())) {
                        return;
                    }
                }
                self.slots.push(Slot::Envelope(envelope));
            }
        }
    }

    fn has_run_started(&self) -> bool {
        self.slots.iter().any(|slot| matches!(slot, Slot::RunStarted))
    }

    fn finish(self, options: &MergeOptions) -> Result<Vec<u8>, serde_json::Error> {
        let started = self
            .started
            .or(options.started_at.map(Timestamp::from_datetime))
            .unwrap_or_default();
        let finished = self
            .finished
            .or(options.finished_at.map(Timestamp::from_datetime))
            .unwrap_or(started);
        let run_started = json!({ "testRunStarted": { "timestamp": started } });
        let run_finished = json!({
            "testRunFinished": { "success": options.run_success, "timestamp": finished }
        });

        let mut lines = Vec::new();
        if let Some(meta) = &self.meta {
            lines.push(serde_json::to_string(meta)?);
        }
        if !self.has_run_started() {
            lines.push(serde_json::to_string(&run_started)?);
        }

        for slot in &self.slots {
            let line = match slot {
                Slot::Envelope(envelope) => serde_json::to_string(envelope)?,
                Slot::RunStarted => serde_json::to_string(&run_started)?,
                Slot::Document(uri) => {
                    let document = self.document(uri, options.granularity);
                    serde_json::to_string(&json!({ "gherkinDocument": document }))?
                }
            };
            lines.push(line);
        }
        lines.push(serde_json::to_string(&run_finished)?);

        let mut content = lines.join("\n").into_bytes();
        content.push(b'\n');
        Ok(content)
    }

    /// The single document emitted for `uri`
    fn document(&self, uri: &str, granularity: Granularity) -> Value {
        let Some((first, rest)) = self.documents.get(uri).and_then(|d| d.split_first()) else {
            return Value::Null;
        };
        if rest.is_empty() && granularity == Granularity::Feature {
            return first.clone();
        }

        let mut document = first.clone();
        let Some(children) = document
            .pointer_mut("/feature/children")
            .and_then(Value::as_array_mut)
        else {
            return document;
        };

        for other in rest {
            if let Some(incoming) = other.pointer("/feature/children").and_then(Value::as_array) {
                union_children(children, incoming);
            }
        }

        if granularity == Granularity::Scenario {
            match self.pickled.get(uri) {
                Some(ran) if !ran.is_empty() => retain_run(children, ran),
                _ => debug!("No pickles for {}; keeping every scenario", uri),
            }
        }
        sort_children(children);

        document
    }
}

fn earliest(current: Option<Timestamp>, candidate: Option<Timestamp>) -> Option<Timestamp> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Kind and node of a feature/rule child
fn child_node(child: &Value) -> Option<(&'static str, &Value)> {
    CHILD_KINDS
        .iter()
        .find_map(|kind| child.get(*kind).map(|node| (*kind, node)))
}

fn child_key(child: &Value) -> String {
    match child_node(child) {
        Some((kind, node)) => match str_field(node, "id") {
            Some(id) => format!("{kind}:{id}"),
            None => format!("{kind}@{}", child_line(child)),
        },
        None => child.to_string(),
    }
}

fn child_line(child: &Value) -> u64 {
    child_node(child)
        .and_then(|(_, node)| node.pointer("/location/line"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// Add the children of `incoming` missing from `target`; rules present in
/// both have their own children united
fn union_children(target: &mut Vec<Value>, incoming: &[Value]) {
    for child in incoming {
        let key = child_key(child);
        match target.iter_mut().find(|existing| child_key(existing) == key) {
            Some(existing) => {
                let theirs = child.pointer("/rule/children").and_then(Value::as_array);
                let ours = existing
                    .pointer_mut("/rule/children")
                    .and_then(Value::as_array_mut);
                if let (Some(ours), Some(theirs)) = (ours, theirs) {
                    union_children(ours, theirs);
                }
            }
            None => target.push(child.clone()),
        }
    }
}

/// Keep backgrounds, the scenarios in `ran`, and rules that still hold a
/// scenario
fn retain_run(children: &mut Vec<Value>, ran: &HashSet<String>) {
    children.retain_mut(|child| {
        if let Some(scenario) = child.get("scenario") {
            return str_field(scenario, "id").is_some_and(|id| ran.contains(id));
        }
        if let Some(rule_children) = child
            .pointer_mut("/rule/children")
            .and_then(Value::as_array_mut)
        {
            retain_run(rule_children, ran);
            return rule_children.iter().any(|c| c.get("scenario").is_some());
        }
        true
    });
}

fn sort_children(children: &mut [Value]) {
    children.sort_by_key(child_line);
    for child in children.iter_mut() {
        if let Some(rule_children) = child
            .pointer_mut("/rule/children")
            .and_then(Value::as_array_mut)
        {
            sort_children(rule_children);
        }
    }
}
