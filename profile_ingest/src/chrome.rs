//! Ingest Chrome trace event data.
//!
//! The Chrome trace event format comes in two shapes:
//!
//! 1. **Array format**: a bare JSON array of trace events.
//! 2. **Object format**: an object whose `traceEvents` field holds the events,
//!    alongside metadata such as `displayTimeUnit` or `otherData`.
//!
//! The array format is partitioned by process and thread and turned into a
//! [`ProfileGroup`]. The object format is recognized but not ingested yet and
//! is reported as [`TraceError::UnsupportedTraceFormat`].
//!
//! # Example
//!
//! ```
//! use profile_ingest::chrome::parse_chrome_trace;
//!
//! let input = r#"[
//!     {"ph": "B", "pid": 1, "tid": 1, "cat": "", "name": "main", "ts": 0, "args": {}},
//!     {"ph": "E", "pid": 1, "tid": 1, "cat": "", "name": "main", "ts": 10, "args": {}}
//! ]"#;
//!
//! let group = parse_chrome_trace(input).unwrap();
//! assert_eq!(group.name, "chrometrace");
//! ```

use crate::heap::{HeapError, HeapNode, MinHeap};
use crate::profile::ProfileGroup;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors that can occur during trace ingestion.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported trace format: {0}")]
    UnsupportedTraceFormat(String),

    #[error(transparent)]
    Heap(#[from] HeapError),
}

pub type Result<T> = std::result::Result<T, TraceError>;

/// A process or thread id. Any JSON number is a valid id.
///
/// Integral values are stored exactly, as `Int` when they fit in an `i64`
/// and as `UInt` above that. Everything else is `Float`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum NumericId {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl NumericId {
    fn from_number(n: &serde_json::Number) -> Self {
        if let Some(i) = n.as_i64() {
            NumericId::Int(i)
        } else if let Some(u) = n.as_u64() {
            NumericId::UInt(u)
        } else {
            n.as_f64().map_or(NumericId::Float(f64::NAN), NumericId::from)
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            NumericId::Int(i) => i as f64,
            NumericId::UInt(u) => u as f64,
            NumericId::Float(f) => f,
        }
    }

    fn rank(self) -> u8 {
        match self {
            NumericId::Int(_) => 0,
            NumericId::UInt(_) => 1,
            NumericId::Float(_) => 2,
        }
    }
}

impl From<f64> for NumericId {
    fn from(f: f64) -> Self {
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
            NumericId::Int(f as i64)
        } else if f.fract() == 0.0 && f >= 0.0 && f < u64::MAX as f64 {
            NumericId::UInt(f as u64)
        } else {
            NumericId::Float(f)
        }
    }
}

impl From<u64> for NumericId {
    fn from(u: u64) -> Self {
        i64::try_from(u).map_or(NumericId::UInt(u), NumericId::Int)
    }
}

impl Ord for NumericId {
    // By numeric value; ids whose f64 images collide are split by variant,
    // then by their exact value.
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_f64()
            .total_cmp(&other.as_f64())
            .then_with(|| self.rank().cmp(&other.rank()))
            .then_with(|| match (self, other) {
                (NumericId::Int(a), NumericId::Int(b)) => a.cmp(b),
                (NumericId::UInt(a), NumericId::UInt(b)) => a.cmp(b),
                (NumericId::Float(a), NumericId::Float(b)) => a.total_cmp(b),
                _ => Ordering::Equal,
            })
    }
}

impl PartialOrd for NumericId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NumericId {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NumericId {}

impl fmt::Display for NumericId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericId::Int(i) => write!(f, "{}", i),
            NumericId::UInt(u) => write!(f, "{}", u),
            NumericId::Float(x) => write!(f, "{}", x),
        }
    }
}

pub type ProcessId = NumericId;
pub type ThreadId = NumericId;

/// Events of one trace, bucketed by process and then by thread.
///
/// Each thread's events keep the order they had in the source array.
pub type EventsByProcessAndThread<'a> =
    BTreeMap<ProcessId, BTreeMap<ThreadId, Vec<&'a TraceEvent>>>;

// ============================================================================
// Trace event types
// ============================================================================

/// A single entry of a Chrome trace.
///
/// `pid` and `tid` are `None` when the source value is missing or is not a
/// number; such events are kept by the parser but never partitioned.
/// Fields this type does not model are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TraceEvent {
    /// Phase character, see [`Phase`].
    #[serde(default)]
    pub ph: String,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub pid: Option<ProcessId>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub tid: Option<ThreadId>,
    #[serde(default)]
    pub cat: String,
    #[serde(default)]
    pub name: String,
    /// Timestamp in microseconds.
    #[serde(default)]
    pub ts: f64,
    /// Duration of complete (`X`) events, in microseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dur: Option<f64>,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TraceEvent {
    pub fn phase(&self) -> Phase {
        Phase::from_ph(&self.ph)
    }
}

/// Accept any JSON number as an id; anything else becomes `None`.
fn deserialize_lenient_id<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<NumericId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Deserialize::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => Some(NumericId::from_number(&n)),
        _ => None,
    })
}

/// Event phase, decoded from the `ph` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Begin,
    End,
    Complete,
    Instant,
    Counter,
    AsyncBegin,
    AsyncInstant,
    AsyncEnd,
    FlowStart,
    FlowStep,
    FlowEnd,
    Sample,
    ObjectCreated,
    ObjectSnapshot,
    ObjectDestroyed,
    Metadata,
    Mark,
    Unknown,
}

impl Phase {
    pub fn from_ph(ph: &str) -> Self {
        match ph {
            "B" => Phase::Begin,
            "E" => Phase::End,
            "X" => Phase::Complete,
            "I" | "i" => Phase::Instant,
            "C" => Phase::Counter,
            "b" | "S" => Phase::AsyncBegin,
            "n" | "T" | "p" => Phase::AsyncInstant,
            "e" | "F" => Phase::AsyncEnd,
            "s" => Phase::FlowStart,
            "t" => Phase::FlowStep,
            "f" => Phase::FlowEnd,
            "P" => Phase::Sample,
            "N" => Phase::ObjectCreated,
            "O" => Phase::ObjectSnapshot,
            "D" => Phase::ObjectDestroyed,
            "M" => Phase::Metadata,
            "R" => Phase::Mark,
            _ => Phase::Unknown,
        }
    }
}

// ============================================================================
// Format detection
// ============================================================================

/// Shape of a Chrome trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    /// `{ "traceEvents": [...], ... }`
    Object,
    /// `[...]`
    Array,
}

/// Raw trace input, either unparsed text or an already parsed JSON value.
#[derive(Debug, Clone, Copy)]
pub enum TraceInput<'a> {
    Text(&'a str),
    Value(&'a serde_json::Value),
}

impl<'a> From<&'a str> for TraceInput<'a> {
    fn from(text: &'a str) -> Self {
        TraceInput::Text(text)
    }
}

impl<'a> From<&'a String> for TraceInput<'a> {
    fn from(text: &'a String) -> Self {
        TraceInput::Text(text)
    }
}

impl<'a> From<&'a serde_json::Value> for TraceInput<'a> {
    fn from(value: &'a serde_json::Value) -> Self {
        TraceInput::Value(value)
    }
}

/// Classify a parsed trace value.
pub fn detect_trace_format(value: &serde_json::Value) -> Result<TraceFormat> {
    match value {
        serde_json::Value::Object(map) if map.contains_key("traceEvents") => {
            Ok(TraceFormat::Object)
        }
        serde_json::Value::Array(_) => Ok(TraceFormat::Array),
        _ => Err(TraceError::UnsupportedTraceFormat(
            "expected an array of events or an object with 'traceEvents'".into(),
        )),
    }
}

// ============================================================================
// Ingestion
// ============================================================================

/// Parse a Chrome trace into a [`ProfileGroup`].
///
/// Each call is independent; no state is kept between calls.
pub fn parse_chrome_trace<'a>(input: impl Into<TraceInput<'a>>) -> Result<ProfileGroup> {
    let events = parse_chrome_trace_events(input)?;
    Ok(parse_chrome_trace_array_format(&events))
}

/// Detect the trace format and decode its events.
///
/// Array elements that do not decode as a [`TraceEvent`] (non-objects, or
/// fields of the wrong JSON type) are skipped, not reported as errors.
pub fn parse_chrome_trace_events<'a>(input: impl Into<TraceInput<'a>>) -> Result<Vec<TraceEvent>> {
    match input.into() {
        TraceInput::Text(text) => {
            let value: serde_json::Value = serde_json::from_str(text)?;
            decode_events(&value)
        }
        TraceInput::Value(value) => decode_events(value),
    }
}

fn decode_events(value: &serde_json::Value) -> Result<Vec<TraceEvent>> {
    let elements = match detect_trace_format(value)? {
        TraceFormat::Array => value.as_array().map(Vec::as_slice).unwrap_or_default(),
        TraceFormat::Object => {
            debug!("Detected object trace format");
            return Err(TraceError::UnsupportedTraceFormat(
                "object format with 'traceEvents' is not supported yet".into(),
            ));
        }
    };

    debug!("Detected array trace format");
    let mut events = Vec::with_capacity(elements.len());
    for (index, element) in elements.iter().enumerate() {
        match TraceEvent::deserialize(element) {
            Ok(event) => events.push(event),
            Err(e) => debug!("Skipping malformed trace event {}: {}", index, e),
        }
    }
    Ok(events)
}

/// Bucket events by process id and thread id.
///
/// Events without a numeric `pid` or `tid` are skipped.
pub fn split_events_by_process_and_thread(events: &[TraceEvent]) -> EventsByProcessAndThread<'_> {
    let mut collections: EventsByProcessAndThread<'_> = BTreeMap::new();
    let mut skipped = 0usize;

    for event in events {
        let (Some(pid), Some(tid)) = (event.pid, event.tid) else {
            skipped += 1;
            continue;
        };

        collections
            .entry(pid)
            .or_default()
            .entry(tid)
            .or_default()
            .push(event);
    }

    if skipped > 0 {
        debug!("Skipped {} events without a numeric pid/tid", skipped);
    }

    collections
}

/// Build a [`ProfileGroup`] from array-format events.
pub fn parse_chrome_trace_array_format(events: &[TraceEvent]) -> ProfileGroup {
    build_profile_group(&split_events_by_process_and_thread(events))
}

/// Build a [`ProfileGroup`] from already partitioned events.
///
/// Per-thread profiles are not reconstructed yet, so the group's profile
/// list is empty.
// TODO: match B/E and X events per thread into call trees and emit one Profile per bucket.
pub fn build_profile_group(by_thread: &EventsByProcessAndThread<'_>) -> ProfileGroup {
    let thread_count: usize = by_thread.values().map(BTreeMap::len).sum();
    let event_count: usize = by_thread
        .values()
        .flat_map(|threads| threads.values())
        .map(Vec::len)
        .sum();

    info!(
        "Partitioned {} events into {} threads across {} processes",
        event_count,
        thread_count,
        by_thread.len()
    );

    ProfileGroup::new("chrometrace")
}

/// Merge every thread's events into one sequence ordered by timestamp.
///
/// Each thread's own order is preserved even when its timestamps are not
/// monotonic; among threads, the event with the smallest head timestamp is
/// taken next, and equal timestamps are taken in (pid, tid) order.
pub fn merge_thread_timelines<'a>(
    by_thread: &EventsByProcessAndThread<'a>,
) -> Result<Vec<&'a TraceEvent>> {
    let threads: Vec<&Vec<&'a TraceEvent>> = by_thread
        .values()
        .flat_map(|threads| threads.values())
        .collect();
    let total: usize = threads.iter().map(|events| events.len()).sum();

    // Slots follow (pid, tid) order, so (ts, slot) breaks timestamp ties.
    // Payload is the position of the event within its thread.
    let mut heap: MinHeap<usize, (f64, usize)> = MinHeap::with_capacity(threads.len());
    for (slot, events) in threads.iter().enumerate() {
        if let Some(first) = events.first() {
            heap.insert((first.ts, slot), 0)?;
        }
    }

    let mut merged = Vec::with_capacity(total);
    while !heap.is_empty() {
        let HeapNode {
            priority: (_, slot),
            node: position,
        } = heap.extract_min()?;
        let events = threads[slot];
        merged.push(events[position]);

        if let Some(next) = events.get(position + 1) {
            heap.insert((next.ts, slot), position + 1)?;
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(pid: serde_json::Value, tid: serde_json::Value, name: &str, ts: f64) -> serde_json::Value {
        json!({
            "ph": "B",
            "pid": pid,
            "tid": tid,
            "cat": "",
            "name": name,
            "ts": ts,
            "args": []
        })
    }

    fn events(value: serde_json::Value) -> Vec<TraceEvent> {
        serde_json::from_value(value).unwrap()
    }

    fn id(i: i64) -> NumericId {
        NumericId::Int(i)
    }

    #[test]
    fn test_split_by_thread_id() {
        let trace = events(json!([
            event(json!(0), json!(0), "a", 0.0),
            event(json!(0), json!(1), "b", 0.0),
        ]));

        let split = split_events_by_process_and_thread(&trace);
        assert_eq!(split[&id(0)][&id(0)], vec![&trace[0]]);
        assert_eq!(split[&id(0)][&id(1)], vec![&trace[1]]);
    }

    #[test]
    fn test_split_preserves_order_and_drops_malformed() {
        let trace = events(json!([
            event(json!(1), json!(7), "first", 30.0),
            event(json!("1"), json!(7), "string pid", 0.0),
            event(json!(2), json!(3), "other process", 5.0),
            event(json!(1), json!(null), "null tid", 0.0),
            event(json!(1), json!(7.5), "fractional tid", 0.0),
            event(json!(1), json!(7), "second", 10.0),
            {"ph": "M", "name": "no ids"},
        ]));

        let split = split_events_by_process_and_thread(&trace);

        assert_eq!(split.len(), 2);
        let names: Vec<&str> = split[&id(1)][&id(7)].iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(split[&id(1)][&NumericId::Float(7.5)].len(), 1);
        assert_eq!(split[&id(2)][&id(3)].len(), 1);

        let partitioned: usize = split
            .values()
            .flat_map(|threads| threads.values())
            .map(Vec::len)
            .sum();
        assert_eq!(partitioned, 4);
    }

    #[test]
    fn test_integral_float_ids_accepted() {
        let trace = events(json!([event(json!(4.0), json!(-2), "a", 0.0)]));

        assert_eq!(trace[0].pid, Some(id(4)));
        assert_eq!(trace[0].tid, Some(id(-2)));
    }

    #[test]
    fn test_any_number_is_an_id() {
        let trace = events(json!([
            event(json!(1), json!(7.5), "fractional", 3.0),
            event(json!(1), json!(u64::MAX), "above i64", 1.0),
            event(json!(1), json!(-3), "negative", 2.0),
            event(json!(1), json!(7), "integral", 0.0),
        ]));
        assert_eq!(trace[1].tid, Some(NumericId::UInt(u64::MAX)));

        let split = split_events_by_process_and_thread(&trace);
        let tids: Vec<String> = split[&id(1)].keys().map(ToString::to_string).collect();
        assert_eq!(tids, vec!["-3", "7", "7.5", "18446744073709551615"]);

        let merged = merge_thread_timelines(&split).unwrap();
        assert_eq!(merged.len(), 4);
    }

    #[test]
    fn test_numeric_id_normalization() {
        assert_eq!(NumericId::from(4.0_f64), id(4));
        assert_eq!(NumericId::from(-0.0_f64), id(0));
        assert_eq!(NumericId::from(1u64 << 63), NumericId::UInt(1 << 63));
        assert_eq!(NumericId::from(42u64), id(42));
        assert!(matches!(NumericId::from(0.25_f64), NumericId::Float(_)));

        assert!(id(i64::MAX) < NumericId::UInt(i64::MAX as u64 + 1));
        assert!(id(7) < NumericId::Float(7.5));
        assert!(NumericId::Float(7.5) < id(8));
        assert_ne!(id(i64::MAX - 1), id(i64::MAX));
    }

    #[test]
    fn test_malformed_elements_skipped() {
        let value = json!([
            event(json!(1), json!(1), "kept", 0.0),
            {"ph": "B", "pid": 1, "tid": 1, "name": 42, "ts": "x"},
            1,
            "not an event",
            event(json!(1), json!(2), "also kept", 4.0),
        ]);

        let decoded = parse_chrome_trace_events(&value).unwrap();
        let names: Vec<&str> = decoded.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["kept", "also kept"]);

        let split = split_events_by_process_and_thread(&decoded);
        assert_eq!(split[&id(1)].len(), 2);

        let group = parse_chrome_trace(&value).unwrap();
        assert_eq!(group.name, "chrometrace");
    }

    #[test]
    fn test_build_profile_group_from_partitions() {
        let trace = events(json!([
            event(json!(1), json!(1), "a", 0.0),
            event(json!(2), json!(1), "b", 1.0),
        ]));

        let split = split_events_by_process_and_thread(&trace);
        let group = build_profile_group(&split);
        assert_eq!(group.name, "chrometrace");
        assert!(group.profiles.is_empty());
    }

    #[test]
    fn test_extra_fields_pass_through() {
        let trace = events(json!([{
            "ph": "X",
            "pid": 1,
            "tid": 2,
            "name": "task",
            "ts": 5,
            "dur": 12.5,
            "id": "0x1f",
            "sf": 3
        }]));

        let event = &trace[0];
        assert_eq!(event.phase(), Phase::Complete);
        assert_eq!(event.dur, Some(12.5));
        assert_eq!(event.cat, "");
        assert_eq!(event.extra["id"], "0x1f");
        assert_eq!(event.extra["sf"], 3);

        let round = serde_json::to_value(event).unwrap();
        assert_eq!(round["id"], "0x1f");
        assert_eq!(round["pid"], 1);
    }

    #[test]
    fn test_detect_array_format() {
        assert_eq!(detect_trace_format(&json!([])).unwrap(), TraceFormat::Array);
        assert_eq!(
            detect_trace_format(&json!([event(json!(0), json!(0), "a", 0.0)])).unwrap(),
            TraceFormat::Array
        );
    }

    #[test]
    fn test_detect_object_format() {
        let value = json!({"traceEvents": [], "displayTimeUnit": "ms"});
        assert_eq!(detect_trace_format(&value).unwrap(), TraceFormat::Object);
    }

    #[test]
    fn test_detect_rejects_other_shapes() {
        for value in [
            json!({"nodes": []}),
            json!("trace"),
            json!(42),
            json!(null),
        ] {
            assert!(matches!(
                detect_trace_format(&value),
                Err(TraceError::UnsupportedTraceFormat(_))
            ));
        }
    }

    #[test]
    fn test_parse_array_format() {
        let input = r#"[
            {"ph": "B", "pid": 0, "tid": 0, "cat": "", "name": "a", "ts": 0, "args": []},
            {"ph": "E", "pid": 0, "tid": 0, "cat": "", "name": "a", "ts": 4, "args": []}
        ]"#;

        let group = parse_chrome_trace(input).unwrap();
        assert_eq!(group.name, "chrometrace");
        assert_eq!(group.trace_id, "");
        assert_eq!(group.active_profile_index, 0);
        assert!(group.profiles.is_empty());
    }

    #[test]
    fn test_parse_accepts_parsed_value() {
        let value = json!([event(json!(0), json!(0), "a", 0.0)]);
        let group = parse_chrome_trace(&value).unwrap();
        assert_eq!(group.name, "chrometrace");
    }

    #[test]
    fn test_parse_object_format_unsupported() {
        let err = parse_chrome_trace(r#"{"traceEvents": []}"#).unwrap_err();
        assert!(matches!(err, TraceError::UnsupportedTraceFormat(_)));
    }

    #[test]
    fn test_parse_invalid_json() {
        let err = parse_chrome_trace("[{").unwrap_err();
        assert!(matches!(err, TraceError::Json(_)));
    }

    #[test]
    fn test_merge_orders_across_threads() {
        let trace = events(json!([
            event(json!(1), json!(1), "t1-a", 0.0),
            event(json!(1), json!(2), "t2-a", 5.0),
            event(json!(1), json!(1), "t1-b", 10.0),
            event(json!(2), json!(1), "p2-a", 2.0),
            event(json!(1), json!(2), "t2-b", 7.0),
            event(json!("x"), json!(1), "dropped", 1.0),
        ]));

        let split = split_events_by_process_and_thread(&trace);
        let merged = merge_thread_timelines(&split).unwrap();
        let names: Vec<&str> = merged.iter().map(|e| e.name.as_str()).collect();

        assert_eq!(names, vec!["t1-a", "p2-a", "t2-a", "t2-b", "t1-b"]);
    }

    #[test]
    fn test_merge_keeps_thread_order_when_unsorted() {
        let trace = events(json!([
            event(json!(1), json!(1), "late", 20.0),
            event(json!(1), json!(1), "early", 1.0),
            event(json!(1), json!(2), "middle", 10.0),
        ]));

        let split = split_events_by_process_and_thread(&trace);
        let merged = merge_thread_timelines(&split).unwrap();
        let names: Vec<&str> = merged.iter().map(|e| e.name.as_str()).collect();

        assert_eq!(names, vec!["middle", "late", "early"]);
    }

    #[test]
    fn test_merge_ties_follow_thread_order() {
        // Source order is the reverse of (pid, tid) order.
        let trace = events(json!([
            event(json!(2), json!(1), "d", 5.0),
            event(json!(1), json!(3), "c", 5.0),
            event(json!(1), json!(2), "b", 5.0),
            event(json!(1), json!(1), "a", 5.0),
            event(json!(1), json!(3), "c2", 6.0),
            event(json!(1), json!(1), "a2", 6.0),
        ]));

        let split = split_events_by_process_and_thread(&trace);
        let merged = merge_thread_timelines(&split).unwrap();
        let names: Vec<&str> = merged.iter().map(|e| e.name.as_str()).collect();

        assert_eq!(names, vec!["a", "b", "c", "d", "a2", "c2"]);
    }

    #[test]
    fn test_phase_decoding() {
        assert_eq!(Phase::from_ph("B"), Phase::Begin);
        assert_eq!(Phase::from_ph("E"), Phase::End);
        assert_eq!(Phase::from_ph("i"), Phase::Instant);
        assert_eq!(Phase::from_ph("M"), Phase::Metadata);
        assert_eq!(Phase::from_ph("?"), Phase::Unknown);
    }
}
