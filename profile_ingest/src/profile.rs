//! Normalized output of trace ingestion.

use crate::chrome::{ProcessId, ThreadId};
use serde::Serialize;

/// One thread's reconstructed execution timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub name: String,
    pub pid: ProcessId,
    pub tid: ThreadId,
    /// Timestamp of the first event, in the trace's time unit.
    pub start: f64,
    /// Timestamp of the last event, in the trace's time unit.
    pub end: f64,
    pub event_count: usize,
}

/// A set of profiles ingested from a single trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileGroup {
    /// Tag of the format the group was ingested from, e.g. `chrometrace`.
    pub name: String,
    #[serde(rename = "traceID")]
    pub trace_id: String,
    pub active_profile_index: usize,
    pub profiles: Vec<Profile>,
}

impl ProfileGroup {
    /// An empty group for the given source format.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trace_id: String::new(),
            active_profile_index: 0,
            profiles: Vec::new(),
        }
    }

    /// The profile selected by `active_profile_index`, if it exists.
    pub fn active_profile(&self) -> Option<&Profile> {
        self.profiles.get(self.active_profile_index)
    }
}
