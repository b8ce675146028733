//! Flat, one-row-per-event view over a set of traces.
//!
//! Writing the rows out (CSV, JSON, ...) is left to the caller; every row
//! derives `Serialize`.

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::Duration;

use crate::record::event::{Method, Mode, Status};
use crate::record::trace::Trace;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRow {
    pub source: String,
    pub sample: usize,
    /// Seconds from the start of the signal.
    pub time: f64,
    /// RFC 3339 arrival time, when the signal has a start time.
    pub absolute_time: Option<String>,
    pub cf_value: f64,
    pub name: String,
    pub method: Method,
    pub mode: Mode,
    pub status: Status,
    pub comments: String,
}

pub fn rows<'a>(traces: impl IntoIterator<Item = &'a Trace>) -> Vec<EventRow> {
    let mut out = Vec::new();
    for trace in traces {
        let source = trace.source();
        let fs = trace.fs();
        for event in trace.events() {
            let time = event.time_seconds(fs);
            let absolute_time = trace
                .signal()
                .start_time()
                .and_then(|start| (start + Duration::seconds_f64(time)).format(&Rfc3339).ok());
            out.push(EventRow {
                source: source.clone(),
                sample: event.time(),
                time,
                absolute_time,
                cf_value: event.cf_value(trace),
                name: event.name.clone(),
                method: event.method,
                mode: event.mode,
                status: event.status,
                comments: event.comments.clone(),
            });
        }
    }
    out
}
