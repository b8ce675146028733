use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{PickError, Result};
use crate::picking::ArRefiner;
use crate::record::event::{EditEventRequest, Event};
use crate::util::check_sample_rate;

/// Immutable sampled waveform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    samples: Vec<f64>,
    fs: f64,
    start_time: Option<OffsetDateTime>,
}

impl Signal {
    pub fn new(samples: Vec<f64>, fs: f64) -> Result<Self> {
        check_sample_rate(fs)?;
        Ok(Self { samples, fs, start_time: None })
    }

    pub fn from_f32(samples: &[f32], fs: f64) -> Result<Self> {
        Self::new(samples.iter().map(|&s| s as f64).collect(), fs)
    }

    pub fn with_start_time(mut self, start_time: OffsetDateTime) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn fs(&self) -> f64 {
        self.fs
    }

    pub fn start_time(&self) -> Option<OffsetDateTime> {
        self.start_time
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.fs
    }
}

/// SEED-style stream code, kept as plain provenance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.network, self.station, self.location, self.channel)
    }
}

/// One channel: its signal, its picks and its latest characteristic function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    id: Uuid,
    pub stream: Option<StreamId>,
    pub label: Option<String>,
    signal: Signal,
    pub(crate) events: Vec<Event>,
    pub(crate) cf: Vec<f64>,
}

impl Trace {
    pub fn new(signal: Signal) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream: None,
            label: None,
            signal,
            events: Vec::new(),
            cf: Vec::new(),
        }
    }

    pub fn with_stream(mut self, stream: StreamId) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Human-readable source name: label, then stream code, then id.
    pub fn source(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        match &self.stream {
            Some(stream) => stream.to_string(),
            None => self.id.to_string(),
        }
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    pub fn samples(&self) -> &[f64] {
        self.signal.samples()
    }

    pub fn fs(&self) -> f64 {
        self.signal.fs()
    }

    pub fn len(&self) -> usize {
        self.signal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn event(&self, id: Uuid) -> Option<&Event> {
        self.events.iter().find(|e| e.id() == id)
    }

    pub fn cf(&self) -> &[f64] {
        &self.cf
    }

    pub fn cf_at(&self, index: usize) -> f64 {
        self.cf.get(index).copied().unwrap_or(f64::NAN)
    }

    /// Adds an event created for this trace.
    pub fn add_event(&mut self, event: Event) -> Result<()> {
        if event.trace_id() != self.id {
            return Err(PickError::config(format!(
                "event {} belongs to trace {}, not {}",
                event.id(),
                event.trace_id(),
                self.id
            )));
        }
        if event.time() >= self.len() {
            return Err(PickError::InvalidPosition { time: event.time() as i64, len: self.len() });
        }
        self.events.push(event);
        Ok(())
    }

    pub fn remove_event(&mut self, id: Uuid) -> Option<Event> {
        let pos = self.events.iter().position(|e| e.id() == id)?;
        Some(self.events.remove(pos))
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn sort_events(&mut self) {
        self.events.sort_by_key(|e| e.time());
    }

    pub fn edit_event(&mut self, id: Uuid, edit: &EditEventRequest) -> Result<()> {
        let len = self.len();
        let event = self
            .events
            .iter_mut()
            .find(|e| e.id() == id)
            .ok_or_else(|| PickError::config(format!("no event {} on trace {}", id, self.id)))?;
        event.apply_edit(edit, len)
    }

    /// AR-refines the listed events in place, searching `margin` seconds on
    /// either side of each one. Returns how many events were refined.
    ///
    /// All or nothing: if any event fails to refine, none is changed.
    pub fn refine_events(&mut self, ids: &[Uuid], margin: f64, refiner: &ArRefiner) -> Result<usize> {
        if !(margin > 0.0) || !margin.is_finite() {
            return Err(PickError::config(format!("refinement margin must be positive, got {}", margin)));
        }
        let fs = self.signal.fs();
        let refinements = self
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| ids.contains(&e.id()))
            .map(|(index, e)| {
                let t = e.time_seconds(fs);
                refiner.run(self.signal.samples(), fs, t - margin, t + margin).map(|r| (index, r))
            })
            .collect::<Result<Vec<_>>>()?;

        let refined = refinements.len();
        for (index, r) in refinements {
            self.events[index].set_refinement(r.time, r.aic, r.n0_aic);
        }
        Ok(refined)
    }
}
