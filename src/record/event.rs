use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{PickError, Result};
use crate::record::trace::Trace;

/// Which algorithm produced (or last moved) a pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Method {
    #[default]
    #[serde(rename = "other")]
    Other,
    #[serde(rename = "AR-refiner")]
    ArRefiner,
    #[serde(rename = "STALTA")]
    StaLta,
    #[serde(rename = "STALTA+AR-refiner")]
    StaLtaAr,
    #[serde(rename = "AMPA")]
    Ampa,
    #[serde(rename = "AMPA+AR-refiner")]
    AmpaAr,
}

impl Method {
    /// Tag after an AR refinement pass.
    pub fn refined(self) -> Self {
        match self {
            Method::StaLta | Method::StaLtaAr => Method::StaLtaAr,
            Method::Ampa | Method::AmpaAr => Method::AmpaAr,
            Method::Other | Method::ArRefiner => Method::ArRefiner,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Other => "other",
            Method::ArRefiner => "AR-refiner",
            Method::StaLta => "STALTA",
            Method::StaLtaAr => "STALTA+AR-refiner",
            Method::Ampa => "AMPA",
            Method::AmpaAr => "AMPA+AR-refiner",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Manual,
    Automatic,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Manual => "manual",
            Mode::Automatic => "automatic",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Freshly detected and not yet looked at.
    #[default]
    Preliminary,
    Revised,
    Confirmed,
    Rejected,
    Undefined,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Preliminary => "preliminary",
            Status::Revised => "revised",
            Status::Confirmed => "confirmed",
            Status::Rejected => "rejected",
            Status::Undefined => "undefined",
        })
    }
}

/// Typed edit of the user-facing event fields. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditEventRequest {
    pub time: Option<i64>,
    pub name: Option<String>,
    pub comments: Option<String>,
    pub status: Option<Status>,
    pub phase_hint: Option<String>,
}

/// A pick on a trace. `time` is a sample index into the owning trace's signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub(crate) id: Uuid,
    pub(crate) trace_id: Uuid,
    pub(crate) time: usize,
    pub name: String,
    pub comments: String,
    pub method: Method,
    pub mode: Mode,
    pub status: Status,
    pub phase_hint: Option<String>,
    pub author: Option<String>,
    pub created_at: OffsetDateTime,
    pub(crate) aic: Option<Vec<f64>>,
    pub(crate) n0_aic: Option<usize>,
}

impl Event {
    pub fn new(trace: &Trace, time: i64, method: Method, mode: Mode, status: Status) -> Result<Self> {
        let time = check_position(time, trace.len())?;
        Ok(Self {
            id: Uuid::new_v4(),
            trace_id: trace.id(),
            time,
            name: String::new(),
            comments: String::new(),
            method,
            mode,
            status,
            phase_hint: None,
            author: None,
            created_at: OffsetDateTime::now_utc(),
            aic: None,
            n0_aic: None,
        })
    }

    /// A user-placed pick.
    pub fn manual(trace: &Trace, time: i64) -> Result<Self> {
        Self::new(trace, time, Method::Other, Mode::Manual, Status::Preliminary)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn time(&self) -> usize {
        self.time
    }

    /// AIC trace left by the last AR refinement, if any.
    pub fn aic(&self) -> Option<&[f64]> {
        self.aic.as_deref()
    }

    /// Sample index where [`Event::aic`] starts.
    pub fn n0_aic(&self) -> Option<usize> {
        self.n0_aic
    }

    /// Characteristic-function value under this pick, NaN when the trace's cf
    /// does not reach that far.
    pub fn cf_value(&self, trace: &Trace) -> f64 {
        trace.cf_at(self.time)
    }

    pub fn time_seconds(&self, fs: f64) -> f64 {
        self.time as f64 / fs
    }

    pub fn apply_edit(&mut self, edit: &EditEventRequest, signal_len: usize) -> Result<()> {
        // Validate before touching anything so a bad edit is all-or-nothing.
        let time = edit.time.map(|t| check_position(t, signal_len)).transpose()?;
        if let Some(time) = time {
            self.time = time;
        }
        if let Some(name) = &edit.name {
            self.name = name.clone();
        }
        if let Some(comments) = &edit.comments {
            self.comments = comments.clone();
        }
        if let Some(status) = edit.status {
            self.status = status;
        }
        if let Some(phase_hint) = &edit.phase_hint {
            self.phase_hint = Some(phase_hint.clone());
        }
        Ok(())
    }

    pub(crate) fn set_refinement(&mut self, time: usize, aic: Vec<f64>, n0_aic: usize) {
        self.time = time;
        self.aic = Some(aic);
        self.n0_aic = Some(n0_aic);
        self.method = self.method.refined();
    }
}

/// Two events are the same pick when a person would call them the same:
/// same position, provenance, status and annotations. Identity and
/// bookkeeping fields are ignored.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time
            && self.method == other.method
            && self.mode == other.mode
            && self.status == other.status
            && self.name == other.name
            && self.comments == other.comments
    }
}

fn check_position(time: i64, len: usize) -> Result<usize> {
    if time < 0 || time as u64 >= len as u64 {
        return Err(PickError::InvalidPosition { time, len });
    }
    Ok(time as usize)
}
