//! Runs detectors over traces and folds their output into event lists.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{PickError, Result};
use crate::picking::{AbortFlag, Algorithm, ArRefiner, Detector};
use crate::record::{Event, Mode, Status, Trace};
use crate::worker;

/// What happens to a trace's existing events when detection adds new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Action {
    #[default]
    Append,
    /// Drop the existing events first.
    Clear,
}

impl FromStr for Action {
    type Err = PickError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "append" => Ok(Action::Append),
            "clear" => Ok(Action::Clear),
            other => Err(PickError::config(format!(
                "unknown action '{}', expected 'append' or 'clear'",
                other
            ))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Append => f.write_str("append"),
            Action::Clear => f.write_str("clear"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// `None` picks the single strongest sample instead of thresholding.
    pub threshold: Option<f64>,
    /// Half-width of the peak search window, in seconds.
    pub peak_window: f64,
    /// Refine every new event with the AR refiner.
    pub takanami: bool,
    /// Seconds searched on either side of an event during refinement.
    pub takanami_margin: f64,
    pub action: Action,
    pub allow_multiprocessing: bool,
    pub processes: usize,
    /// Worker executable for the multi-process path. Defaults to
    /// `seispick-worker` next to the running executable.
    pub worker_program: Option<PathBuf>,
    pub refiner: ArRefiner,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: None,
            peak_window: 1.0,
            takanami: false,
            takanami_margin: 5.0,
            action: Action::Append,
            allow_multiprocessing: true,
            processes: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            worker_program: None,
            refiner: ArRefiner::default(),
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.threshold {
            if !t.is_finite() {
                return Err(PickError::config(format!("threshold must be finite, got {}", t)));
            }
        }
        if !(self.peak_window >= 0.0) {
            return Err(PickError::config(format!(
                "peak_window must be non-negative, got {}",
                self.peak_window
            )));
        }
        if self.takanami && !(self.takanami_margin > 0.0) {
            return Err(PickError::config(format!(
                "takanami_margin must be positive, got {}",
                self.takanami_margin
            )));
        }
        if self.processes == 0 {
            return Err(PickError::config("processes must be at least 1"));
        }
        self.refiner.validate()
    }
}

/// Runs `detector` over one trace and records the result on it.
///
/// The characteristic function replaces the trace's previous one. New events
/// are tagged automatic/preliminary with the detector's method, optionally
/// AR-refined, then appended to or substituted for the existing events
/// according to `config.action`. The trace is left untouched on error.
///
/// Returns the number of new events.
pub fn detect<D: Detector + ?Sized>(
    trace: &mut Trace,
    detector: &D,
    config: &DetectionConfig,
    abort: &AbortFlag,
) -> Result<usize> {
    config.validate()?;
    let result = detector.run_abortable(
        trace.samples(),
        trace.fs(),
        config.threshold,
        config.peak_window,
        abort,
    )?;

    let method = detector.method();
    let mut events = result
        .events
        .iter()
        .map(|&i| Event::new(trace, i as i64, method, Mode::Automatic, Status::Preliminary))
        .collect::<Result<Vec<_>>>()?;

    if config.takanami {
        let fs = trace.fs();
        for event in &mut events {
            abort.check()?;
            let t = event.time_seconds(fs);
            let r = config.refiner.run(
                trace.samples(),
                fs,
                t - config.takanami_margin,
                t + config.takanami_margin,
            )?;
            debug!("refined {} pick {} -> {}", method, event.time(), r.time);
            event.set_refinement(r.time, r.aic, r.n0_aic);
        }
    }

    let count = events.len();
    trace.cf = result.cf;
    match config.action {
        Action::Append => trace.events.extend(events),
        Action::Clear => trace.events = events,
    }
    Ok(count)
}

/// Result of one trace in a batch. Errors are carried as text so they can cross
/// a process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceOutcome {
    pub trace_id: Uuid,
    pub result: std::result::Result<usize, String>,
}

impl TraceOutcome {
    pub fn failed(trace_id: Uuid, reason: impl Into<String>) -> Self {
        Self { trace_id, result: Err(reason.into()) }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-trace outcomes of a batch, in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<TraceOutcome>,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &TraceOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(TraceOutcome::is_ok)
    }

    pub fn total_events(&self) -> usize {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok()).sum()
    }

    pub fn outcome(&self, trace_id: Uuid) -> Option<&TraceOutcome> {
        self.outcomes.iter().find(|o| o.trace_id == trace_id)
    }
}

/// Runs the single-trace pipeline over every trace.
///
/// With `allow_multiprocessing` and more than one process and trace, the traces
/// are split across worker processes; otherwise they run in order on this
/// thread. Both paths produce the same events and characteristic functions.
/// A failing trace never stops its siblings.
pub fn detect_batch(traces: &mut [Trace], algorithm: &Algorithm, config: &DetectionConfig) -> Result<BatchReport> {
    detect_batch_abortable(traces, algorithm, config, &AbortFlag::new())
}

/// [`detect_batch`] that stops when `abort` is raised. Traces not finished by
/// then are reported as aborted and keep their previous events.
pub fn detect_batch_abortable(
    traces: &mut [Trace],
    algorithm: &Algorithm,
    config: &DetectionConfig,
    abort: &AbortFlag,
) -> Result<BatchReport> {
    config.validate()?;
    let outcomes = if config.allow_multiprocessing && config.processes > 1 && traces.len() > 1 {
        worker::run_parallel(traces, algorithm, config, abort)?
    } else {
        run_sequential(traces, algorithm, config, abort)
    };

    let report = BatchReport { outcomes };
    info!(
        "{} detection over {} traces: {} events, {} failures",
        algorithm.method(),
        traces.len(),
        report.total_events(),
        report.failures().count()
    );
    Ok(report)
}

pub(crate) fn run_sequential(
    traces: &mut [Trace],
    algorithm: &Algorithm,
    config: &DetectionConfig,
    abort: &AbortFlag,
) -> Vec<TraceOutcome> {
    traces
        .iter_mut()
        .map(|trace| {
            let result = detect(trace, algorithm, config, abort).map_err(|e| {
                warn!("detection failed on {}: {}", trace.source(), e);
                e.to_string()
            });
            TraceOutcome { trace_id: trace.id(), result }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picking::{Ampa, StaLta};
    use crate::record::{Method, Signal};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const FS: f64 = 50.0;

    fn trace_with_arrival(seed: u64, seconds: f64, onset: usize) -> Trace {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = (FS * seconds) as usize;
        let x = (0..n)
            .map(|i| {
                let noise: f64 = (0..6).map(|_| rng.gen_range(-0.1..0.1)).sum();
                if i >= onset {
                    let k = (i - onset) as f64;
                    noise + 1.5 * (-k / 200.0).exp() * (2.0 * std::f64::consts::PI * 6.0 * k / FS).sin()
                } else {
                    noise
                }
            })
            .collect();
        Trace::new(Signal::new(x, FS).unwrap())
    }

    fn sequential() -> DetectionConfig {
        DetectionConfig { allow_multiprocessing: false, ..DetectionConfig::default() }
    }

    fn short_ampa() -> Ampa {
        Ampa { filter_lengths: vec![10.0, 5.0, 2.5], ..Ampa::default() }
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("append".parse::<Action>().unwrap(), Action::Append);
        assert_eq!("clear".parse::<Action>().unwrap(), Action::Clear);
        assert!(matches!("merge".parse::<Action>(), Err(PickError::Configuration(_))));
        assert_eq!(Action::Clear.to_string(), "clear");
    }

    #[test]
    fn test_detect_tags_and_stores_cf() {
        let mut trace = trace_with_arrival(1, 60.0, 1500);
        let n = detect(&mut trace, &short_ampa(), &sequential(), &AbortFlag::new()).unwrap();
        assert_eq!(n, 1);
        assert_eq!(trace.cf().len(), trace.len() - 500);
        let e = &trace.events()[0];
        assert_eq!(e.method, Method::Ampa);
        assert_eq!(e.mode, Mode::Automatic);
        assert_eq!(e.status, Status::Preliminary);
        assert!(e.aic().is_none());
    }

    #[test]
    fn test_append_then_clear() {
        let mut trace = trace_with_arrival(2, 60.0, 1500);
        let manual = Event::manual(&trace, 100).unwrap();
        trace.add_event(manual).unwrap();

        let config = sequential();
        detect(&mut trace, &short_ampa(), &config, &AbortFlag::new()).unwrap();
        detect(&mut trace, &short_ampa(), &config, &AbortFlag::new()).unwrap();
        assert_eq!(trace.events().len(), 3);
        // Same input, same pick: equal as picks, distinct as records.
        assert_eq!(trace.events()[1], trace.events()[2]);
        assert_ne!(trace.events()[1].id(), trace.events()[2].id());

        let clear = DetectionConfig { action: Action::Clear, ..config };
        detect(&mut trace, &short_ampa(), &clear, &AbortFlag::new()).unwrap();
        assert_eq!(trace.events().len(), 1);
        assert_eq!(trace.events()[0].method, Method::Ampa);
    }

    #[test]
    fn test_refinement_upgrades_method() {
        let config = DetectionConfig { takanami: true, ..sequential() };

        let mut trace = trace_with_arrival(3, 60.0, 1500);
        detect(&mut trace, &short_ampa(), &config, &AbortFlag::new()).unwrap();
        let e = &trace.events()[0];
        assert_eq!(e.method, Method::AmpaAr);
        assert_eq!(e.method.as_str(), "AMPA+AR-refiner");
        assert!(e.aic().is_some());
        assert!((e.time() as i64 - 1500).abs() <= 10, "refined to {}", e.time());

        let mut trace = trace_with_arrival(4, 60.0, 1500);
        let stalta = StaLta::new(1.0, 10.0).unwrap();
        detect(&mut trace, &stalta, &config, &AbortFlag::new()).unwrap();
        assert!(trace.events().iter().all(|e| e.method == Method::StaLtaAr));
        assert_eq!(trace.events()[0].method.as_str(), "STALTA+AR-refiner");
    }

    #[test]
    fn test_failed_detection_leaves_trace_untouched() {
        let mut trace = trace_with_arrival(5, 30.0, 700);
        let existing = Event::manual(&trace, 10).unwrap();
        trace.add_event(existing).unwrap();
        let too_long = Ampa { filter_lengths: vec![50.0, 20.0], ..Ampa::default() };
        let err = detect(&mut trace, &too_long, &sequential(), &AbortFlag::new()).unwrap_err();
        assert!(matches!(err, PickError::Configuration(_)));
        assert_eq!(trace.events().len(), 1);
        assert!(trace.cf().is_empty());
    }

    #[test]
    fn test_sequential_batch_reports_per_trace_failure() {
        let mut traces = vec![
            trace_with_arrival(6, 60.0, 1500),
            trace_with_arrival(7, 30.0, 700),
            trace_with_arrival(8, 60.0, 1200),
        ];
        let algorithm = Algorithm::from(Ampa { filter_lengths: vec![40.0, 10.0], ..Ampa::default() });
        let report = detect_batch(&mut traces, &algorithm, &sequential()).unwrap();

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.outcomes[0].result, Ok(1));
        assert!(report.outcomes[1].result.is_err());
        assert_eq!(report.outcomes[2].result, Ok(1));
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.total_events(), 2);
        assert!(traces[1].events().is_empty());
        assert_eq!(report.outcome(traces[2].id()), Some(&report.outcomes[2]));
    }

    #[test]
    fn test_config_validation() {
        let mut trace = trace_with_arrival(9, 30.0, 700);
        let bad = DetectionConfig { processes: 0, ..sequential() };
        assert!(detect(&mut trace, &short_ampa(), &bad, &AbortFlag::new()).is_err());
        let bad = DetectionConfig { takanami: true, takanami_margin: 0.0, ..sequential() };
        assert!(detect(&mut trace, &short_ampa(), &bad, &AbortFlag::new()).is_err());
        let bad = DetectionConfig { peak_window: -1.0, ..sequential() };
        assert!(detect(&mut trace, &short_ampa(), &bad, &AbortFlag::new()).is_err());
    }

    #[test]
    fn test_abort_before_detection() {
        let mut trace = trace_with_arrival(10, 60.0, 1500);
        let flag = AbortFlag::new();
        flag.abort();
        let algorithm = Algorithm::from(short_ampa());
        let outcomes = run_sequential(std::slice::from_mut(&mut trace), &algorithm, &sequential(), &flag);
        assert!(outcomes[0].result.as_ref().unwrap_err().contains("aborted"));
    }

    #[test]
    fn test_aborted_batch_leaves_traces_alone() {
        let mut traces = vec![trace_with_arrival(11, 60.0, 1500), trace_with_arrival(12, 60.0, 900)];
        let existing = Event::manual(&traces[0], 100).unwrap();
        traces[0].add_event(existing).unwrap();
        let flag = AbortFlag::new();
        flag.abort();

        let report = detect_batch_abortable(&mut traces, &Algorithm::from(short_ampa()), &sequential(), &flag).unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.failures().count(), 2);
        assert!(report.outcomes.iter().all(|o| o.result.as_ref().unwrap_err().contains("aborted")));
        assert_eq!(traces[0].events().len(), 1);
        assert!(traces.iter().all(|t| t.cf().is_empty()));
    }
}
