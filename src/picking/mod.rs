//! Detectors and the AR arrival-time refiner.

pub mod ampa;
pub mod qr;
pub mod stalta;
pub mod takanami;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{PickError, Result};
use crate::record::Method;

pub use ampa::{ampa, Ampa, FilterBank};
pub use stalta::{StaLta, StaLtaMethod};
pub use takanami::{takanami, ArRefiner, Refinement};

/// Cooperative cancellation shared between a caller and a running pass.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            return Err(PickError::Aborted);
        }
        Ok(())
    }
}

/// Candidate sample indices plus the characteristic function they were read from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    pub events: Vec<usize>,
    pub cf: Vec<f64>,
}

pub trait Detector {
    /// Tag given to events this detector creates.
    fn method(&self) -> Method;

    fn run_abortable(
        &self,
        x: &[f64],
        fs: f64,
        threshold: Option<f64>,
        peak_window: f64,
        abort: &AbortFlag,
    ) -> Result<DetectionResult>;

    fn run(&self, x: &[f64], fs: f64, threshold: Option<f64>, peak_window: f64) -> Result<DetectionResult> {
        self.run_abortable(x, fs, threshold, peak_window, &AbortFlag::default())
    }
}

/// Serializable choice of detector, shipped to worker processes as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Algorithm {
    StaLta(StaLta),
    Ampa(Ampa),
}

impl Detector for Algorithm {
    fn method(&self) -> Method {
        match self {
            Algorithm::StaLta(d) => d.method(),
            Algorithm::Ampa(d) => d.method(),
        }
    }

    fn run_abortable(
        &self,
        x: &[f64],
        fs: f64,
        threshold: Option<f64>,
        peak_window: f64,
        abort: &AbortFlag,
    ) -> Result<DetectionResult> {
        match self {
            Algorithm::StaLta(d) => d.run_abortable(x, fs, threshold, peak_window, abort),
            Algorithm::Ampa(d) => d.run_abortable(x, fs, threshold, peak_window, abort),
        }
    }
}

impl From<StaLta> for Algorithm {
    fn from(d: StaLta) -> Self {
        Algorithm::StaLta(d)
    }
}

impl From<Ampa> for Algorithm {
    fn from(d: Ampa) -> Self {
        Algorithm::Ampa(d)
    }
}

/// Peak-search half window in samples for a window given in seconds.
pub(crate) fn peak_order(peak_window: f64, fs: f64) -> Result<usize> {
    if !(peak_window >= 0.0) || !peak_window.is_finite() {
        return Err(PickError::config(format!(
            "peak_window must be a non-negative number of seconds, got {}",
            peak_window
        )));
    }
    Ok((peak_window * fs).round() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_flag_shared_between_clones() {
        let flag = AbortFlag::new();
        let observer = flag.clone();
        assert!(observer.check().is_ok());
        flag.abort();
        assert!(matches!(observer.check(), Err(PickError::Aborted)));
    }

    #[test]
    fn test_peak_order() {
        assert_eq!(peak_order(1.0, 100.0).unwrap(), 100);
        assert_eq!(peak_order(0.5, 50.0).unwrap(), 25);
        assert_eq!(peak_order(0.0, 50.0).unwrap(), 0);
        assert!(peak_order(-1.0, 50.0).is_err());
    }

    #[test]
    fn test_algorithm_tags() {
        assert_eq!(Algorithm::from(StaLta::default()).method(), Method::StaLta);
        assert_eq!(Algorithm::from(Ampa::default()).method(), Method::Ampa);
    }
}
