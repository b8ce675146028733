//! Short-term average over long-term average.
//!
//! Both averages run over windows that start at each sample and look forward.
//! Near the end of the signal the windows shrink to whatever samples remain,
//! so the ratio is defined for every input sample.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{PickError, Result};
use crate::filter::fftconvolve;
use crate::numeric::find_peaks;
use crate::picking::{peak_order, AbortFlag, DetectionResult, Detector};
use crate::record::Method;
use crate::util::{check_sample_rate, mean};

/// How the windowed sums are computed. All three agree to rounding error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StaLtaMethod {
    /// FFT convolution with a boxcar, O(n log n).
    #[default]
    Convolution,
    /// One running sum `S` over the signal; each window sum is
    /// `S[min(i + w, n)] - S[i]`, O(n).
    PrefixSum,
    /// Direct mean per position, O(n * window). Reference only.
    Iterative,
}

impl std::str::FromStr for StaLtaMethod {
    type Err = PickError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "convolution" => Ok(Self::Convolution),
            "prefix-sum" | "strides" => Ok(Self::PrefixSum),
            "iterative" => Ok(Self::Iterative),
            other => Err(PickError::config(format!("unknown STA/LTA method '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaLta {
    /// Short window in seconds.
    pub sta_length: f64,
    /// Long window in seconds.
    pub lta_length: f64,
    pub method: StaLtaMethod,
}

impl Default for StaLta {
    fn default() -> Self {
        Self {
            sta_length: 5.0,
            lta_length: 100.0,
            method: StaLtaMethod::Convolution,
        }
    }
}

impl StaLta {
    pub fn new(sta_length: f64, lta_length: f64) -> Result<Self> {
        let detector = Self { sta_length, lta_length, method: StaLtaMethod::default() };
        detector.validate()?;
        Ok(detector)
    }

    pub fn with_method(mut self, method: StaLtaMethod) -> Self {
        self.method = method;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sta_length > 0.0) {
            return Err(PickError::config(format!(
                "sta_length must be positive, got {}",
                self.sta_length
            )));
        }
        if !(self.lta_length > 0.0) {
            return Err(PickError::config(format!(
                "lta_length must be positive, got {}",
                self.lta_length
            )));
        }
        if self.sta_length >= self.lta_length {
            return Err(PickError::config(format!(
                "sta_length ({}) must be shorter than lta_length ({})",
                self.sta_length, self.lta_length
            )));
        }
        Ok(())
    }

    /// STA/LTA ratio for every sample of `x`.
    pub fn characteristic_function(&self, x: &[f64], fs: f64) -> Result<Vec<f64>> {
        check_sample_rate(fs)?;
        self.validate()?;

        let n = x.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let sta = window_samples(self.sta_length, fs, n);
        let lta = window_samples(self.lta_length, fs, n);
        debug!("STA/LTA over {} samples: sta={} lta={} ({:?})", n, sta, lta, self.method);

        let m = mean(x);
        let x_norm: Vec<f64> = x.iter().map(|&v| (v - m).abs()).collect();

        let cf = match self.method {
            StaLtaMethod::Convolution => {
                let sta_sum = boxcar_sums(&x_norm, sta);
                let lta_sum = boxcar_sums(&x_norm, lta);
                (0..n)
                    .map(|i| ratio(sta_sum[i], sta.min(n - i), lta_sum[i], lta.min(n - i)))
                    .collect()
            }
            StaLtaMethod::PrefixSum => {
                let mut cumsum = Vec::with_capacity(n + 1);
                cumsum.push(0.0);
                let mut acc = 0.0;
                for &v in &x_norm {
                    acc += v;
                    cumsum.push(acc);
                }
                (0..n)
                    .map(|i| {
                        let s_end = (i + sta).min(n);
                        let l_end = (i + lta).min(n);
                        ratio(cumsum[s_end] - cumsum[i], s_end - i, cumsum[l_end] - cumsum[i], l_end - i)
                    })
                    .collect()
            }
            StaLtaMethod::Iterative => (0..n)
                .map(|i| {
                    let s = &x_norm[i..(i + sta).min(n)];
                    let l = &x_norm[i..(i + lta).min(n)];
                    ratio(s.iter().sum(), s.len(), l.iter().sum(), l.len())
                })
                .collect(),
        };
        Ok(cf)
    }
}

impl Detector for StaLta {
    fn method(&self) -> Method {
        Method::StaLta
    }

    fn run_abortable(
        &self,
        x: &[f64],
        fs: f64,
        threshold: Option<f64>,
        peak_window: f64,
        abort: &AbortFlag,
    ) -> Result<DetectionResult> {
        abort.check()?;
        let cf = self.characteristic_function(x, fs)?;
        let events = find_peaks(&cf, threshold, peak_order(peak_window, fs)?)?;
        debug!("STA/LTA found {} candidates", events.len());
        Ok(DetectionResult { events, cf })
    }
}

fn window_samples(seconds: f64, fs: f64, n: usize) -> usize {
    ((seconds * fs).round() as usize + 1).min(n)
}

/// Forward sums `sum(x[i..i + w])` for every `i`, truncated at the end.
fn boxcar_sums(x: &[f64], w: usize) -> Vec<f64> {
    let full = fftconvolve(&vec![1.0; w], x);
    // Sums of non-negative samples; clamp FFT round-off below zero.
    full[w - 1..w - 1 + x.len()].iter().map(|&s| s.max(0.0)).collect()
}

fn ratio(sta_sum: f64, sta_len: usize, lta_sum: f64, lta_len: usize) -> f64 {
    if lta_sum <= 0.0 {
        return 0.0;
    }
    (sta_sum / sta_len as f64) / (lta_sum / lta_len as f64)
}
