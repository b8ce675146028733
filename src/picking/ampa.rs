//! Adaptive Multi-band Picking Algorithm.
//!
//! A bank of short band-pass kernels turns the signal into per-band envelopes,
//! each band is normalized by its own noise floor, and the summed log-envelope
//! is passed through a cascade of asymmetric enhancement filters whose outputs
//! are multiplied together. A sample only survives if every filter length
//! agrees there is a rising edge.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{PickError, Result};
use crate::filter::{hilbert, lfilter};
use crate::numeric::{find_peaks, percentile};
use crate::picking::{peak_order, AbortFlag, DetectionResult, Detector};
use crate::record::Method;
use crate::util::{check_sample_rate, demean, seconds_to_samples};

/// Number of non-zero taps in each band kernel.
const KERNEL_TAPS: usize = 32;
/// Padded kernel length; the quadrature kernel spreads over all of it.
const KERNEL_LEN: usize = 512;

/// Band layout of the filter bank, in Hz.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterBank {
    pub bandwidth: f64,
    pub overlap: f64,
    /// Lower edge of every band; upper edges are `lo + bandwidth`.
    pub band_starts: Vec<f64>,
}

impl FilterBank {
    /// Lays out bands from `f_start` in steps of `bandwidth - overlap`. The end
    /// frequency is capped at `fs / 2 - bandwidth` so the top band stays below
    /// Nyquist.
    pub fn new(fs: f64, f_start: f64, f_end_max: f64, bandwidth: f64, overlap: f64) -> Result<Self> {
        check_sample_rate(fs)?;
        if !(bandwidth > 0.0) {
            return Err(PickError::config(format!("bandwidth must be positive, got {}", bandwidth)));
        }
        if !(overlap >= 0.0) {
            return Err(PickError::config(format!("overlap must be non-negative, got {}", overlap)));
        }
        if overlap >= bandwidth {
            return Err(PickError::config(format!(
                "overlap ({}) must be smaller than bandwidth ({})",
                overlap, bandwidth
            )));
        }
        if !(f_start > 0.0) {
            return Err(PickError::config(format!("f_start must be positive, got {}", f_start)));
        }
        let f_end = f_end_max.min(fs / 2.0 - bandwidth);
        if !(f_start < f_end) {
            return Err(PickError::config(format!(
                "f_start ({}) must be lower than the effective f_end ({})",
                f_start, f_end
            )));
        }

        let step = bandwidth - overlap;
        let count = ((f_end + step - f_start) / step - 1e-9).ceil() as usize;
        let band_starts = (0..count).map(|i| f_start + i as f64 * step).collect();
        Ok(Self { bandwidth, overlap, band_starts })
    }

    pub fn len(&self) -> usize {
        self.band_starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.band_starts.is_empty()
    }

    pub fn centers(&self) -> impl Iterator<Item = f64> + '_ {
        self.band_starts.iter().map(move |lo| lo + self.bandwidth / 2.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ampa {
    /// Analysis frame length in seconds.
    pub window: f64,
    /// Frame stride in seconds.
    pub step: f64,
    /// Enhancement filter lengths in seconds.
    pub filter_lengths: Vec<f64>,
    /// Weight of the negative lobe of the enhancement filters.
    pub l_coef: f64,
    /// Percentile used as each band's noise floor.
    pub noise_thr: f64,
    pub bandwidth: f64,
    pub overlap: f64,
    pub f_start: f64,
    pub f_end: f64,
    /// Log-shift applied to the final function.
    pub u: f64,
}

impl Default for Ampa {
    fn default() -> Self {
        Self {
            window: 100.0,
            step: 50.0,
            filter_lengths: vec![30.0, 20.0, 10.0, 5.0, 2.5],
            l_coef: 3.0,
            noise_thr: 90.0,
            bandwidth: 3.0,
            overlap: 1.0,
            f_start: 2.0,
            f_end: 12.0,
            u: 12.0,
        }
    }
}

impl Ampa {
    pub fn longest_filter(&self) -> f64 {
        self.filter_lengths.iter().copied().fold(0.0, f64::max)
    }

    fn validate_params(&self) -> Result<()> {
        if self.filter_lengths.is_empty() {
            return Err(PickError::config("at least one enhancement filter length is required"));
        }
        if let Some(l) = self.filter_lengths.iter().find(|&&l| !(l > 0.0)) {
            return Err(PickError::config(format!("filter lengths must be positive, got {}", l)));
        }
        if !(0.0..=100.0).contains(&self.noise_thr) {
            return Err(PickError::config(format!(
                "noise_thr must be a percentile in [0, 100], got {}",
                self.noise_thr
            )));
        }
        if !(self.u > 0.0) {
            return Err(PickError::config(format!("U must be positive, got {}", self.u)));
        }
        Ok(())
    }

    /// Single-window AMPA characteristic function.
    ///
    /// The output is shorter than `x` by the longest enhancement filter, in
    /// samples.
    pub fn characteristic_function(&self, x: &[f64], fs: f64) -> Result<Vec<f64>> {
        check_sample_rate(fs)?;
        self.validate_params()?;
        let bank = FilterBank::new(fs, self.f_start, self.f_end, self.bandwidth, self.overlap)?;

        let duration = x.len() as f64 / fs;
        for &l in &self.filter_lengths {
            if l >= duration {
                return Err(PickError::config(format!(
                    "filter length {}s must be shorter than the signal ({}s)",
                    l, duration
                )));
            }
        }
        let lengths: Vec<usize> = self.filter_lengths.iter().map(|&l| seconds_to_samples(l, fs)).collect();
        if lengths.contains(&0) {
            return Err(PickError::config(format!(
                "every filter length must span at least one sample at {} Hz",
                fs
            )));
        }

        let x = demean(x);
        let n = x.len();
        let ztot = self.band_energy(&x, fs, &bank)?;

        let log_ztot: Vec<f64> = ztot.iter().map(|v| v.log10()).collect();
        let floor = log_ztot.iter().copied().fold(f64::INFINITY, f64::min);
        let lztot: Vec<f64> = log_ztot.iter().map(|v| v - floor + 1e-2).collect();

        let tail = seconds_to_samples(self.longest_filter(), fs);
        let mut product = vec![1.0; n - tail];
        for &l in &lengths {
            let response = self.enhance(&lztot, l);
            // The response is already aligned; only the first n - tail samples
            // are defined for every filter length.
            for (p, r) in product.iter_mut().zip(&response) {
                *p *= r;
            }
        }

        let floor = 10f64.powf(-self.u);
        Ok(product.iter().map(|z| self.u + (z.abs() + floor).log10()).collect())
    }

    /// Sum over bands of the noise-normalized envelope; every sample is at least
    /// the band count.
    fn band_energy(&self, x: &[f64], fs: f64, bank: &FilterBank) -> Result<Vec<f64>> {
        let n = x.len();
        let mut ztot = vec![0.0; n];
        for fc in bank.centers() {
            let mut kernel = vec![0.0; KERNEL_LEN];
            for (i, k) in kernel.iter_mut().take(KERNEL_TAPS).enumerate() {
                let t = i as f64;
                *k = (8.0 - t / 4.0) * (2.0 * std::f64::consts::PI * fc * t / fs).cos();
            }
            let quadrature: Vec<f64> = hilbert(&kernel).iter().map(|c| c.im).collect();

            let in_phase = lfilter(&kernel, x);
            let in_quad = lfilter(&quadrature, x);
            let env: Vec<f64> = in_phase.iter().zip(&in_quad).map(|(a, b)| a.hypot(*b)).collect();

            let thr = percentile(&env, self.noise_thr)?;
            for (z, &y) in ztot.iter_mut().zip(&env) {
                // A silent band (zero floor) adds nothing but its baseline.
                *z += if thr > 0.0 && y > thr { y / thr } else { 1.0 };
            }
            debug!("AMPA band {:.2} Hz: noise floor {:.4e}", fc, thr);
        }
        Ok(ztot)
    }

    /// Rectified, causally aligned response of one enhancement filter of `l`
    /// samples. The last `l` samples have no aligned response and are dropped.
    fn enhance(&self, lztot: &[f64], l: usize) -> Vec<f64> {
        let mut kernel: Vec<f64> = (1..=l).map(|v| v as f64).collect();
        kernel.extend((1..=l).map(|v| self.l_coef * (v as f64 - (l + 1) as f64)));
        let norm: f64 = kernel.iter().map(|v| v.abs()).sum();
        kernel.iter_mut().for_each(|v| *v /= norm);

        let response = lfilter(&kernel, lztot);
        response[l.min(response.len())..].iter().map(|&v| v.max(0.0)).collect()
    }

    /// Windowed AMPA over the whole signal: frames of `window` seconds every
    /// `step` seconds, each analysed independently, averaged where they overlap.
    fn stream(&self, x: &[f64], fs: f64, abort: &AbortFlag) -> Result<Vec<f64>> {
        check_sample_rate(fs)?;
        self.validate_params()?;
        if !(self.window > 0.0) || !(self.step > 0.0) {
            return Err(PickError::config(format!(
                "window ({}) and step ({}) must be positive",
                self.window, self.step
            )));
        }
        if self.window <= self.longest_filter() {
            return Err(PickError::config(format!(
                "window ({}s) must be longer than the longest filter ({}s)",
                self.window,
                self.longest_filter()
            )));
        }

        let n = x.len();
        let tail = seconds_to_samples(self.longest_filter(), fs);
        if n <= tail {
            return Err(PickError::config(format!(
                "signal of {} samples is not longer than the longest filter ({} samples)",
                n, tail
            )));
        }
        let window = seconds_to_samples(self.window, fs).max(1);
        let step = seconds_to_samples(self.step, fs).max(1);
        // Each frame yields `window - tail` samples; a longer stride leaves holes.
        if step > window.saturating_sub(tail) {
            return Err(PickError::config(format!(
                "step ({}s) must not exceed window minus the longest filter ({}s - {}s)",
                self.step,
                self.window,
                self.longest_filter()
            )));
        }

        let mut out = vec![0.0; n - tail];
        let mut written = 0;
        let mut start = 0;
        let mut frames = 0;
        loop {
            abort.check()?;
            let mut size = window.min(n - start);
            if start > 0 && size as f64 / fs <= self.longest_filter() {
                // Too short for the filters: re-anchor the last frame on the end.
                start = n.saturating_sub(window);
                size = n - start;
            }
            let cf = self.characteristic_function(&x[start..start + size], fs)?;
            let end = start + cf.len();

            // Average with the previous frame where it already wrote, copy the rest.
            let blend_end = written.clamp(start, end);
            for (o, c) in out[start..blend_end].iter_mut().zip(&cf) {
                *o = (*o + c) / 2.0;
            }
            out[blend_end..end].copy_from_slice(&cf[blend_end - start..]);
            written = written.max(end);
            frames += 1;

            if start + size >= n {
                break;
            }
            start += step;
        }
        debug!("AMPA streamed {} frames over {} samples", frames, n);
        Ok(out)
    }
}

impl Detector for Ampa {
    fn method(&self) -> Method {
        Method::Ampa
    }

    fn run_abortable(
        &self,
        x: &[f64],
        fs: f64,
        threshold: Option<f64>,
        peak_window: f64,
        abort: &AbortFlag,
    ) -> Result<DetectionResult> {
        let order = peak_order(peak_window, fs)?;
        let cf = self.stream(x, fs, abort)?;
        let events = find_peaks(&cf, threshold, order)?;
        info!("AMPA found {} candidates in {} samples", events.len(), x.len());
        Ok(DetectionResult { events, cf })
    }
}

/// Single-window AMPA followed by peak search.
pub fn ampa(
    x: &[f64],
    fs: f64,
    threshold: Option<f64>,
    peak_window: f64,
    params: &Ampa,
) -> Result<DetectionResult> {
    let cf = params.characteristic_function(x, fs)?;
    let events = find_peaks(&cf, threshold, peak_order(peak_window, fs)?)?;
    Ok(DetectionResult { events, cf })
}
