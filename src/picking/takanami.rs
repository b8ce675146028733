//! Two-sided autoregressive AIC arrival-time estimation.
//!
//! An AR(k) model is fitted to the samples before each candidate split point
//! (noise) and, on the time-reversed signal, to the samples after it (arrival).
//! The split that minimizes the summed AIC of both models is the onset.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{PickError, Result};
use crate::picking::qr::IncrementalQr;
use crate::util::{argmin, check_sample_rate};

/// Outcome of refining one pick.
#[derive(Debug, Clone, PartialEq)]
pub struct Refinement {
    /// Estimated arrival, in samples from the start of the full signal.
    pub time: usize,
    /// Summed AIC trace over the candidate split points.
    pub aic: Vec<f64>,
    /// Sample at which `aic[0]` applies.
    pub n0_aic: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArRefiner {
    /// Step between candidate split points, in samples.
    pub p: usize,
    /// Autoregressive order.
    pub k: usize,
}

impl Default for ArRefiner {
    fn default() -> Self {
        Self { p: 1, k: 5 }
    }
}

impl ArRefiner {
    pub fn new(p: usize, k: usize) -> Result<Self> {
        let refiner = Self { p, k };
        refiner.validate()?;
        Ok(refiner)
    }

    pub fn validate(&self) -> Result<()> {
        if self.p == 0 {
            return Err(PickError::config("AR refiner step p must be at least 1"));
        }
        if self.k == 0 {
            return Err(PickError::config("AR refiner order k must be at least 1"));
        }
        Ok(())
    }

    /// Refines an arrival inside `[t_start, t_end]` seconds of `x`.
    ///
    /// The interval is clipped to the signal. The returned time is always
    /// within the clipped interval.
    pub fn run(&self, x: &[f64], fs: f64, t_start: f64, t_end: f64) -> Result<Refinement> {
        check_sample_rate(fs)?;
        self.validate()?;

        let i_from = (t_start * fs).max(0.0) as usize;
        let i_to = ((t_end * fs).max(0.0) as usize + 1).min(x.len());
        if i_from >= i_to {
            return Err(PickError::config(format!(
                "refinement window [{}, {}]s is empty for a signal of {} samples",
                t_start,
                t_end,
                x.len()
            )));
        }

        let segment = &x[i_from..i_to];
        let n0 = 2 * (self.k + 1);
        let n1 = segment.len().saturating_sub(n0);
        let (pick, aic) = takanami(segment, n0, n1, self.p, self.k)?;
        debug!(
            "AR refinement over samples {}..{} picked {}",
            i_from,
            i_to,
            i_from + pick
        );
        Ok(Refinement { time: i_from + pick, aic, n0_aic: i_from + n0 })
    }
}

/// Two-sided AIC pick within `x`, searching split points `n0, n0 + p, ..` up to
/// `n1`.
///
/// Returns the pick relative to the start of `x` and the summed AIC trace.
pub fn takanami(x: &[f64], n0: usize, n1: usize, p: usize, k: usize) -> Result<(usize, Vec<f64>)> {
    if p == 0 {
        return Err(PickError::config("p must be at least 1"));
    }
    if k == 0 {
        return Err(PickError::config("k must be at least 1"));
    }
    if n0 <= k {
        return Err(PickError::config(format!("n0 ({}) must be greater than k ({})", n0, k)));
    }
    if n1 == 0 {
        return Err(PickError::config("n1 must be positive"));
    }
    if x.len() <= n1 + k {
        return Err(PickError::config(format!(
            "signal of {} samples is too short for n1={} and k={}",
            x.len(),
            n1,
            k
        )));
    }
    if n1 < n0 {
        return Err(PickError::config(format!("n1 ({}) must not be lower than n0 ({})", n1, n0)));
    }

    let l = (n1 - n0) / p;
    let n1 = n0 + l * p;

    let forward = aic_trace(x, n0, l, p, k);
    let reversed: Vec<f64> = x.iter().rev().copied().collect();
    let backward = aic_trace(&reversed, x.len() - n1, l, p, k);

    let aic: Vec<f64> = forward
        .iter()
        .zip(backward.iter().rev())
        .map(|(f, b)| f + b)
        .collect();
    let best = argmin(&aic).unwrap_or(0);
    Ok((n0 + best * p, aic))
}

/// AIC of the best AR model of order `0..=k` fitted to `x[..n0 + p * i]`,
/// for `i = 0..=l`.
fn aic_trace(x: &[f64], n0: usize, l: usize, p: usize, k: usize) -> Vec<f64> {
    let mut qr = IncrementalQr::new(k + 1);
    let mut row = vec![0.0; k + 1];
    let mut push = |qr: &mut IncrementalQr, t: usize| {
        for (lag, r) in row.iter_mut().take(k).enumerate() {
            *r = x[t - lag - 1];
        }
        row[k] = x[t];
        qr.push_row(&mut row);
    };

    for t in k..n0 {
        push(&mut qr, t);
    }
    let mut trace = Vec::with_capacity(l + 1);
    trace.push(best_aic(&qr, k));
    for i in 1..=l {
        for t in n0 + p * (i - 1)..n0 + p * i {
            push(&mut qr, t);
        }
        trace.push(best_aic(&qr, k));
    }
    trace
}

fn best_aic(qr: &IncrementalQr, k: usize) -> f64 {
    let m = qr.rows() as f64;
    (0..=k)
        .map(|j| {
            let sigma2 = (qr.tail_sum_squares(k, j) / m).max(f64::MIN_POSITIVE);
            m * sigma2.ln() + 2.0 * (j + 1) as f64
        })
        .fold(f64::INFINITY, f64::min)
}
