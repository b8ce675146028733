use crate::error::{PickError, Result};

pub fn linspace(start: f64, end: f64, num: usize, endpoint: bool) -> Vec<f64> {
    if num == 0 { return Vec::new(); }
    if num == 1 { return vec![start]; }
    let step = if endpoint {
        (end - start) / (num - 1) as f64
    } else {
        (end - start) / num as f64
    };
    (0..num).map(|i| start + i as f64 * step).collect()
}

pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a * (1.0 - t) + b * t
}

pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() { return f64::NAN; }
    x.iter().sum::<f64>() / x.len() as f64
}

pub fn demean(x: &[f64]) -> Vec<f64> {
    let m = mean(x);
    x.iter().map(|&v| v - m).collect()
}

/// Index of the first maximum. NaNs never win.
pub fn argmax(x: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &v) in x.iter().enumerate() {
        match best {
            Some(b) if !(v > x[b]) => {}
            _ if v.is_nan() => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Index of the first minimum. NaNs never win.
pub fn argmin(x: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &v) in x.iter().enumerate() {
        match best {
            Some(b) if !(v < x[b]) => {}
            _ if v.is_nan() => {}
            _ => best = Some(i),
        }
    }
    best
}

pub fn check_sample_rate(fs: f64) -> Result<()> {
    if !(fs > 0.0) || !fs.is_finite() {
        return Err(PickError::config(format!("fs must be a positive value, got {}", fs)));
    }
    Ok(())
}

/// Converts a duration in seconds to a whole number of samples, truncating.
pub fn seconds_to_samples(seconds: f64, fs: f64) -> usize {
    (seconds * fs).max(0.0) as usize
}
