//! Linearly interpolated percentiles.
//!
//! Break points sit at `0`, `100 * (i + 0.5) / n` for every sorted sample and
//! `100`; the sorted values are padded with their first and last entries so the
//! end points clamp. This is the MATLAB `prctile` convention.

use crate::error::{PickError, Result};
use crate::util::{lerp, linspace};

/// Percentile `p` (in `[0, 100]`) of `x`. Returns NaN when `x` is empty.
pub fn percentile(x: &[f64], p: f64) -> Result<f64> {
    check_percentile(p)?;
    if x.is_empty() {
        return Ok(f64::NAN);
    }
    let sorted = sorted_copy(x);
    Ok(percentile_of_sorted(&sorted, p))
}

/// Vectorized form of [`percentile`]; sorts `x` once.
pub fn percentiles(x: &[f64], ps: &[f64]) -> Result<Vec<f64>> {
    for &p in ps {
        check_percentile(p)?;
    }
    if x.is_empty() {
        return Ok(vec![f64::NAN; ps.len()]);
    }
    let sorted = sorted_copy(x);
    Ok(ps.iter().map(|&p| percentile_of_sorted(&sorted, p)).collect())
}

pub fn median(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    median_of_sorted(&sorted_copy(x))
}

fn check_percentile(p: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&p) {
        return Err(PickError::config(format!(
            "percentile must be in range [0, 100], got {}",
            p
        )));
    }
    Ok(())
}

fn sorted_copy(x: &[f64]) -> Vec<f64> {
    let mut sorted = x.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn percentile_of_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if p == 50.0 {
        return median_of_sorted(sorted);
    }

    let mut breaks = Vec::with_capacity(n + 2);
    breaks.push(0.0);
    breaks.extend(linspace(0.5, n as f64 - 0.5, n, true).into_iter().map(|b| 100.0 * b / n as f64));
    breaks.push(100.0);

    // First break point at or above p; the padding guarantees one exists.
    let hi = breaks.partition_point(|&b| b < p).max(1);
    let lo = hi - 1;
    let value_at = |i: usize| sorted[i.saturating_sub(1).min(n - 1)];

    let span = breaks[hi] - breaks[lo];
    if span <= 0.0 {
        return value_at(hi);
    }
    lerp(value_at(lo), value_at(hi), (p - breaks[lo]) / span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const DATA: [f64; 10] = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0, 5.0, 3.0];

    #[rustfmt::skip]
    const REFERENCE: [f64; 101] = [
        1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0,
        1.1, 1.2, 1.3, 1.4, 1.5, 1.6, 1.7, 1.8, 1.9, 2.0, 2.1, 2.2, 2.3, 2.4, 2.5, 2.6,
        2.7, 2.8, 2.9, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.1, 3.2,
        3.3, 3.4, 3.5, 3.6, 3.7, 3.8, 3.9, 4.0, 4.1, 4.2, 4.3, 4.4, 4.5, 4.6, 4.7, 4.8,
        4.9, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.1, 5.2, 5.3, 5.4,
        5.5, 5.6, 5.7, 5.8, 5.9, 6.0, 6.3, 6.6, 6.9, 7.2, 7.5, 7.8, 8.1, 8.4, 8.7, 9.0,
        9.0, 9.0, 9.0, 9.0, 9.0,
    ];

    #[test]
    fn test_matches_reference_table() {
        for p in 0..=100 {
            let value = percentile(&DATA, p as f64).unwrap();
            assert_abs_diff_eq!(value, REFERENCE[p], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_vectorized_equals_scalar() {
        let ps: Vec<f64> = (0..=100).map(|p| p as f64 * 0.99 + 0.3).collect();
        let vector = percentiles(&DATA, &ps).unwrap();
        for (p, v) in ps.iter().zip(&vector) {
            assert_eq!(*v, percentile(&DATA, *p).unwrap());
        }
    }

    #[test]
    fn test_median_special_case() {
        assert_eq!(percentile(&DATA, 50.0).unwrap(), 3.5);
        assert_eq!(percentile(&[2.0, 7.0, 1.0], 50.0).unwrap(), 2.0);
        assert_eq!(median(&[4.0, 1.0]), 2.5);
    }

    #[test]
    fn test_out_of_range_fails() {
        assert!(percentile(&DATA, -0.5).is_err());
        assert!(percentile(&DATA, 100.5).is_err());
        assert!(percentile(&DATA, f64::NAN).is_err());
        assert!(percentiles(&DATA, &[10.0, 101.0]).is_err());
        assert!(percentiles(&[], &[-1.0]).is_err());
    }

    #[test]
    fn test_empty_input_is_nan() {
        assert!(percentile(&[], 30.0).unwrap().is_nan());
        let all = percentiles(&[], &[10.0, 90.0]).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_single_sample() {
        assert_eq!(percentile(&[4.2], 0.0).unwrap(), 4.2);
        assert_eq!(percentile(&[4.2], 73.0).unwrap(), 4.2);
        assert_eq!(percentile(&[4.2], 100.0).unwrap(), 4.2);
    }
}
