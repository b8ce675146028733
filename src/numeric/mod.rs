pub mod peaks;
pub mod percentile;

pub use peaks::{detect_peaks, find_peaks, pick_peak};
pub use percentile::{median, percentile, percentiles};

use crate::filter::hilbert;

/// Instantaneous amplitude `sqrt(x^2 + H(x)^2)`.
pub fn envelope(x: &[f64]) -> Vec<f64> {
    hilbert(x).iter().map(|c| c.norm()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_envelope_of_pure_tone_is_flat() {
        let n = 512;
        let x: Vec<f64> = (0..n)
            .map(|i| 0.7 * (2.0 * std::f64::consts::PI * 16.0 * i as f64 / n as f64).sin())
            .collect();
        let env = envelope(&x);
        assert_eq!(env.len(), n);
        for v in env {
            assert_abs_diff_eq!(v, 0.7, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_envelope_empty() {
        assert!(envelope(&[]).is_empty());
    }
}
