use crate::error::{PickError, Result};
use crate::util::argmax;

/// Peak search over a characteristic function.
///
/// The threshold selects between two contracts:
/// * `None` is picking mode: a single-element vector holding the index of the
///   global maximum (empty when `x` is empty).
/// * `Some(t)` is detection mode: every strict local maximum over a window of
///   `order` samples on each side whose value exceeds `t`, in ascending order.
///   A threshold of `Some(0.0)` is a real threshold, not "no threshold".
///
/// `order` must be at least 1 in both modes.
pub fn find_peaks(x: &[f64], threshold: Option<f64>, order: usize) -> Result<Vec<usize>> {
    if order == 0 {
        return Err(PickError::config("peak order must be a positive integer"));
    }
    Ok(match threshold {
        None => pick_peak(x).into_iter().collect(),
        Some(t) => detect_peaks(x, t, order),
    })
}

pub fn pick_peak(x: &[f64]) -> Option<usize> {
    argmax(x)
}

/// Detection-mode search. Window edges are clipped to the array, and the end
/// points are never reported.
pub fn detect_peaks(x: &[f64], threshold: f64, order: usize) -> Vec<usize> {
    let n = x.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }

    let mut i = 1;
    while i < n - 1 {
        let v = x[i];
        if !(v > threshold) {
            i += 1;
            continue;
        }
        let lo = i.saturating_sub(order);
        let hi = (i + order).min(n - 1);
        let dominates = (lo..=hi).all(|j| j == i || v > x[j]);
        if dominates {
            peaks.push(i);
            // Nothing within `order` samples after a peak can dominate it.
            i += order + 1;
        } else {
            i += 1;
        }
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picking_mode_returns_argmax() {
        let x = [0.1, 0.5, 3.0, 0.2, 1.0];
        assert_eq!(find_peaks(&x, None, 1).unwrap(), vec![2]);
    }

    #[test]
    fn test_picking_mode_flat_and_empty() {
        assert_eq!(find_peaks(&[1.0; 6], None, 1).unwrap(), vec![0]);
        assert!(find_peaks(&[], None, 1).unwrap().is_empty());
    }

    #[test]
    fn test_detection_mode_threshold() {
        let x = [0.0, 2.0, 0.0, 5.0, 0.0, 1.0, 0.0, 4.0, 0.0];
        assert_eq!(find_peaks(&x, Some(1.5), 1).unwrap(), vec![1, 3, 7]);
        assert_eq!(find_peaks(&x, Some(4.5), 1).unwrap(), vec![3]);
        assert!(find_peaks(&x, Some(10.0), 1).unwrap().is_empty());
    }

    #[test]
    fn test_zero_threshold_is_not_picking_mode() {
        let x = [0.0, 2.0, 0.0, 5.0, 0.0];
        assert_eq!(find_peaks(&x, Some(0.0), 1).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_wider_order_merges_peaks() {
        let x = [0.0, 2.0, 0.0, 5.0, 0.0, 1.0, 0.0, 4.0, 0.0];
        // With order 2, index 1 sees 5.0 at index 3 and drops out.
        assert_eq!(find_peaks(&x, Some(0.5), 2).unwrap(), vec![3, 7]);
        assert_eq!(find_peaks(&x, Some(0.5), 4).unwrap(), vec![3]);
    }

    #[test]
    fn test_plateaus_and_edges_are_not_peaks() {
        let x = [9.0, 1.0, 3.0, 3.0, 1.0, 9.0];
        assert!(find_peaks(&x, Some(0.0), 1).unwrap().is_empty());
    }

    #[test]
    fn test_zero_order_fails() {
        assert!(find_peaks(&[1.0, 2.0, 1.0], Some(0.0), 0).is_err());
        assert!(find_peaks(&[1.0, 2.0, 1.0], None, 0).is_err());
    }
}
