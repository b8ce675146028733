//! FFT-backed FIR filtering and the analytic-signal transform.

use rustfft::{num_complex::Complex, FftPlanner};

/// Full linear convolution of `a` and `b` (length `a.len() + b.len() - 1`).
pub fn fftconvolve(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let out_len = a.len() + b.len() - 1;
    let fft_size = out_len.next_power_of_two();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(fft_size);
    let ifft = planner.plan_fft_inverse(fft_size);

    let mut fa = vec![Complex::new(0.0, 0.0); fft_size];
    let mut fb = vec![Complex::new(0.0, 0.0); fft_size];
    for (dst, &v) in fa.iter_mut().zip(a) {
        dst.re = v;
    }
    for (dst, &v) in fb.iter_mut().zip(b) {
        dst.re = v;
    }
    fft.process(&mut fa);
    fft.process(&mut fb);
    for (x, y) in fa.iter_mut().zip(&fb) {
        *x *= *y;
    }
    ifft.process(&mut fa);

    let scale = 1.0 / fft_size as f64;
    fa[..out_len].iter().map(|c| c.re * scale).collect()
}

/// Causal FIR filtering: the first `x.len()` samples of `x * h`.
pub fn lfilter(h: &[f64], x: &[f64]) -> Vec<f64> {
    let mut y = fftconvolve(x, h);
    y.truncate(x.len());
    y
}

/// Analytic signal of `x`, computed in the frequency domain by zeroing the
/// negative frequencies and doubling the positive ones.
pub fn hilbert(x: &[f64]) -> Vec<Complex<f64>> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let ifft = planner.plan_fft_inverse(n);

    let mut buffer: Vec<Complex<f64>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
    fft.process(&mut buffer);

    let half = n / 2;
    for (k, c) in buffer.iter_mut().enumerate() {
        let gain = if k == 0 || (n % 2 == 0 && k == half) {
            1.0
        } else if k <= (n - 1) / 2 {
            2.0
        } else {
            0.0
        };
        *c *= gain;
    }
    ifft.process(&mut buffer);

    let scale = 1.0 / n as f64;
    buffer.iter().map(|&c| c * scale).collect()
}
