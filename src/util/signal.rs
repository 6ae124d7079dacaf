// Array helpers mirroring the handful of numeric primitives the bench is built on.

use rustfft::num_complex::Complex64;
use std::ops::{Add, Mul};

// `n` evenly spaced values over the closed interval [start, stop].
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Piecewise-linear interpolation of `(xp, fp)` at `x`.
///
/// `xp` must be increasing. Points left of `xp[0]` take `fp[0]`, points right of
/// the last sample take the last value, exactly like a clamped table lookup.
pub fn interp(x: &[f64], xp: &[f64], fp: &[f64]) -> Vec<f64> {
    let len = xp.len().min(fp.len());
    if len == 0 {
        return vec![0.0; x.len()];
    }
    let (xp, fp) = (&xp[..len], &fp[..len]);
    x.iter().map(|&v| interp_one(v, xp, fp)).collect()
}

#[inline]
fn interp_one(v: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let last = xp.len() - 1;
    if v <= xp[0] {
        return fp[0];
    }
    if v >= xp[last] {
        return fp[last];
    }
    // First index with xp[idx] > v; v is strictly inside so 1 <= idx <= last.
    let idx = xp.partition_point(|&p| p <= v);
    let (x0, x1) = (xp[idx - 1], xp[idx]);
    let (y0, y1) = (fp[idx - 1], fp[idx]);
    let span = x1 - x0;
    if span <= 0.0 {
        y1
    } else {
        y0 + (y1 - y0) * (v - x0) / span
    }
}

/// Symmetric Blackman window of length `len` (0.42 / 0.5 / 0.08 coefficients).
pub fn blackman(len: usize) -> Vec<f64> {
    match len {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let denom = (len - 1) as f64;
            (0..len)
                .map(|n| {
                    let phase = core::f64::consts::TAU * n as f64 / denom;
                    0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
                })
                .collect()
        }
    }
}

/// Symmetric Kaiser window of length `len` with shape parameter `beta`.
pub fn kaiser(len: usize, beta: f64) -> Vec<f64> {
    match len {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let alpha = (len - 1) as f64 / 2.0;
            let norm = bessel_i0(beta);
            (0..len)
                .map(|n| {
                    let r = (n as f64 - alpha) / alpha;
                    bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) / norm
                })
                .collect()
        }
    }
}

// Modified Bessel function of the first kind, order 0 (power series).
fn bessel_i0(x: f64) -> f64 {
    let half_sq = 0.25 * x * x;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..64 {
        term *= half_sq / (k * k) as f64;
        sum += term;
        if term < sum * 1e-17 {
            break;
        }
    }
    sum
}

// Smoothing window width: `raw` clamped to [3, limit] and forced odd.
pub fn odd_window_width(raw: f64, limit: usize) -> usize {
    let raw = if raw.is_finite() && raw > 0.0 {
        raw.min(usize::MAX as f64) as usize
    } else {
        0
    };
    let mut width = raw.max(3).min(limit);
    if width % 2 == 0 {
        width = width.saturating_sub(1);
    }
    width
}

/// "Same"-mode convolution with a sum-normalized window.
///
/// The output has the length of `signal` and is centered on the full
/// convolution; samples beyond either end of `signal` count as zero.
pub fn smooth_same<T>(signal: &[T], window: &[f64]) -> Vec<T>
where
    T: Copy + Default + Add<Output = T> + Mul<f64, Output = T>,
{
    let n = signal.len();
    let m = window.len();
    if n == 0 || m == 0 {
        return signal.to_vec();
    }
    let sum: f64 = window.iter().sum();
    let inv = if sum.abs() > f64::EPSILON { 1.0 / sum } else { 1.0 };

    let (long, short, long_is_signal) = if n >= m {
        (n, m, true)
    } else {
        (m, n, false)
    };
    // Full convolution index of output sample 0.
    let offset = (short - 1) / 2;
    let full_len = n + m - 1;

    (0..long)
        .map(|i| {
            let k = i + offset;
            if k >= full_len {
                return T::default();
            }
            let lo = k.saturating_sub(m - 1);
            let hi = k.min(n - 1);
            let mut acc = T::default();
            for j in lo..=hi {
                acc = acc + signal[j] * window[k - j];
            }
            acc * inv
        })
        .take(if long_is_signal { n } else { long })
        .collect()
}

// Sample frequencies for an FFT of length `n` with spacing `d`, in FFT order.
pub fn fftfreq(n: usize, d: f64) -> Vec<f64> {
    if n == 0 || d <= 0.0 {
        return vec![0.0; n];
    }
    let scale = 1.0 / (n as f64 * d);
    let positive = n.div_ceil(2);
    (0..n)
        .map(|i| {
            let k = if i < positive {
                i as f64
            } else {
                i as f64 - n as f64
            };
            k * scale
        })
        .collect()
}

// Index of the largest element (first one on ties); 0 for empty input.
pub fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, max), (i, &v)| {
            if v > max { (i, v) } else { (best, max) }
        })
        .0
}

pub fn max_value(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

pub fn real_parts(values: &[Complex64]) -> Vec<f64> {
    values.iter().map(|c| c.re).collect()
}

// Stretch or cut `data` to exactly `len` samples (zero padding at the end).
pub fn fit_length(mut data: Vec<f64>, len: usize) -> Vec<f64> {
    data.resize(len, 0.0);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linspace_hits_both_ends() {
        let v = linspace(-1.0, 1.0, 5);
        assert_eq!(v, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn interp_clamps_at_edges() {
        let xp = [0.0, 1.0, 2.0];
        let fp = [0.0, 10.0, 0.0];
        let y = interp(&[-1.0, 0.5, 1.0, 1.5, 3.0], &xp, &fp);
        assert_eq!(y, vec![0.0, 5.0, 10.0, 5.0, 0.0]);
    }

    #[test]
    fn blackman_is_symmetric_with_zero_ends() {
        let w = blackman(7);
        assert!(w[0].abs() < 1e-12 && w[6].abs() < 1e-12);
        assert!((w[3] - 1.0).abs() < 1e-12);
        for i in 0..7 {
            assert!((w[i] - w[6 - i]).abs() < 1e-12);
        }
    }

    #[test]
    fn three_point_blackman_is_identity_filter() {
        let signal: Vec<f64> = (0..20).map(|i| (i as f64 * 0.7).sin()).collect();
        let out = smooth_same(&signal, &blackman(3));
        for (a, b) in signal.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn smoothing_preserves_constant_interior() {
        let signal = vec![2.0; 50];
        let out = smooth_same(&signal, &blackman(9));
        assert_eq!(out.len(), 50);
        for v in &out[5..45] {
            assert!((v - 2.0).abs() < 1e-12);
        }
        // Edges see zero padding.
        assert!(out[0] < 2.0);
    }

    #[test]
    fn smoothing_is_centered() {
        let mut impulse = vec![0.0; 11];
        impulse[5] = 1.0;
        let w = [1.0, 2.0, 1.0];
        let out = smooth_same(&impulse, &w);
        assert!((out[4] - 0.25).abs() < 1e-12);
        assert!((out[5] - 0.5).abs() < 1e-12);
        assert!((out[6] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn odd_width_rules() {
        assert_eq!(odd_window_width(0.2, 100), 3);
        assert_eq!(odd_window_width(10.0, 100), 9);
        assert_eq!(odd_window_width(11.0, 100), 11);
        assert_eq!(odd_window_width(500.0, 100), 99);
        assert_eq!(odd_window_width(f64::INFINITY, 40), 39);
    }

    #[test]
    fn kaiser_zero_beta_is_rectangular() {
        let w = kaiser(8, 0.0);
        assert!(w.iter().all(|&v| (v - 1.0).abs() < 1e-12));
        let w = kaiser(9, 8.6);
        assert!((w[4] - 1.0).abs() < 1e-12);
        assert!(w[0] < 1e-2);
    }

    #[test]
    fn fftfreq_layout() {
        let f = fftfreq(4, 0.25);
        assert_eq!(f, vec![0.0, 1.0, -2.0, -1.0]);
        let f = fftfreq(5, 1.0);
        assert_eq!(f, vec![0.0, 0.2, 0.4, -0.4, -0.2]);
    }

    #[test]
    fn argmax_picks_first_peak() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), 1);
        assert_eq!(argmax(&[]), 0);
    }
}
