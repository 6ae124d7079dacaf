//! Time window, phase bookkeeping and output conditioning shared by the
//! electrical generators.

use crate::lab::{ClockLink, SampleSpec, Trigger, read_clock};
use crate::util::signal::{blackman, linspace, odd_window_width, smooth_same};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::f64::consts::TAU;
use std::ops::{Add, Mul};

// Fraction of the window synthesized on each side and trimmed after filtering.
const PAD_FRACTION: f64 = 0.1;

/// Output voltage rails of every generator.
pub const MIN_OFFSET: f64 = -100.0;
pub const MAX_OFFSET: f64 = 100.0;

/// Sample grid of one pull.
#[derive(Debug, Clone)]
pub struct Timebase {
    /// Step before oversampling.
    pub delta: f64,
    /// Points returned to the caller.
    pub n: usize,
    /// Padding points on each side of the synthesized grid.
    pub add_points: usize,
    pub total: usize,
    /// Synthesis axis, padded on both sides.
    pub extended: Vec<f64>,
    /// Returned axis, starting at zero.
    pub time: Vec<f64>,
}

impl Timebase {
    pub fn new(spec: SampleSpec, timemult: f64) -> Self {
        let n_points = spec.n_points.max(1);
        let timemult = if timemult.is_finite() && timemult > 0.0 {
            timemult
        } else {
            1.0
        };
        let delta = spec.sample_time / n_points as f64;
        let n = ((n_points as f64 * timemult).floor() as usize).max(1);
        let add_points = (n as f64 * PAD_FRACTION).floor() as usize;
        let total = n + 2 * add_points;

        let window = spec.sample_time * timemult;
        let add_time = delta * add_points as f64;
        Self {
            delta,
            n,
            add_points,
            total,
            extended: linspace(-add_time, window + add_time, total),
            time: linspace(0.0, window, n),
        }
    }

    /// Blackman smoothing that emulates the rise time, then trims the padding.
    pub fn band_limit<T>(&self, padded: &[T], rise_time: f64) -> Vec<T>
    where
        T: Copy + Default + Add<Output = T> + Mul<f64, Output = T>,
    {
        let raw = if self.delta > 0.0 {
            rise_time / self.delta
        } else {
            0.0
        };
        let width = odd_window_width(raw, self.total);
        let smoothed = smooth_same(padded, &blackman(width));
        let end = (self.add_points + self.n).min(smoothed.len());
        smoothed[self.add_points.min(end)..end].to_vec()
    }
}

/// Carried phase of a generator.
#[derive(Debug, Clone, Copy)]
pub struct PhaseReference {
    initial: f64,
    current: f64,
}

impl PhaseReference {
    pub fn random(rng: &mut ChaCha8Rng) -> Self {
        let initial = rng.gen_range(0.0..TAU);
        Self {
            initial,
            current: initial,
        }
    }

    pub fn value(&self) -> f64 {
        self.current.rem_euclid(TAU)
    }

    pub fn advance(&mut self, freq: f64, sample_time: f64) {
        let step = TAU * freq * sample_time;
        if step.is_finite() {
            self.current = (self.current + step).rem_euclid(TAU);
        }
    }

    pub fn retrigger(&mut self, trigger: Trigger) {
        self.current = match trigger {
            Trigger::Phase(phase) => phase,
            Trigger::Reference => self.initial,
        };
    }
}

/// Where a generator gets its window and point count from.
#[derive(Debug, Clone, Default)]
pub struct Negotiation {
    clock: Option<ClockLink>,
    own: SampleSpec,
}

impl Negotiation {
    pub fn set_clock(&mut self, clock: Option<ClockLink>) {
        self.clock = clock;
    }

    pub fn set_own(&mut self, spec: SampleSpec) {
        self.own = spec;
    }

    pub fn spec(&self) -> SampleSpec {
        read_clock(self.clock.as_ref()).unwrap_or(self.own)
    }
}

/// Uniform noise, DC offset and clipping to the output rails.
pub fn condition(
    mut signal: Vec<f64>,
    noise: f64,
    offset: f64,
    rng: &mut ChaCha8Rng,
) -> Vec<f64> {
    let half = (noise / 2.0).abs();
    for sample in &mut signal {
        let hiss = if half > 0.0 {
            rng.gen_range(-half..=half)
        } else {
            0.0
        };
        *sample = (*sample + hiss + offset).clamp(MIN_OFFSET, MAX_OFFSET);
    }
    signal
}

/// One jitter draw, uniform in `[-jitter/2, jitter/2]`.
pub fn draw_jitter(jitter: f64, rng: &mut ChaCha8Rng) -> f64 {
    let half = (jitter / 2.0).abs();
    if half > 0.0 {
        rng.gen_range(-half..=half)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn spec(sample_time: f64, n_points: usize) -> SampleSpec {
        SampleSpec {
            sample_time,
            n_points,
        }
    }

    #[test]
    fn grid_sizes_follow_padding_rules() {
        let tb = Timebase::new(spec(2e-6, 1000), 1.0);
        assert_eq!(tb.n, 1000);
        assert_eq!(tb.add_points, 100);
        assert_eq!(tb.total, 1200);
        assert_eq!(tb.time.len(), 1000);
        assert_eq!(tb.extended.len(), 1200);
        assert!((tb.delta - 2e-9).abs() < 1e-21);
        assert!((tb.extended[0] + 2e-7).abs() < 1e-18);
        assert!((tb.time[999] - 2e-6).abs() < 1e-18);
    }

    #[test]
    fn oversampling_widens_window() {
        let tb = Timebase::new(spec(1e-6, 500), 3.0);
        assert_eq!(tb.n, 1500);
        assert_eq!(tb.add_points, 150);
        assert!((tb.time[tb.n - 1] - 3e-6).abs() < 1e-18);
        // The step is taken before oversampling.
        assert!((tb.delta - 2e-9).abs() < 1e-21);
    }

    #[test]
    fn band_limit_trims_to_n() {
        let tb = Timebase::new(spec(1e-6, 200), 1.0);
        let padded = vec![1.0; tb.total];
        let out = tb.band_limit(&padded, 1e-8);
        assert_eq!(out.len(), 200);
        assert!(out.iter().all(|v| (v - 1.0).abs() < 1e-12));
    }

    #[test]
    fn tiny_windows_still_return_n_points() {
        let tb = Timebase::new(spec(1e-6, 5), 1.0);
        assert_eq!(tb.add_points, 0);
        let out = tb.band_limit(&vec![0.5; tb.total], 1e-9);
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn phase_reference_wraps_and_retriggers() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut phase = PhaseReference::random(&mut rng);
        let initial = phase.value();
        phase.retrigger(Trigger::Phase(0.0));
        phase.advance(1e6, 2.5e-7);
        assert!((phase.value() - TAU / 4.0).abs() < 1e-12);
        phase.advance(1e6, 1e-6);
        assert!((phase.value() - TAU / 4.0).abs() < 1e-9);
        phase.retrigger(Trigger::Reference);
        assert_eq!(phase.value(), initial);
    }

    #[test]
    fn conditioning_clips_to_rails() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let out = condition(vec![0.0, 150.0, -150.0], 0.0, 1.0, &mut rng);
        assert_eq!(out, vec![1.0, MAX_OFFSET, MIN_OFFSET]);
        let noisy = condition(vec![0.0; 100], 0.2, 0.0, &mut rng);
        assert!(noisy.iter().all(|v| v.abs() <= 0.1));
    }

    #[test]
    fn clock_overrides_own_spec() {
        use crate::lab::{SampleClock, SinkNode};
        use std::rc::Rc;
        let mut negotiation = Negotiation::default();
        assert_eq!(negotiation.spec(), SampleSpec::default());
        let clock = Rc::new(SampleClock::new(spec(1e-3, 50)));
        let sink: Rc<dyn SinkNode> = clock.clone();
        negotiation.set_clock(Some(Rc::downgrade(&sink)));
        assert_eq!(negotiation.spec().n_points, 50);
    }
}
