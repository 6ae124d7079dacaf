//! Function generator: sine, triangle, square, saw, reverse saw and pulse
//! carriers with rise-time shaping, jitter, noise and optional chirp.

use super::timing::{Negotiation, PhaseReference, Timebase, condition, draw_jitter};
use crate::lab::{
    ClockLink, ElectricalNode, Reconfigurable, RetimableSource, SampleSpec, Transient, Trigger,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};
use std::time::Instant;
use tracing::debug;

// 1/pi, as the arctangent based shapes are scaled.
const ATAN_SCALE: f64 = 0.3183;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveKind {
    #[default]
    Sine,
    Triangle,
    Square,
    Saw,
    ReverseSaw,
    Pulse,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionGeneratorConfig {
    pub enabled: bool,
    pub wave: WaveKind,
    /// Hz
    pub frequency: f64,
    /// Peak-to-peak, V
    pub amplitude: f64,
    /// V
    pub offset: f64,
    /// Fraction of the period spent high (pulse only).
    pub duty_cycle: f64,
    pub phase_deg: f64,
    /// Peak-to-peak of the uniform noise, V
    pub noise: f64,
    /// Peak-to-peak timing jitter, s
    pub jitter: f64,
    pub chirp: bool,
    /// Frequency excursion in percent.
    pub chirp_variation: f64,
    /// Chirp period, s
    pub chirp_period: f64,
}

impl FunctionGeneratorConfig {
    pub const MIN_FREQUENCY: f64 = 0.1;
    pub const MAX_FREQUENCY: f64 = 10e9;
    pub const MIN_AMPLITUDE: f64 = 1e-3;
    pub const MAX_AMPLITUDE: f64 = 100.0;
    pub const MIN_OFFSET: f64 = -100.0;
    pub const MAX_OFFSET: f64 = 100.0;

    pub fn rise_time() -> f64 {
        0.4 / Self::MAX_FREQUENCY
    }

    /// Duty cycle bounds leaving room for one rise and one fall per period.
    pub fn duty_limits(frequency: f64) -> (f64, f64) {
        if frequency <= 0.0 {
            return (0.0, 1.0);
        }
        let min_pulse = 2.0 * Self::rise_time();
        let min = min_pulse * frequency;
        (min, 1.0 - min)
    }

    pub fn normalized(mut self) -> Self {
        self.frequency = clamp_or(self.frequency, Self::MIN_FREQUENCY, Self::MAX_FREQUENCY);
        self.amplitude = clamp_or(self.amplitude, Self::MIN_AMPLITUDE, Self::MAX_AMPLITUDE);
        self.offset = clamp_or(self.offset, Self::MIN_OFFSET, Self::MAX_OFFSET);
        let (low, high) = Self::duty_limits(self.frequency);
        // Upper bound first so an impossible range settles on the lower one.
        self.duty_cycle = self.duty_cycle.min(high).max(low);
        if !self.phase_deg.is_finite() {
            self.phase_deg = 0.0;
        }
        self.noise = self.noise.abs();
        self.jitter = self.jitter.abs();
        self.chirp_variation = self.chirp_variation.clamp(0.0, 100.0);
        if !(self.chirp_period > 0.0) {
            self.chirp_period = 1.0;
        }
        self
    }
}

impl Default for FunctionGeneratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wave: WaveKind::Sine,
            frequency: 1e6,
            amplitude: 1.0,
            offset: 0.0,
            duty_cycle: 0.5,
            phase_deg: 0.0,
            noise: 5.0 * Self::MIN_AMPLITUDE,
            jitter: 20e-12,
            chirp: false,
            chirp_variation: 10.0,
            chirp_period: 1.0,
        }
    }
}

pub(crate) fn clamp_or(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

pub struct FunctionGenerator {
    config: FunctionGeneratorConfig,
    transient: Transient,
    negotiation: Negotiation,
    phase_ref: PhaseReference,
    rng: ChaCha8Rng,
    started: Instant,
}

impl FunctionGenerator {
    pub fn new(config: FunctionGeneratorConfig) -> Self {
        Self::with_rng(config, ChaCha8Rng::from_entropy())
    }

    pub fn with_seed(config: FunctionGeneratorConfig, seed: u64) -> Self {
        Self::with_rng(config, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(config: FunctionGeneratorConfig, mut rng: ChaCha8Rng) -> Self {
        let config = config.normalized();
        let phase_ref = PhaseReference::random(&mut rng);
        debug!(
            "[function-gen] {:?} at {} Hz, {} Vpp",
            config.wave, config.frequency, config.amplitude
        );
        Self {
            transient: Transient {
                timemult: 1.0,
                phase: config.phase_deg.to_radians(),
            },
            config,
            negotiation: Negotiation::default(),
            phase_ref,
            rng,
            started: Instant::now(),
        }
    }

    pub fn config(&self) -> FunctionGeneratorConfig {
        self.config
    }

    pub fn set_inputs(&mut self, clock: ClockLink) {
        self.negotiation.set_clock(Some(clock));
    }

    /// Window used when no instrument clock is attached.
    pub fn set_sample_spec(&mut self, spec: SampleSpec) {
        self.negotiation.set_own(spec);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    pub fn set_wave(&mut self, wave: WaveKind) {
        self.config.wave = wave;
    }

    pub fn set_frequency(&mut self, frequency: f64) {
        self.update_config(FunctionGeneratorConfig {
            frequency,
            ..self.config
        });
    }

    pub fn set_amplitude(&mut self, amplitude: f64) {
        self.update_config(FunctionGeneratorConfig {
            amplitude,
            ..self.config
        });
    }

    pub fn set_offset(&mut self, offset: f64) {
        self.update_config(FunctionGeneratorConfig {
            offset,
            ..self.config
        });
    }

    pub fn set_duty_cycle(&mut self, duty_cycle: f64) {
        self.update_config(FunctionGeneratorConfig {
            duty_cycle,
            ..self.config
        });
    }

    pub fn set_phase_deg(&mut self, phase_deg: f64) {
        self.update_config(FunctionGeneratorConfig {
            phase_deg,
            ..self.config
        });
    }

    fn current_frequency(&self) -> f64 {
        let cfg = &self.config;
        if !cfg.chirp {
            return cfg.frequency;
        }
        let t = self.started.elapsed().as_secs_f64();
        cfg.frequency * (1.0 + (cfg.chirp_variation / 100.0) * (TAU * t / cfg.chirp_period).sin())
    }

    fn carrier(&self, extended: &[f64], freq: f64, jitter: f64, phase: f64) -> Vec<f64> {
        let cfg = &self.config;
        if !cfg.enabled {
            return vec![0.0; extended.len()];
        }
        let a = cfg.amplitude;
        let full = |t: f64| TAU * freq * (t + jitter) + phase;
        let half = |t: f64| PI * freq * (t + jitter) + phase;
        let duty_edge = cfg.duty_cycle * TAU;

        extended
            .iter()
            .map(|&t| match cfg.wave {
                WaveKind::Sine => 0.5 * a * full(t).sin(),
                WaveKind::Triangle => ATAN_SCALE * a * full(t).cos().asin(),
                WaveKind::Square => {
                    let s = full(t).sin();
                    ATAN_SCALE * a * (s.atan() + (1.0 / s).atan())
                }
                WaveKind::Saw => -ATAN_SCALE * a * (1.0 / half(t).tan()).atan(),
                WaveKind::ReverseSaw => ATAN_SCALE * a * (1.0 / half(t).tan()).atan(),
                WaveKind::Pulse => {
                    let high = if full(t).rem_euclid(TAU) < duty_edge { 1.0 } else { 0.0 };
                    a * (high - 0.5)
                }
            })
            .collect()
    }
}

impl ElectricalNode for FunctionGenerator {
    fn output_signal(&mut self) -> Vec<f64> {
        let spec = self.negotiation.spec();
        let tb = Timebase::new(spec, self.transient.timemult);
        let phase = self.phase_ref.value() + self.transient.phase;
        let jitter = draw_jitter(self.config.jitter, &mut self.rng);
        let freq = self.current_frequency();

        let padded = self.carrier(&tb.extended, freq, jitter, phase);
        let shaped = tb.band_limit(&padded, FunctionGeneratorConfig::rise_time());
        let out = condition(shaped, self.config.noise, self.config.offset, &mut self.rng);

        self.phase_ref.advance(self.config.frequency, spec.sample_time);
        out
    }

    fn output_timearray(&mut self) -> Vec<f64> {
        Timebase::new(self.negotiation.spec(), self.transient.timemult).time
    }

    fn output_freq(&mut self) -> f64 {
        self.config.frequency
    }

    fn retrigger(&mut self, trigger: Trigger) {
        self.phase_ref.retrigger(trigger);
    }
}

impl RetimableSource for FunctionGenerator {
    fn transient(&self) -> Transient {
        self.transient
    }

    fn set_transient(&mut self, transient: Transient) {
        self.transient = transient;
    }

    fn negotiated_sample_time(&self) -> f64 {
        self.negotiation.spec().sample_time
    }
}

impl Reconfigurable<FunctionGeneratorConfig> for FunctionGenerator {
    fn update_config(&mut self, config: FunctionGeneratorConfig) {
        self.config = config.normalized();
        self.transient.phase = self.config.phase_deg.to_radians();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(wave: WaveKind) -> FunctionGeneratorConfig {
        FunctionGeneratorConfig {
            wave,
            noise: 0.0,
            jitter: 0.0,
            ..FunctionGeneratorConfig::default()
        }
    }

    #[test]
    fn every_wave_returns_n_points_on_its_axis() {
        for wave in [
            WaveKind::Sine,
            WaveKind::Triangle,
            WaveKind::Square,
            WaveKind::Saw,
            WaveKind::ReverseSaw,
            WaveKind::Pulse,
        ] {
            let mut generator = FunctionGenerator::with_seed(quiet(wave), 3);
            let signal = generator.output_signal();
            let time = generator.output_timearray();
            assert_eq!(signal.len(), 1000, "{wave:?}");
            assert_eq!(time.len(), 1000, "{wave:?}");
            assert!(signal.iter().all(|v| v.is_finite()), "{wave:?}");
        }
    }

    #[test]
    fn sine_spans_half_amplitude() {
        let mut generator = FunctionGenerator::with_seed(
            FunctionGeneratorConfig {
                amplitude: 4.0,
                ..quiet(WaveKind::Sine)
            },
            11,
        );
        generator.retrigger(Trigger::Phase(0.0));
        let signal = generator.output_signal();
        let max = signal.iter().copied().fold(f64::MIN, f64::max);
        let min = signal.iter().copied().fold(f64::MAX, f64::min);
        assert!((max - 2.0).abs() < 1e-3);
        assert!((min + 2.0).abs() < 1e-3);
        // Starts at zero phase.
        assert!(signal[0].abs() < 0.05);
    }

    #[test]
    fn disabled_output_is_offset_only() {
        let mut generator = FunctionGenerator::with_seed(
            FunctionGeneratorConfig {
                enabled: false,
                offset: 1.5,
                ..quiet(WaveKind::Square)
            },
            5,
        );
        let signal = generator.output_signal();
        assert!(signal.iter().all(|v| (v - 1.5).abs() < 1e-12));
    }

    #[test]
    fn pulse_duty_cycle_sets_high_fraction() {
        let mut generator = FunctionGenerator::with_seed(
            FunctionGeneratorConfig {
                duty_cycle: 0.25,
                ..quiet(WaveKind::Pulse)
            },
            9,
        );
        let signal = generator.output_signal();
        let high = signal.iter().filter(|&&v| v > 0.0).count() as f64;
        assert!((high / signal.len() as f64 - 0.25).abs() < 0.02);
    }

    #[test]
    fn config_is_clamped() {
        let cfg = FunctionGeneratorConfig {
            frequency: 1e12,
            amplitude: 0.0,
            offset: -500.0,
            duty_cycle: 2.0,
            ..FunctionGeneratorConfig::default()
        }
        .normalized();
        assert_eq!(cfg.frequency, FunctionGeneratorConfig::MAX_FREQUENCY);
        assert_eq!(cfg.amplitude, FunctionGeneratorConfig::MIN_AMPLITUDE);
        assert_eq!(cfg.offset, -100.0);
        // At 10 GHz the two edges eat the whole period.
        let (low, _) = FunctionGeneratorConfig::duty_limits(cfg.frequency);
        assert!((cfg.duty_cycle - low).abs() < 1e-12);
    }

    #[test]
    fn output_is_clipped_to_rails() {
        let mut generator = FunctionGenerator::with_seed(
            FunctionGeneratorConfig {
                amplitude: 100.0,
                offset: 90.0,
                ..quiet(WaveKind::Sine)
            },
            1,
        );
        let signal = generator.output_signal();
        assert!(signal.iter().all(|&v| v <= 100.0));
        assert!(signal.iter().any(|&v| v == 100.0));
    }

    #[test]
    fn oversampled_pull_widens_axis() {
        let mut generator = FunctionGenerator::with_seed(quiet(WaveKind::Sine), 2);
        generator.set_transient(Transient {
            timemult: 3.0,
            phase: 0.0,
        });
        assert_eq!(generator.output_signal().len(), 3000);
        let time = generator.output_timearray();
        assert!((time[2999] - 6e-6).abs() < 1e-15);
    }
}
