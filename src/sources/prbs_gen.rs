//! Pseudo-random bit sequence generator.

use super::function_gen::clamp_or;
use super::timing::{Negotiation, PhaseReference, Timebase, condition, draw_jitter};
use crate::lab::{
    ClockLink, ElectricalNode, Reconfigurable, RetimableSource, SampleSpec, Transient, Trigger,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrbsConfig {
    pub enabled: bool,
    /// Bit rate, Hz
    pub frequency: f64,
    /// Peak-to-peak, V
    pub amplitude: f64,
    pub offset: f64,
    pub noise: f64,
    pub jitter: f64,
}

impl PrbsConfig {
    pub const MIN_FREQUENCY: f64 = 100e3;
    pub const MAX_FREQUENCY: f64 = 10e9;
    pub const MIN_AMPLITUDE: f64 = 1e-3;
    pub const MAX_AMPLITUDE: f64 = 100.0;

    pub fn rise_time() -> f64 {
        0.4 / Self::MAX_FREQUENCY
    }

    pub fn normalized(mut self) -> Self {
        self.frequency = clamp_or(self.frequency, Self::MIN_FREQUENCY, Self::MAX_FREQUENCY);
        self.amplitude = clamp_or(self.amplitude, Self::MIN_AMPLITUDE, Self::MAX_AMPLITUDE);
        self.offset = clamp_or(self.offset, -100.0, 100.0);
        self.noise = self.noise.abs();
        self.jitter = self.jitter.abs();
        self
    }
}

impl Default for PrbsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frequency: 1e6,
            amplitude: 1.0,
            offset: 0.0,
            noise: 5.0 * Self::MIN_AMPLITUDE,
            jitter: 20e-12,
        }
    }
}

pub struct PrbsGenerator {
    config: PrbsConfig,
    transient: Transient,
    negotiation: Negotiation,
    phase_ref: PhaseReference,
    rng: ChaCha8Rng,
}

impl PrbsGenerator {
    pub fn new(config: PrbsConfig) -> Self {
        Self::with_rng(config, ChaCha8Rng::from_entropy())
    }

    pub fn with_seed(config: PrbsConfig, seed: u64) -> Self {
        Self::with_rng(config, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(config: PrbsConfig, mut rng: ChaCha8Rng) -> Self {
        let config = config.normalized();
        debug!("[prbs-gen] {} b/s, {} Vpp", config.frequency, config.amplitude);
        Self {
            config,
            transient: Transient::default(),
            negotiation: Negotiation::default(),
            phase_ref: PhaseReference::random(&mut rng),
            rng,
        }
    }

    pub fn config(&self) -> PrbsConfig {
        self.config
    }

    pub fn set_inputs(&mut self, clock: ClockLink) {
        self.negotiation.set_clock(Some(clock));
    }

    pub fn set_sample_spec(&mut self, spec: SampleSpec) {
        self.negotiation.set_own(spec);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    pub fn set_frequency(&mut self, frequency: f64) {
        self.update_config(PrbsConfig {
            frequency,
            ..self.config
        });
    }

    pub fn set_amplitude(&mut self, amplitude: f64) {
        self.update_config(PrbsConfig {
            amplitude,
            ..self.config
        });
    }

    // A new bit is drawn whenever the argument enters a new period.
    fn bits(&mut self, extended: &[f64], jitter: f64, phase: f64) -> Vec<f64> {
        if !self.config.enabled {
            return vec![0.0; extended.len()];
        }
        let freq = self.config.frequency;
        let amplitude = self.config.amplitude;
        let period_of = |t: f64| ((TAU * freq * (t + jitter) + phase) / TAU).floor();

        let mut bit = self.draw_bit();
        let mut period = extended.first().map_or(0.0, |&t| period_of(t));
        extended
            .iter()
            .map(|&t| {
                let current = period_of(t);
                if current > period {
                    period = current;
                    bit = self.draw_bit();
                }
                amplitude * (bit - 0.5)
            })
            .collect()
    }

    fn draw_bit(&mut self) -> f64 {
        if self.rng.gen_bool(0.5) { 1.0 } else { 0.0 }
    }
}

impl ElectricalNode for PrbsGenerator {
    fn output_signal(&mut self) -> Vec<f64> {
        let spec = self.negotiation.spec();
        let tb = Timebase::new(spec, self.transient.timemult);
        let phase = self.phase_ref.value() + self.transient.phase;
        let jitter = draw_jitter(self.config.jitter, &mut self.rng);

        let padded = self.bits(&tb.extended, jitter, phase);
        let shaped = tb.band_limit(&padded, PrbsConfig::rise_time());
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

impl RetimableSource for PrbsGenerator {
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

impl Reconfigurable<PrbsConfig> for PrbsGenerator {
    fn update_config(&mut self, config: PrbsConfig) {
        self.config = config.normalized();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> PrbsConfig {
        PrbsConfig {
            noise: 0.0,
            jitter: 0.0,
            ..PrbsConfig::default()
        }
    }

    #[test]
    fn bits_only_change_at_period_boundaries() {
        let mut generator = PrbsGenerator::with_seed(quiet(), 21);
        let mut saw_transition = false;
        for _ in 0..16 {
            generator.retrigger(Trigger::Phase(0.0));
            let signal = generator.output_signal();
            assert_eq!(signal.len(), 1000);
            for i in 0..signal.len() - 1 {
                let step = (signal[i] - signal[i + 1]).abs();
                if i == 499 {
                    saw_transition |= step > 0.5;
                } else {
                    assert!(step < 1e-9, "edge at {i}");
                }
            }
        }
        assert!(saw_transition);
    }

    #[test]
    fn levels_are_half_amplitude() {
        let mut generator = PrbsGenerator::with_seed(
            PrbsConfig {
                amplitude: 2.0,
                ..quiet()
            },
            4,
        );
        let signal = generator.output_signal();
        assert!(signal.iter().all(|&v| (v.abs() - 1.0).abs() < 1e-9));
    }

    #[test]
    fn consecutive_pulls_keep_boundaries_aligned() {
        // 2 us at 1 Mb/s is a whole number of bits, so the phase advance wraps.
        let mut generator = PrbsGenerator::with_seed(quiet(), 8);
        generator.retrigger(Trigger::Phase(0.0));
        generator.output_signal();
        let second = generator.output_signal();
        for i in (0..second.len() - 1).filter(|&i| i != 499) {
            assert!((second[i] - second[i + 1]).abs() < 1e-9);
        }
    }

    #[test]
    fn frequency_is_clamped() {
        let mut generator = PrbsGenerator::with_seed(quiet(), 0);
        generator.set_frequency(1.0);
        assert_eq!(generator.output_freq(), PrbsConfig::MIN_FREQUENCY);
    }
}
