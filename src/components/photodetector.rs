//! Photodiode with a piecewise-linear responsivity curve and a transimpedance
//! stage.

use crate::lab::{
    ElectricalNode, OpticalLink, OpticalNode, Reconfigurable, Trigger, pull_optical,
    retrigger_optical,
};
use crate::util::signal::{interp, max_value, real_parts};
use serde::{Deserialize, Serialize};
use std::rc::Weak;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DetectorMaterial {
    #[default]
    InGaAs,
    Ge,
    Si,
}

/// Corner points of a responsivity curve (nm, A/W).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponsivityCurve {
    pub zero_low_nm: f64,
    pub half_nm: f64,
    pub peak_nm: f64,
    pub zero_high_nm: f64,
    pub peak_a_per_w: f64,
}

impl DetectorMaterial {
    pub fn curve(self) -> ResponsivityCurve {
        let (zero_low_nm, half_nm, peak_nm, zero_high_nm, peak_a_per_w) = match self {
            DetectorMaterial::InGaAs => (850.0, 950.0, 1550.0, 1700.0, 0.95),
            DetectorMaterial::Ge => (550.0, 1000.0, 1450.0, 1650.0, 0.55),
            DetectorMaterial::Si => (200.0, 550.0, 900.0, 1100.0, 0.6),
        };
        ResponsivityCurve {
            zero_low_nm,
            half_nm,
            peak_nm,
            zero_high_nm,
            peak_a_per_w,
        }
    }
}

impl ResponsivityCurve {
    pub fn evaluate(&self, wavelength_nm: &[f64]) -> Vec<f64> {
        let xp = [
            self.zero_low_nm - 100.0,
            self.zero_low_nm,
            self.half_nm,
            self.peak_nm,
            self.zero_high_nm,
            self.zero_high_nm + 100.0,
        ];
        let fp = [
            0.0,
            0.0,
            self.peak_a_per_w / 2.0,
            self.peak_a_per_w,
            0.0,
            0.0,
        ];
        interp(wavelength_nm, &xp, &fp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotodetectorConfig {
    pub material: DetectorMaterial,
    /// V/A
    pub transimpedance: f64,
}

impl Default for PhotodetectorConfig {
    fn default() -> Self {
        Self {
            material: DetectorMaterial::InGaAs,
            transimpedance: 10e3,
        }
    }
}

impl PhotodetectorConfig {
    pub fn normalized(mut self) -> Self {
        if !(self.transimpedance.is_finite() && self.transimpedance > 0.0) {
            self.transimpedance = Self::default().transimpedance;
        }
        self
    }
}

#[derive(Default)]
pub struct Photodetector {
    config: PhotodetectorConfig,
    input: Option<OpticalLink>,
    // Axis of the last detected envelope.
    time: Vec<f64>,
}

impl Photodetector {
    pub fn config(&self) -> PhotodetectorConfig {
        self.config
    }

    pub fn set_inputs(&mut self, input: OpticalLink) {
        self.input = Some(input);
    }

    pub fn set_material(&mut self, material: DetectorMaterial) {
        self.config.material = material;
    }
}

impl ElectricalNode for Photodetector {
    fn output_signal(&mut self) -> Vec<f64> {
        let Some((input, _)) = pull_optical(self.input.as_ref()) else {
            self.time.clear();
            return Vec::new();
        };
        let spectrum = &input.spectrum;
        let responsivity = self.config.material.curve().evaluate(&spectrum.wavelength_nm);
        let photocurrent: f64 = spectrum
            .power
            .iter()
            .zip(&responsivity)
            .map(|(p, r)| p * r)
            .sum::<f64>()
            * spectrum.bin_width();
        let peak_v = photocurrent * self.config.transimpedance;
        trace!("[photodetector] {photocurrent:.3e} A -> {peak_v:.3e} V");

        let envelope = real_parts(&input.envelope.amplitude);
        let envelope_peak = max_value(&envelope);
        self.time = input.envelope.time;
        if !(envelope_peak > 0.0) {
            return vec![0.0; envelope.len()];
        }
        envelope
            .into_iter()
            .map(|v| peak_v * v / envelope_peak)
            .collect()
    }

    fn output_timearray(&mut self) -> Vec<f64> {
        self.time.clone()
    }

    fn output_freq(&mut self) -> f64 {
        self.input
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|node| node.borrow_mut().output_freq())
            .unwrap_or(0.0)
    }

    fn retrigger(&mut self, trigger: Trigger) {
        retrigger_optical(self.input.as_ref(), trigger);
    }
}

impl Reconfigurable<PhotodetectorConfig> for Photodetector {
    fn update_config(&mut self, config: PhotodetectorConfig) {
        self.config = config.normalized();
    }
}
