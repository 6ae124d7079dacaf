//! Tunable CW laser: a Gaussian line on a fixed wavelength grid plus a flat
//! reference envelope.

use crate::lab::{OpticalNode, OpticalSignal, Reconfigurable, Spectrum, Waveform};
use crate::util::signal::linspace;
use crate::util::units::{dbm_to_mw, mw_to_dbm, thz_to_wavelength, wavelength_to_thz};
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const GRID_START_NM: f64 = 700.0;
pub const GRID_STOP_NM: f64 = 1700.0;
pub const GRID_POINTS: usize = 1_000_000;

const ENVELOPE_POINTS: usize = 100;
// Keeps dBm finite.
// -300 dBm, the display floor. Any power above it reads back unchanged.
const MIN_POWER_MW: f64 = 1e-30;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserConfig {
    pub wavelength_nm: f64,
    pub power_mw: f64,
    pub linewidth_nm: f64,
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            wavelength_nm: 1550.0,
            power_mw: 1.0,
            linewidth_nm: 0.01,
        }
    }
}

impl LaserConfig {
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        self.wavelength_nm = if self.wavelength_nm.is_finite() {
            self.wavelength_nm.clamp(GRID_START_NM, GRID_STOP_NM)
        } else {
            defaults.wavelength_nm
        };
        self.power_mw = if self.power_mw.is_finite() {
            self.power_mw.max(MIN_POWER_MW)
        } else {
            defaults.power_mw
        };
        if !(self.linewidth_nm > 0.0) {
            self.linewidth_nm = defaults.linewidth_nm;
        }
        self
    }

    pub fn frequency_thz(&self) -> f64 {
        wavelength_to_thz(self.wavelength_nm)
    }

    pub fn power_dbm(&self) -> f64 {
        mw_to_dbm(self.power_mw)
    }
}

pub struct Laser {
    config: LaserConfig,
    grid: Vec<f64>,
    spectrum: Spectrum,
    envelope: Waveform<Complex64>,
}

impl Laser {
    pub fn new(config: LaserConfig) -> Self {
        let grid = linspace(GRID_START_NM, GRID_STOP_NM, GRID_POINTS);
        let mut laser = Self {
            config: config.normalized(),
            spectrum: Spectrum::default(),
            envelope: Waveform::default(),
            grid,
        };
        laser.publish();
        laser
    }

    pub fn config(&self) -> LaserConfig {
        self.config
    }

    pub fn wavelength_nm(&self) -> f64 {
        self.config.wavelength_nm
    }

    pub fn frequency_thz(&self) -> f64 {
        self.config.frequency_thz()
    }

    pub fn power_mw(&self) -> f64 {
        self.config.power_mw
    }

    pub fn power_dbm(&self) -> f64 {
        self.config.power_dbm()
    }

    pub fn set_wavelength_nm(&mut self, wavelength_nm: f64) {
        self.update_config(LaserConfig {
            wavelength_nm,
            ..self.config
        });
    }

    pub fn set_frequency_thz(&mut self, frequency_thz: f64) {
        if frequency_thz > 0.0 {
            self.set_wavelength_nm(thz_to_wavelength(frequency_thz));
        }
    }

    pub fn set_power_mw(&mut self, power_mw: f64) {
        self.update_config(LaserConfig {
            power_mw,
            ..self.config
        });
    }

    pub fn set_power_dbm(&mut self, power_dbm: f64) {
        self.set_power_mw(dbm_to_mw(power_dbm));
    }

    fn publish(&mut self) {
        let LaserConfig {
            wavelength_nm,
            power_mw,
            linewidth_nm,
        } = self.config;
        let peak_w = 1e-3 * power_mw;
        let two_var = 2.0 * linewidth_nm * linewidth_nm;
        let power = self
            .grid
            .iter()
            .map(|&wl| {
                let d = wl - wavelength_nm;
                peak_w * (-(d * d) / two_var).exp()
            })
            .collect();
        self.spectrum = Spectrum {
            wavelength_nm: self.grid.clone(),
            power,
        };
        self.envelope = Waveform::new(
            linspace(0.0, 1.0, ENVELOPE_POINTS),
            vec![Complex64::new(peak_w, 0.0); ENVELOPE_POINTS],
        );
        debug!(
            "[laser] {:.3} nm ({:.3} THz), {:.3} dBm",
            wavelength_nm,
            self.config.frequency_thz(),
            self.config.power_dbm()
        );
    }
}

impl Default for Laser {
    fn default() -> Self {
        Self::new(LaserConfig::default())
    }
}

impl OpticalNode for Laser {
    fn output_opt_signal(&mut self) -> OpticalSignal {
        OpticalSignal {
            spectrum: self.spectrum.clone(),
            envelope: self.envelope.clone(),
        }
    }
}

impl Reconfigurable<LaserConfig> for Laser {
    fn update_config(&mut self, config: LaserConfig) {
        self.config = config.normalized();
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::signal::argmax;

    #[test]
    fn default_line_peaks_at_1550_with_one_milliwatt() {
        let mut laser = Laser::default();
        let signal = laser.output_opt_signal();
        let peak = argmax(&signal.spectrum.power);
        assert!((signal.spectrum.wavelength_nm[peak] - 1550.0).abs() < 0.002);
        assert!((signal.spectrum.power[peak] - 1e-3).abs() < 1e-5);
        assert_eq!(signal.spectrum.power.len(), GRID_POINTS);
        assert_eq!(signal.envelope.len(), 100);
        assert!((signal.envelope.amplitude[0].re - 1e-3).abs() < 1e-15);
    }

    #[test]
    fn power_units_stay_in_step() {
        let mut laser = Laser::default();
        laser.set_power_dbm(3.0);
        assert!((laser.power_mw() - 1.995_262).abs() < 1e-5);
        laser.set_power_mw(10.0);
        assert!((laser.power_dbm() - 10.0).abs() < 1e-12);
        laser.set_power_mw(0.0);
        assert!(laser.power_dbm().is_finite());
    }

    #[test]
    fn faint_powers_read_back_in_dbm() {
        let mut laser = Laser::default();
        for dbm in [-95.0, -120.0, -250.0] {
            laser.set_power_dbm(dbm);
            assert!((laser.power_dbm() - dbm).abs() < 1e-9, "{dbm}");
        }
        laser.set_power_mw(0.0);
        assert!((laser.power_dbm() + 300.0).abs() < 1e-9);
        let peak = laser
            .output_opt_signal()
            .spectrum
            .power
            .into_iter()
            .fold(0.0, f64::max);
        assert!(peak > 0.0);
    }

    #[test]
    fn frequency_and_wavelength_are_linked() {
        let mut laser = Laser::default();
        laser.set_frequency_thz(200.0);
        assert!((laser.wavelength_nm() - 1500.0).abs() < 1e-9);
        let signal = laser.output_opt_signal();
        let peak = argmax(&signal.spectrum.power);
        assert!((signal.spectrum.wavelength_nm[peak] - 1500.0).abs() < 0.002);
    }

    #[test]
    fn outputs_are_independent_copies() {
        let mut laser = Laser::default();
        let mut first = laser.output_opt_signal();
        first.scale(0.0);
        let second = laser.output_opt_signal();
        assert!(second.spectrum.power.iter().any(|&p| p > 0.0));
    }
}
