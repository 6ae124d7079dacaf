//! Electro-optic amplitude and QAM modulators.
//!
//! The envelope is shaped in the time domain through the Mach-Zehnder transfer
//! `|sin(pi (v + v_offs) / v_pi)|`. The spectrum gets the FFT of the modulated
//! envelope added around the carrier peak, which is a linear approximation of
//! the real sidebands.

use crate::lab::{
    ElectricalLink, IqBranch, OpticalLink, OpticalNode, OpticalSignal, Reconfigurable, Spectrum,
    Trigger, Waveform, electrical_freq, pull_electrical, pull_optical, retrigger_electrical,
};
use crate::util::signal::{argmax, fftfreq, interp, linspace, max_value, real_parts};
use crate::util::units::{db_to_linear, wavelength_to_thz};
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::f64::consts::PI;
use std::rc::Weak;
use std::sync::Arc;
use tracing::trace;

const SIDEBAND_FFT_SIZE: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulatorConfig {
    /// Half-wave voltage, V
    pub v_pi: f64,
    /// Bias, V
    pub v_offs: f64,
    pub insertion_loss_db: f64,
}

impl Default for ModulatorConfig {
    fn default() -> Self {
        Self {
            v_pi: 5.7,
            v_offs: -2.4,
            insertion_loss_db: 6.0,
        }
    }
}

impl ModulatorConfig {
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if !(self.v_pi.is_finite() && self.v_pi.abs() > f64::EPSILON) {
            self.v_pi = defaults.v_pi;
        }
        if !self.v_offs.is_finite() {
            self.v_offs = defaults.v_offs;
        }
        if !self.insertion_loss_db.is_finite() {
            self.insertion_loss_db = defaults.insertion_loss_db;
        }
        self.insertion_loss_db = self.insertion_loss_db.max(0.0);
        self
    }

    /// Power transmission for a drive voltage.
    pub fn transfer(&self, drive: f64) -> f64 {
        db_to_linear(-self.insertion_loss_db) * (PI * (drive + self.v_offs) / self.v_pi).sin().abs()
    }
}

/// Time-domain half of a modulation: the carrier envelope resampled on the drive
/// axis and shaped by the transfer function. Returns the shaped envelope and its
/// peak relative to the carrier peak.
fn shape_envelope(
    config: &ModulatorConfig,
    carrier: &Waveform<Complex64>,
    drive: &[f64],
    time: &[f64],
) -> (Vec<f64>, f64) {
    let carrier_re = real_parts(&carrier.amplitude);
    let resampled = interp(time, &carrier.time, &carrier_re);
    let shaped: Vec<f64> = resampled
        .iter()
        .enumerate()
        .map(|(i, &c)| c * config.transfer(drive.get(i).copied().unwrap_or(0.0)))
        .collect();

    let carrier_peak = max_value(&carrier_re);
    let att = if carrier_peak > 0.0 && !shaped.is_empty() {
        max_value(&shaped) / carrier_peak
    } else {
        0.0
    };
    (shaped, att)
}

/// Adds the envelope spectrum around the optical carrier peak.
struct SidebandInjector {
    fft: Arc<dyn Fft<f64>>,
}

impl SidebandInjector {
    fn new() -> Self {
        let mut planner = FftPlanner::<f64>::new();
        Self {
            fft: planner.plan_fft_forward(SIDEBAND_FFT_SIZE),
        }
    }

    fn inject(&self, spectrum: &Spectrum, time: &[f64], envelope: &[f64], att: f64) -> Spectrum {
        // Ascending frequency axis: wavelength order reversed.
        let freq_thz: Vec<f64> = spectrum
            .wavelength_nm
            .iter()
            .rev()
            .map(|&wl| wavelength_to_thz(wl))
            .collect();
        let mut power: Vec<f64> = spectrum.power.iter().rev().copied().collect();

        let t_last = time.last().copied().unwrap_or(0.0);
        if !power.is_empty() && t_last > 0.0 && time.len() == envelope.len() {
            let peak_hz = freq_thz[argmax(&power)] * 1e12;
            let (axis, magnitudes) = self.envelope_spectrum(time, envelope, t_last, peak_hz);
            let grid_hz: Vec<f64> = freq_thz.iter().map(|f| f * 1e12).collect();
            let sidebands = interp(&grid_hz, &axis, &magnitudes);
            power.iter_mut().zip(sidebands).for_each(|(p, s)| *p += s);
        }

        power.reverse();
        power.iter_mut().for_each(|p| *p *= att);
        Spectrum {
            wavelength_nm: spectrum.wavelength_nm.clone(),
            power,
        }
    }

    // Shifted single-sided magnitudes, DC and the last negative bin zeroed.
    fn envelope_spectrum(
        &self,
        time: &[f64],
        envelope: &[f64],
        t_last: f64,
        offset_hz: f64,
    ) -> (Vec<f64>, Vec<f64>) {
        let n = SIDEBAND_FFT_SIZE;
        let grid = linspace(0.0, t_last, n);
        let mut buffer: Vec<Complex64> = interp(&grid, time, envelope)
            .into_iter()
            .map(|v| Complex64::new(v, 0.0))
            .collect();
        self.fft.process(&mut buffer);

        let scale = 2.0 / n as f64;
        let bins = fftfreq(n, grid[1] - grid[0]);
        let half = n / 2;
        (half..n)
            .chain(0..half)
            .map(|k| {
                let magnitude = if k == 0 || k == n - 1 {
                    0.0
                } else {
                    scale * buffer[k].norm()
                };
                (bins[k] + offset_hz, magnitude)
            })
            .unzip()
    }
}

/// Single-drive amplitude modulator.
pub struct AmModulator {
    config: ModulatorConfig,
    optical: Option<OpticalLink>,
    drive: Option<ElectricalLink>,
    injector: SidebandInjector,
}

impl AmModulator {
    pub fn new(config: ModulatorConfig) -> Self {
        Self {
            config: config.normalized(),
            optical: None,
            drive: None,
            injector: SidebandInjector::new(),
        }
    }

    pub fn config(&self) -> ModulatorConfig {
        self.config
    }

    pub fn set_inputs(&mut self, optical: OpticalLink, drive: ElectricalLink) {
        self.optical = Some(optical);
        self.drive = Some(drive);
    }
}

impl Default for AmModulator {
    fn default() -> Self {
        Self::new(ModulatorConfig::default())
    }
}

impl OpticalNode for AmModulator {
    fn output_opt_signal(&mut self) -> OpticalSignal {
        let Some((input, _)) = pull_optical(self.optical.as_ref()) else {
            return OpticalSignal::default();
        };
        // An absent drive reads as 0 V on the carrier's own axis.
        let (drive, time) = match pull_electrical(self.drive.as_ref()) {
            Some(pull) => (pull.signal, pull.time),
            None => (Vec::new(), input.envelope.time.clone()),
        };

        let (shaped, att) = shape_envelope(&self.config, &input.envelope, &drive, &time);
        let spectrum = self.injector.inject(&input.spectrum, &time, &shaped, att);
        trace!("[am-modulator] attenuation {att:.4}");
        OpticalSignal {
            spectrum,
            envelope: Waveform::new(
                time,
                shaped.into_iter().map(|v| Complex64::new(v, 0.0)).collect(),
            ),
        }
    }

    fn output_freq(&mut self) -> f64 {
        electrical_freq(self.drive.as_ref())
    }

    fn retrigger(&mut self, trigger: Trigger) {
        retrigger_electrical(self.drive.as_ref(), trigger);
    }
}

impl Reconfigurable<ModulatorConfig> for AmModulator {
    fn update_config(&mut self, config: ModulatorConfig) {
        self.config = config.normalized();
    }
}

/// Dual-drive modulator producing a complex envelope (I on the real part).
pub struct QamModulator {
    config: ModulatorConfig,
    optical: Option<OpticalLink>,
    drive_i: Option<ElectricalLink>,
    drive_q: Option<ElectricalLink>,
    injector: SidebandInjector,
    pulls: u64,
    cached: Option<OpticalSignal>,
}

impl QamModulator {
    pub fn new(config: ModulatorConfig) -> Self {
        Self {
            config: config.normalized(),
            optical: None,
            drive_i: None,
            drive_q: None,
            injector: SidebandInjector::new(),
            pulls: 0,
            cached: None,
        }
    }

    pub fn config(&self) -> ModulatorConfig {
        self.config
    }

    pub fn set_inputs(
        &mut self,
        optical: OpticalLink,
        drive_i: ElectricalLink,
        drive_q: ElectricalLink,
    ) {
        self.optical = Some(optical);
        self.drive_i = Some(drive_i);
        self.drive_q = Some(drive_q);
        self.pulls = 0;
        self.cached = None;
    }

    /// Modulated signal for this pull. Pulls come in pairs so both quadrature
    /// taps see the same symbols: odd-numbered pulls replay the last result.
    pub fn output_pair(&mut self) -> OpticalSignal {
        let replay = self.pulls % 2 == 1;
        self.pulls = self.pulls.wrapping_add(1);
        if replay {
            if let Some(cached) = &self.cached {
                return cached.clone();
            }
        }
        let fresh = self.modulate();
        self.cached = Some(fresh.clone());
        fresh
    }

    fn modulate(&mut self) -> OpticalSignal {
        let Some((input, _)) = pull_optical(self.optical.as_ref()) else {
            return OpticalSignal::default();
        };
        let drive_i = pull_electrical(self.drive_i.as_ref()).unwrap_or_default();
        let drive_q = pull_electrical(self.drive_q.as_ref()).unwrap_or_default();
        let time = if drive_i.time.is_empty() {
            input.envelope.time.clone()
        } else {
            drive_i.time
        };

        let (shaped_i, att_i) = shape_envelope(&self.config, &input.envelope, &drive_i.signal, &time);
        let (shaped_q, _) = shape_envelope(&self.config, &input.envelope, &drive_q.signal, &time);
        let spectrum = self.injector.inject(&input.spectrum, &time, &shaped_i, att_i);
        OpticalSignal {
            spectrum,
            envelope: Waveform::new(
                time,
                shaped_i
                    .into_iter()
                    .zip(shaped_q)
                    .map(|(i, q)| Complex64::new(i, q))
                    .collect(),
            ),
        }
    }
}

impl Default for QamModulator {
    fn default() -> Self {
        Self::new(ModulatorConfig::default())
    }
}

impl OpticalNode for QamModulator {
    fn output_opt_signal(&mut self) -> OpticalSignal {
        self.output_pair()
    }

    fn output_freq(&mut self) -> f64 {
        electrical_freq(self.drive_i.as_ref())
    }

    fn retrigger(&mut self, trigger: Trigger) {
        retrigger_electrical(self.drive_i.as_ref(), trigger);
        retrigger_electrical(self.drive_q.as_ref(), trigger);
    }
}

impl Reconfigurable<ModulatorConfig> for QamModulator {
    fn update_config(&mut self, config: ModulatorConfig) {
        self.config = config.normalized();
    }
}

/// One quadrature of a [`QamModulator`] as a real optical envelope.
pub struct OpticalQuadrature {
    modulator: Option<Weak<RefCell<QamModulator>>>,
    branch: IqBranch,
}

impl OpticalQuadrature {
    pub fn new(branch: IqBranch) -> Self {
        Self {
            modulator: None,
            branch,
        }
    }

    pub fn set_inputs(&mut self, modulator: Weak<RefCell<QamModulator>>) {
        self.modulator = Some(modulator);
    }
}

impl OpticalNode for OpticalQuadrature {
    fn output_opt_signal(&mut self) -> OpticalSignal {
        let Some(modulator) = self.modulator.as_ref().and_then(Weak::upgrade) else {
            return OpticalSignal::default();
        };
        let mut signal = modulator.borrow_mut().output_pair();
        let branch = self.branch;
        signal
            .envelope
            .amplitude
            .iter_mut()
            .for_each(|v| *v = Complex64::new(branch.pick(*v), 0.0));
        signal
    }

    fn output_freq(&mut self) -> f64 {
        self.modulator
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|m| m.borrow_mut().output_freq())
            .unwrap_or(0.0)
    }

    fn retrigger(&mut self, trigger: Trigger) {
        if let Some(modulator) = self.modulator.as_ref().and_then(Weak::upgrade) {
            modulator.borrow_mut().retrigger(trigger);
        }
    }
}
