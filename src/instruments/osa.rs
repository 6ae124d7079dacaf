//! Optical spectrum analyzer. Wavelengths in nm, power in mW.

use super::acquisition::{Acquisition, Instrument};
use super::analyzer::{DisplayConfig, Limit, Span, SpanEdit, SpanLimits, SpectrogramHistory};
use super::export::{Table, write_table};
use super::trace::{Averager, PeakHold};
use crate::lab::{OpticalLink, Reconfigurable, pull_optical};
use crate::sources::laser::{GRID_START_NM, GRID_STOP_NM};
use crate::util::signal::{argmax, interp};
use crate::util::units::DbLaw;
use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const LIMITS: SpanLimits = SpanLimits {
    floor: GRID_START_NM,
    ceiling: GRID_STOP_NM,
    nudge: 1e-2,
    rbw_min: Limit::Fixed(0.01),
    rbw_max: Limit::Fixed(2.0),
    points_min: Limit::PerSpan(2.0),
    points_max: Limit::PerSpan(0.01),
};

// Detector noise floor, mW (-70..-60 dBm).
const NOISE_MIN_MW: f64 = 1e-7;
const NOISE_MAX_MW: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsaConfig {
    pub span: Span,
    pub averages: usize,
    pub peak_hold: bool,
    pub display: DisplayConfig,
    pub spectrogram: bool,
    pub spectrogram_rows: usize,
}

impl Default for OsaConfig {
    fn default() -> Self {
        Self {
            span: Span {
                start: GRID_START_NM,
                stop: GRID_STOP_NM,
                rbw: 1.0,
                points: 1000,
            },
            averages: 1,
            peak_hold: false,
            display: DisplayConfig::default(),
            spectrogram: false,
            spectrogram_rows: 20,
        }
    }
}

impl OsaConfig {
    pub fn normalized(mut self) -> Self {
        self.span = self.span.normalized(&LIMITS);
        self.averages = self.averages.clamp(1, 1000);
        self.spectrogram_rows = self.spectrogram_rows.clamp(1, 10_000);
        self
    }
}

pub struct Osa {
    config: OsaConfig,
    input: Option<OpticalLink>,
    acquisition: Acquisition,
    peak: PeakHold,
    averager: Averager,
    trace: Vec<f64>,
    x_axis: Vec<f64>,
    history: SpectrogramHistory,
    rng: ChaCha8Rng,
}

impl Osa {
    pub fn new(config: OsaConfig) -> Self {
        Self::with_rng(config, ChaCha8Rng::from_entropy())
    }

    pub fn with_seed(config: OsaConfig, seed: u64) -> Self {
        Self::with_rng(config, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(config: OsaConfig, rng: ChaCha8Rng) -> Self {
        let config = config.normalized();
        let mut osa = Self {
            input: None,
            acquisition: Acquisition::default(),
            peak: PeakHold::default(),
            averager: Averager::new(config.averages),
            trace: Vec::new(),
            x_axis: Vec::new(),
            history: SpectrogramHistory::new(config.spectrogram_rows),
            config,
            rng,
        };
        osa.rebuild_buffers();
        osa
    }

    pub fn config(&self) -> OsaConfig {
        self.config
    }

    pub fn set_inputs(&mut self, input: OpticalLink) {
        self.input = Some(input);
        self.set_acquisition();
    }

    pub fn edit_span(&mut self, edit: SpanEdit) {
        let mut config = self.config;
        config.span.apply(edit, &LIMITS);
        self.update_config(config);
    }

    pub fn set_averages(&mut self, averages: usize) {
        let mut config = self.config;
        config.averages = averages;
        self.update_config(config);
    }

    pub fn set_peak_hold(&mut self, peak_hold: bool) {
        let mut config = self.config;
        config.peak_hold = peak_hold;
        self.update_config(config);
    }

    pub fn set_display(&mut self, display: DisplayConfig) {
        self.config.display = display;
    }

    pub fn set_spectrogram(&mut self, enabled: bool, rows: usize) {
        let mut config = self.config;
        config.spectrogram = enabled;
        config.spectrogram_rows = rows;
        self.update_config(config);
    }

    pub fn set_acquisition(&mut self) {
        let was_running = self.acquisition.pause();
        self.rebuild_buffers();
        let frame = self.measure();
        self.averager.prime(&frame);
        self.acquisition.resume(was_running);
    }

    fn rebuild_buffers(&mut self) {
        let points = self.config.span.points;
        self.x_axis = self.config.span.axis();
        self.trace = vec![0.0; points];
        self.peak.reset(points);
        self.averager = Averager::new(self.config.averages);
        self.history.reset(self.config.spectrogram_rows);
    }

    fn measure(&mut self) -> Vec<f64> {
        let mut data = match pull_optical(self.input.as_ref()) {
            Some((signal, _)) if !signal.spectrum.power.is_empty() => interp(
                &self.x_axis,
                &signal.spectrum.wavelength_nm,
                &signal.spectrum.power,
            )
            .into_iter()
            .map(|w| 1000.0 * w)
            .collect(),
            _ => vec![0.0; self.x_axis.len()],
        };
        for v in &mut data {
            *v += self.rng.gen_range(NOISE_MIN_MW..NOISE_MAX_MW);
        }
        data
    }

    pub fn x_axis(&self) -> &[f64] {
        &self.x_axis
    }

    pub fn trace(&self) -> &[f64] {
        &self.trace
    }

    /// Trace in display units (dBm with 10 log10 when enabled).
    pub fn display_trace(&self) -> Vec<f64> {
        self.config.display.render(&self.trace, DbLaw::Power)
    }

    pub fn history(&self) -> &SpectrogramHistory {
        &self.history
    }

    pub fn peak_wavelength(&self) -> Option<f64> {
        if self.trace.is_empty() {
            return None;
        }
        self.x_axis.get(argmax(&self.trace)).copied()
    }

    pub fn export(&mut self, path: Option<&Path>) -> Result<Option<PathBuf>> {
        let was_running = self.acquisition.pause();
        let unit = if self.config.display.db { "dBm" } else { "mW" };
        let table = if self.config.spectrogram {
            self.history.rows().fold(
                Table::new().column("WL (nm)", self.x_axis.clone()),
                |table, row| table.column(format!("P ({unit}) t={:.2}", row.elapsed), row.values.clone()),
            )
        } else {
            Table::new()
                .column("Wavelength (nm)", self.x_axis.clone())
                .column(format!("Power ({unit})"), self.display_trace())
        };
        let written = write_table(path, &table);
        self.acquisition.resume(was_running);
        written
    }
}

impl Default for Osa {
    fn default() -> Self {
        Self::new(OsaConfig::default())
    }
}

impl Instrument for Osa {
    fn name(&self) -> &'static str {
        "osa"
    }

    fn acquisition(&self) -> &Acquisition {
        &self.acquisition
    }

    fn acquisition_mut(&mut self) -> &mut Acquisition {
        &mut self.acquisition
    }

    fn acquire(&mut self) {
        let frame = self.measure();
        if self.config.spectrogram {
            let row = self.config.display.render(&frame, DbLaw::Power);
            self.history.push(row);
            self.trace = frame;
        } else if self.config.peak_hold {
            self.trace = self.peak.push(&frame).to_vec();
        } else {
            self.trace = self.averager.push(frame);
        }
        debug!(
            "[osa] peak at {:.3} nm",
            self.peak_wavelength().unwrap_or(f64::NAN)
        );
    }
}

impl Reconfigurable<OsaConfig> for Osa {
    fn update_config(&mut self, config: OsaConfig) {
        self.config = config.normalized();
        let span = self.config.span;
        info!(
            "[osa] {}..{} nm, rbw {} nm, {} points",
            span.start, span.stop, span.rbw, span.points
        );
        self.set_acquisition();
    }
}
