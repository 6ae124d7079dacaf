//! Electrical spectrum analyzer. Frequencies are in MHz.

use super::acquisition::{Acquisition, Instrument};
use super::analyzer::{DisplayConfig, Limit, Span, SpanEdit, SpanLimits, SpectrogramHistory};
use super::export::{Table, write_table};
use super::trace::{Averager, PeakHold};
use crate::lab::{
    ClockLink, ElectricalLink, Reconfigurable, SampleClock, SampleSpec, SinkNode, Trigger,
};
use crate::util::signal::{argmax, kaiser};
use crate::util::units::DbLaw;
use anyhow::Result;
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use tracing::{debug, info};

pub const LIMITS: SpanLimits = SpanLimits {
    floor: 0.0,
    ceiling: 20_000.0,
    nudge: 1e-3,
    rbw_min: Limit::PerSpan(1e6),
    rbw_max: Limit::PerSpan(10.0),
    points_min: Limit::PerSpan(2000.0),
    points_max: Limit::PerSpan(1e-4),
};

const MAX_TURBO: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EsaConfig {
    pub span: Span,
    pub averages: usize,
    pub peak_hold: bool,
    pub display: DisplayConfig,
    pub kaiser: bool,
    pub kaiser_beta: f64,
    /// Oversampling factor of the acquired record.
    pub turbo: u32,
    /// Retrigger sources at phase 0 instead of their reference phase.
    pub sync_start: bool,
    pub spectrogram: bool,
    pub spectrogram_rows: usize,
}

impl Default for EsaConfig {
    fn default() -> Self {
        Self {
            span: Span::default(),
            averages: 1,
            peak_hold: false,
            display: DisplayConfig::default(),
            kaiser: false,
            kaiser_beta: 0.0,
            turbo: 1,
            sync_start: false,
            spectrogram: false,
            spectrogram_rows: 20,
        }
    }
}

impl EsaConfig {
    pub fn normalized(mut self) -> Self {
        self.span = self.span.normalized(&LIMITS);
        self.averages = self.averages.clamp(1, 1000);
        self.turbo = self.turbo.clamp(1, MAX_TURBO);
        if !(self.kaiser_beta.is_finite() && self.kaiser_beta >= 0.0) {
            self.kaiser_beta = 0.0;
        }
        self.spectrogram_rows = self.spectrogram_rows.clamp(1, 10_000);
        self
    }

    /// Acquisition window in seconds: `1/rbw` with the RBW in MHz.
    pub fn sample_time(&self) -> f64 {
        (1.0 / self.span.rbw) / 1e6
    }

    /// Record length without oversampling.
    pub fn record_len(&self) -> usize {
        (2.0 * self.span.stop / self.span.rbw).floor() as usize
    }

    pub fn n_points(&self) -> usize {
        (self.turbo as f64 * 2.0 * self.span.stop / self.span.rbw).floor() as usize
    }
}

struct Transform {
    len: usize,
    fft: Arc<dyn RealToComplex<f64>>,
    input: Vec<f64>,
    output: Vec<Complex64>,
    scratch: Vec<Complex64>,
}

impl Transform {
    fn new(len: usize) -> Self {
        let fft = RealFftPlanner::<f64>::new().plan_fft_forward(len);
        Self {
            input: fft.make_input_vec(),
            output: fft.make_output_vec(),
            scratch: fft.make_scratch_vec(),
            len,
            fft,
        }
    }

    /// Magnitudes of bins `first..first + count` of the full two-sided
    /// spectrum; bins above Nyquist mirror the lower half.
    fn magnitudes(&mut self, data: &[f64], first: usize, count: usize) -> Vec<f64> {
        self.input.iter_mut().for_each(|v| *v = 0.0);
        self.input
            .iter_mut()
            .zip(data)
            .for_each(|(dst, &src)| *dst = src);
        if self
            .fft
            .process_with_scratch(&mut self.input, &mut self.output, &mut self.scratch)
            .is_err()
        {
            return vec![0.0; count];
        }
        (first..first + count)
            .map(|k| {
                let bin = if k < self.output.len() {
                    Some(k)
                } else {
                    self.len.checked_sub(k).filter(|&m| m > 0)
                };
                bin.and_then(|b| self.output.get(b)).map_or(0.0, |c| c.norm())
            })
            .collect()
    }
}

pub struct Esa {
    config: EsaConfig,
    clock: Rc<SampleClock>,
    input: Option<ElectricalLink>,
    acquisition: Acquisition,
    transform: Option<Transform>,
    peak: PeakHold,
    averager: Averager,
    trace: Vec<f64>,
    x_axis: Vec<f64>,
    history: SpectrogramHistory,
}

impl Esa {
    pub fn new(config: EsaConfig) -> Self {
        let config = config.normalized();
        let mut esa = Self {
            clock: Rc::new(SampleClock::default()),
            input: None,
            acquisition: Acquisition::default(),
            transform: None,
            peak: PeakHold::default(),
            averager: Averager::new(config.averages),
            trace: Vec::new(),
            x_axis: Vec::new(),
            history: SpectrogramHistory::new(config.spectrogram_rows),
            config,
        };
        esa.rebuild_buffers();
        esa
    }

    pub fn config(&self) -> EsaConfig {
        self.config
    }

    pub fn clock_link(&self) -> ClockLink {
        let clock: Rc<dyn SinkNode> = self.clock.clone();
        Rc::downgrade(&clock)
    }

    pub fn sample_spec(&self) -> SampleSpec {
        self.clock.get()
    }

    pub fn set_inputs(&mut self, input: ElectricalLink) {
        self.input = Some(input);
        self.set_acquisition();
    }

    /// Applies one span control edit and reconciles the others.
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

    pub fn set_window(&mut self, kaiser: bool, beta: f64) {
        let mut config = self.config;
        config.kaiser = kaiser;
        config.kaiser_beta = beta;
        self.update_config(config);
    }

    pub fn set_turbo(&mut self, turbo: u32) {
        let mut config = self.config;
        config.turbo = turbo;
        self.update_config(config);
    }

    pub fn set_sync_start(&mut self, sync_start: bool) {
        let mut config = self.config;
        config.sync_start = sync_start;
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

    /// Resets reducers and history, then primes the averager with one record.
    pub fn set_acquisition(&mut self) {
        let was_running = self.acquisition.pause();
        self.rebuild_buffers();
        let frame = self.measure();
        self.averager.prime(&frame);
        self.acquisition.resume(was_running);
    }

    fn rebuild_buffers(&mut self) {
        let points = self.config.span.points;
        self.clock.set(SampleSpec {
            sample_time: self.config.sample_time(),
            n_points: self.config.n_points(),
        });
        self.x_axis = self.config.span.axis();
        self.trace = vec![0.0; points];
        self.peak.reset(points);
        self.averager = Averager::new(self.config.averages);
        self.history.reset(self.config.spectrogram_rows);
    }

    /// One magnitude record (Vpp per bin) over the configured span.
    fn measure(&mut self) -> Vec<f64> {
        let n_points = self.config.n_points();
        let points = self.config.span.points;
        let mut data = match self.input.as_ref().and_then(Weak::upgrade) {
            Some(node) => {
                let mut node = node.borrow_mut();
                node.retrigger(if self.config.sync_start {
                    Trigger::Phase(0.0)
                } else {
                    Trigger::Reference
                });
                node.output_signal().into_iter().map(|v| 2.0 * v).collect()
            }
            None => vec![0.0; n_points],
        };
        let len = data.len();
        if len < 2 {
            return vec![0.0; points];
        }
        if self.config.kaiser {
            let window = kaiser(len, self.config.kaiser_beta);
            data.iter_mut().zip(&window).for_each(|(d, w)| *d *= w);
        }

        let half = self.config.record_len() / 2;
        let first = half.saturating_sub(points);
        if self.transform.as_ref().is_none_or(|t| t.len != len) {
            self.transform = Some(Transform::new(len));
        }
        let Some(transform) = self.transform.as_mut() else {
            return vec![0.0; points];
        };
        let scale = 2.0 / len as f64;
        transform
            .magnitudes(&data, first, points)
            .into_iter()
            .map(|m| scale * m)
            .collect()
    }

    pub fn x_axis(&self) -> &[f64] {
        &self.x_axis
    }

    /// Latest reduced trace, linear.
    pub fn trace(&self) -> &[f64] {
        &self.trace
    }

    /// Trace in display units (dB with 20 log10 when enabled).
    pub fn display_trace(&self) -> Vec<f64> {
        self.config.display.render(&self.trace, DbLaw::Amplitude)
    }

    pub fn history(&self) -> &SpectrogramHistory {
        &self.history
    }

    /// Frequency (MHz) of the strongest bin.
    pub fn peak_frequency(&self) -> Option<f64> {
        if self.trace.is_empty() {
            return None;
        }
        self.x_axis.get(argmax(&self.trace)).copied()
    }

    pub fn export(&mut self, path: Option<&Path>) -> Result<Option<PathBuf>> {
        let was_running = self.acquisition.pause();
        let unit = if self.config.display.db { "dBm" } else { "V" };
        let table = if self.config.spectrogram {
            self.history.rows().fold(
                Table::new().column("Frequency (MHz)", self.x_axis.clone()),
                |table, row| {
                    table.column(format!("Mag. ({unit}) t={:.2}", row.elapsed), row.values.clone())
                },
            )
        } else {
            Table::new()
                .column("Frequency (MHz)", self.x_axis.clone())
                .column(format!("Magnitude ({unit})"), self.display_trace())
        };
        let written = write_table(path, &table);
        self.acquisition.resume(was_running);
        written
    }
}

impl Default for Esa {
    fn default() -> Self {
        Self::new(EsaConfig::default())
    }
}

impl Instrument for Esa {
    fn name(&self) -> &'static str {
        "esa"
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
            let row = self
                .config
                .display
                .render(&frame.iter().map(|v| v.abs()).collect::<Vec<_>>(), DbLaw::Amplitude);
            self.history.push(row);
            self.trace = frame;
        } else if self.config.peak_hold {
            self.trace = self.peak.push(&frame).to_vec();
        } else {
            self.trace = self.averager.push(frame);
        }
        debug!(
            "[esa] peak at {:.4} MHz",
            self.peak_frequency().unwrap_or(f64::NAN)
        );
    }
}

impl Reconfigurable<EsaConfig> for Esa {
    fn update_config(&mut self, config: EsaConfig) {
        self.config = config.normalized();
        let span = self.config.span;
        info!(
            "[esa] {}..{} MHz, rbw {} MHz, {} points",
            span.start, span.stop, span.rbw, span.points
        );
        self.set_acquisition();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::{Handle, Lab};
    use crate::sources::{FunctionGenerator, FunctionGeneratorConfig};

    fn esa_on_sine(frequency: f64) -> (Lab, Handle<Esa>) {
        let mut lab = Lab::new();
        let generator = lab.add(
            "gen",
            FunctionGenerator::with_seed(
                FunctionGeneratorConfig {
                    frequency,
                    ..FunctionGeneratorConfig::default()
                },
                8,
            ),
        );
        let esa = lab.add("esa", Esa::default());
        let clock = esa.borrow().clock_link();
        lab.sync(&generator, esa.id(), |g| g.set_inputs(clock)).unwrap();
        lab.connect(&esa, &[generator.id()], |e| e.set_inputs(generator.electrical()))
            .unwrap();
        (lab, esa)
    }

    #[test]
    fn default_contract() {
        let esa = Esa::default();
        let spec = esa.sample_spec();
        assert!((spec.sample_time - 100e-6).abs() < 1e-12);
        assert_eq!(spec.n_points, 2000);
        assert_eq!(esa.x_axis().len(), 1000);
    }

    #[test]
    fn resolves_a_sine_tone() {
        let (_lab, esa) = esa_on_sine(3e6);
        assert!(esa.borrow_mut().single());
        let peak = esa.borrow().peak_frequency().unwrap();
        assert!((peak - 3.0).abs() < 0.03, "peak at {peak} MHz");
        // 1 Vpp sine reads about 1 V in its bin.
        let top = esa.borrow().trace().iter().copied().fold(0.0, f64::max);
        assert!((top - 1.0).abs() < 0.1, "top {top}");
    }

    #[test]
    fn turbo_keeps_bin_spacing() {
        let (_lab, esa) = esa_on_sine(3e6);
        esa.borrow_mut().set_turbo(4);
        assert_eq!(esa.borrow().sample_spec().n_points, 8000);
        esa.borrow_mut().single();
        let peak = esa.borrow().peak_frequency().unwrap();
        assert!((peak - 3.0).abs() < 0.03);
    }

    #[test]
    fn kaiser_window_still_finds_the_tone() {
        let (_lab, esa) = esa_on_sine(2e6);
        esa.borrow_mut().set_window(true, 6.0);
        esa.borrow_mut().single();
        let peak = esa.borrow().peak_frequency().unwrap();
        assert!((peak - 2.0).abs() < 0.05);
    }

    #[test]
    fn span_edit_republishes_contract() {
        let mut esa = Esa::default();
        esa.edit_span(SpanEdit::Stop(20.0));
        assert_eq!(esa.config().span.points, 2000);
        assert_eq!(esa.sample_spec().n_points, 4000);
        esa.edit_span(SpanEdit::Points(500));
        assert!((esa.config().span.rbw - 0.04).abs() < 1e-12);
    }

    #[test]
    fn unwired_esa_shows_silence() {
        let mut esa = Esa::default();
        esa.single();
        assert!(esa.trace().iter().all(|&v| v == 0.0));
        assert!(esa.display_trace().iter().all(|&v| v < -200.0));
    }

    #[test]
    fn spectrogram_rows_accumulate_and_export() {
        let (_lab, esa) = esa_on_sine(1e6);
        esa.borrow_mut().set_spectrogram(true, 3);
        for _ in 0..5 {
            esa.borrow_mut().single();
        }
        assert_eq!(esa.borrow().history().len(), 3);
        let dir = tempfile::tempdir().unwrap();
        let path = esa
            .borrow_mut()
            .export(Some(&dir.path().join("sg.txt")))
            .unwrap()
            .unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let header: Vec<&str> = text.lines().next().unwrap().split('\t').collect();
        assert_eq!(header.len(), 4);
        assert!(header[1].starts_with("Mag. (dBm) t="));
    }
}
