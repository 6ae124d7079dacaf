//! Four-channel digital oscilloscope.

use super::acquisition::{Acquisition, Instrument};
use super::export::{Table, write_table};
use super::trace::{Averager, Persistence};
use crate::lab::{
    ClockLink, ElectricalLink, Reconfigurable, SampleClock, SampleSpec, SinkNode, Trigger,
};
use crate::util::signal::{fit_length, linspace};
use crate::util::units::{format_si, one_two_five};
use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use tracing::{debug, info};

pub const CHANNELS: usize = 4;
const DIVISIONS: f64 = 10.0;
const TIME_DIAL_BASE: f64 = 1e-12;
const VOLT_DIAL_BASE: f64 = 1e-4;
const MAX_POINTS: usize = 1_000_000;
const MAX_FRAMES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Phase locked to the horizontal offset.
    #[default]
    Auto,
    /// Random phase on every frame.
    Free,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub volts_per_div: f64,
    /// Vertical offset, V
    pub offset: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            volts_per_div: 0.5,
            offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscilloscopeConfig {
    pub n_points: usize,
    pub time_per_div: f64,
    /// Percent of the acquisition window.
    pub horizontal_offset_pct: f64,
    pub channels: [ChannelConfig; CHANNELS],
    pub averages: usize,
    pub hold: bool,
    pub hold_frames: usize,
    pub trigger: TriggerMode,
    /// Channel used as the X axis in XY mode.
    pub xy_channel: Option<usize>,
}

impl Default for OscilloscopeConfig {
    fn default() -> Self {
        let mut channels = [ChannelConfig::default(); CHANNELS];
        channels[0].enabled = true;
        Self {
            n_points: 1000,
            time_per_div: 100e-9,
            horizontal_offset_pct: 0.0,
            channels,
            averages: 1,
            hold: false,
            hold_frames: 2,
            trigger: TriggerMode::Auto,
            xy_channel: None,
        }
    }
}

impl OscilloscopeConfig {
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        self.n_points = self.n_points.clamp(2, MAX_POINTS);
        if !(self.time_per_div.is_finite() && self.time_per_div > 0.0) {
            self.time_per_div = defaults.time_per_div;
        }
        self.time_per_div = self.time_per_div.clamp(TIME_DIAL_BASE, 1e3);
        self.horizontal_offset_pct = if self.horizontal_offset_pct.is_finite() {
            self.horizontal_offset_pct.clamp(-100.0, 100.0)
        } else {
            0.0
        };
        for channel in &mut self.channels {
            if !(channel.volts_per_div.is_finite() && channel.volts_per_div > 0.0) {
                channel.volts_per_div = ChannelConfig::default().volts_per_div;
            }
            if !channel.offset.is_finite() {
                channel.offset = 0.0;
            }
        }
        self.averages = self.averages.clamp(1, MAX_FRAMES);
        self.hold_frames = self.hold_frames.clamp(1, MAX_FRAMES);
        self.xy_channel = self.xy_channel.filter(|&ch| ch < CHANNELS);
        if let Some(ch) = self.xy_channel {
            self.channels[ch].enabled = true;
        }
        self
    }

    pub fn sample_time(&self) -> f64 {
        DIVISIONS * self.time_per_div
    }

    pub fn time_offset(&self) -> f64 {
        0.01 * self.horizontal_offset_pct * self.sample_time()
    }

    pub fn time_per_div_label(&self) -> String {
        format!("{}s", format_si(self.time_per_div))
    }

    pub fn volts_per_div_label(&self, channel: usize) -> String {
        self.channels
            .get(channel)
            .map(|c| format!("{}V", format_si(c.volts_per_div)))
            .unwrap_or_default()
    }
}

pub struct Oscilloscope {
    config: OscilloscopeConfig,
    clock: Rc<SampleClock>,
    inputs: [Option<ElectricalLink>; CHANNELS],
    acquisition: Acquisition,
    averagers: Vec<Averager>,
    persistence: Vec<Persistence>,
    x_axis: Vec<f64>,
    traces: Vec<Vec<f64>>,
    rng: ChaCha8Rng,
}

impl Oscilloscope {
    pub fn new(config: OscilloscopeConfig) -> Self {
        Self::with_rng(config, ChaCha8Rng::from_entropy())
    }

    pub fn with_seed(config: OscilloscopeConfig, seed: u64) -> Self {
        Self::with_rng(config, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(config: OscilloscopeConfig, rng: ChaCha8Rng) -> Self {
        let config = config.normalized();
        let mut scope = Self {
            clock: Rc::new(SampleClock::new(SampleSpec {
                sample_time: config.sample_time(),
                n_points: config.n_points,
            })),
            config,
            inputs: Default::default(),
            acquisition: Acquisition::default(),
            averagers: Vec::new(),
            persistence: Vec::new(),
            x_axis: Vec::new(),
            traces: vec![Vec::new(); CHANNELS],
            rng,
        };
        scope.rebuild_buffers();
        scope
    }

    pub fn config(&self) -> OscilloscopeConfig {
        self.config
    }

    /// Link through which generators read this scope's sampling contract.
    pub fn clock_link(&self) -> ClockLink {
        let clock: Rc<dyn SinkNode> = self.clock.clone();
        Rc::downgrade(&clock)
    }

    pub fn sample_spec(&self) -> SampleSpec {
        self.clock.get()
    }

    pub fn set_inputs(&mut self, inputs: [Option<ElectricalLink>; CHANNELS]) {
        self.inputs = inputs;
        self.set_acquisition();
    }

    pub fn set_channel_input(&mut self, channel: usize, input: ElectricalLink) {
        if let Some(slot) = self.inputs.get_mut(channel) {
            *slot = Some(input);
            self.set_acquisition();
        }
    }

    pub fn set_time_per_div(&mut self, time_per_div: f64) {
        let mut config = self.config;
        config.time_per_div = time_per_div;
        self.update_config(config);
    }

    /// 1-2-5 dial starting at 1 ps/div.
    pub fn set_time_per_div_step(&mut self, step: u32) {
        self.set_time_per_div(one_two_five(step, TIME_DIAL_BASE));
    }

    pub fn set_horizontal_offset_pct(&mut self, pct: f64) {
        self.config.horizontal_offset_pct = pct;
        self.config = self.config.normalized();
        self.publish_window();
    }

    pub fn set_volts_per_div(&mut self, channel: usize, volts_per_div: f64) {
        if let Some(c) = self.config.channels.get_mut(channel) {
            c.volts_per_div = volts_per_div;
            self.config = self.config.normalized();
        }
    }

    /// 1-2-5 dial starting at 100 uV/div.
    pub fn set_volts_per_div_step(&mut self, channel: usize, step: u32) {
        self.set_volts_per_div(channel, one_two_five(step, VOLT_DIAL_BASE));
    }

    pub fn set_channel_offset(&mut self, channel: usize, offset: f64) {
        if let Some(c) = self.config.channels.get_mut(channel) {
            c.offset = offset;
            self.config = self.config.normalized();
        }
    }

    pub fn set_channel_enabled(&mut self, channel: usize, enabled: bool) {
        if let Some(c) = self.config.channels.get_mut(channel) {
            c.enabled = enabled;
        }
    }

    pub fn set_points(&mut self, n_points: usize) {
        let mut config = self.config;
        config.n_points = n_points;
        self.update_config(config);
    }

    pub fn set_averages(&mut self, averages: usize) {
        let mut config = self.config;
        config.averages = averages;
        self.update_config(config);
    }

    pub fn set_hold(&mut self, hold: bool, frames: usize) {
        let mut config = self.config;
        config.hold = hold;
        config.hold_frames = frames;
        self.update_config(config);
    }

    pub fn set_trigger(&mut self, trigger: TriggerMode) {
        self.config.trigger = trigger;
    }

    /// Selects the X channel for XY display, or `None` for time display.
    pub fn set_xy(&mut self, channel: Option<usize>) {
        let mut config = self.config;
        config.xy_channel = channel;
        self.update_config(config);
    }

    /// Rebuilds the axis and reducers for the current settings and primes the
    /// averaging buffers with one pull per channel.
    pub fn set_acquisition(&mut self) {
        let was_running = self.acquisition.pause();
        self.rebuild_buffers();
        for channel in 0..CHANNELS {
            let frame = self.pull_channel(channel);
            self.averagers[channel].prime(&frame);
        }
        self.acquisition.resume(was_running);
    }

    fn rebuild_buffers(&mut self) {
        self.publish_window();
        let n = self.config.n_points;
        self.averagers = (0..CHANNELS)
            .map(|_| Averager::new(self.config.averages))
            .collect();
        self.persistence = (0..CHANNELS)
            .map(|_| Persistence::new(self.config.hold_frames, n))
            .collect();
        self.traces = vec![vec![0.0; n]; CHANNELS];
    }

    fn publish_window(&mut self) {
        let spec = SampleSpec {
            sample_time: self.config.sample_time(),
            n_points: self.config.n_points,
        };
        self.clock.set(spec);
        let t0 = self.config.time_offset();
        self.x_axis = linspace(t0, t0 + spec.sample_time, spec.n_points);
    }

    fn pull_channel(&mut self, channel: usize) -> Vec<f64> {
        let n = self.config.n_points;
        let live = self.config.channels[channel].enabled;
        let node = self.inputs[channel].as_ref().and_then(Weak::upgrade);
        let Some(node) = node.filter(|_| live) else {
            return vec![0.0; n];
        };
        let mut node = node.borrow_mut();
        let phase = match self.config.trigger {
            TriggerMode::Auto => TAU * node.output_freq() * self.config.time_offset(),
            TriggerMode::Free => self.rng.gen_range(0.0..TAU),
        };
        node.retrigger(Trigger::Phase(phase));
        fit_length(node.output_signal(), n)
    }

    pub fn x_axis(&self) -> &[f64] {
        &self.x_axis
    }

    /// Latest reduced trace of a channel, in volts.
    pub fn trace(&self, channel: usize) -> &[f64] {
        self.traces.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Trace in screen divisions, offset applied.
    pub fn display_trace(&self, channel: usize) -> Vec<f64> {
        let Some(cfg) = self.config.channels.get(channel) else {
            return Vec::new();
        };
        self.trace(channel)
            .iter()
            .map(|v| (v + cfg.offset) / cfg.volts_per_div)
            .collect()
    }

    /// XY pairs in divisions for every other enabled channel against the X
    /// channel.
    pub fn xy_traces(&self) -> Option<Vec<(usize, Vec<f64>, Vec<f64>)>> {
        let x = self.config.xy_channel?;
        if !self.channel_live(x) {
            return None;
        }
        let x_values = self.display_trace(x);
        Some(
            (0..CHANNELS)
                .filter(|&ch| ch != x && self.channel_live(ch))
                .map(|ch| (ch, x_values.clone(), self.display_trace(ch)))
                .collect(),
        )
    }

    fn channel_live(&self, channel: usize) -> bool {
        self.config.channels[channel].enabled && self.inputs[channel].is_some()
    }

    pub fn export(&mut self, path: Option<&Path>) -> Result<Option<PathBuf>> {
        let was_running = self.acquisition.pause();
        let mut table = Table::new().column("Time (s)", self.x_axis.clone());
        for channel in 0..CHANNELS {
            if self.config.channels[channel].enabled {
                table = table.column(format!("CH{} (V)", channel + 1), self.traces[channel].clone());
            }
        }
        let written = write_table(path, &table);
        self.acquisition.resume(was_running);
        written
    }
}

impl Default for Oscilloscope {
    fn default() -> Self {
        Self::new(OscilloscopeConfig::default())
    }
}

impl Instrument for Oscilloscope {
    fn name(&self) -> &'static str {
        "oscilloscope"
    }

    fn acquisition(&self) -> &Acquisition {
        &self.acquisition
    }

    fn acquisition_mut(&mut self) -> &mut Acquisition {
        &mut self.acquisition
    }

    fn acquire(&mut self) {
        let t0 = self.config.time_offset();
        let base = linspace(t0, t0 + self.config.sample_time(), self.config.n_points);
        let hold = self.config.hold;
        let tiles = if hold { self.persistence[0].shown() } else { 1 };
        self.x_axis = base.repeat(tiles);

        for channel in 0..CHANNELS {
            if !self.channel_live(channel) {
                self.traces[channel] = vec![0.0; self.x_axis.len()];
                continue;
            }
            let frame = self.pull_channel(channel);
            self.traces[channel] = if hold {
                self.persistence[channel].push(frame)
            } else {
                self.averagers[channel].push(frame)
            };
        }
        if hold {
            self.persistence.iter_mut().for_each(Persistence::advance);
        }

        let ranges: Vec<String> = (0..CHANNELS)
            .filter(|&ch| self.channel_live(ch))
            .map(|ch| {
                let t = &self.traces[ch];
                let lo = t.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = t.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                format!("CH{} {:.4}..{:.4} V", ch + 1, lo, hi)
            })
            .collect();
        debug!("[oscilloscope] {}", ranges.join(", "));
    }
}

impl Reconfigurable<OscilloscopeConfig> for Oscilloscope {
    fn update_config(&mut self, config: OscilloscopeConfig) {
        self.config = config.normalized();
        info!(
            "[oscilloscope] {}/div, {} points",
            self.config.time_per_div_label(),
            self.config.n_points
        );
        self.set_acquisition();
    }
}
