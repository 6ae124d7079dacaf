//! Low-pass electrical filter.
//!
//! The upstream generator is asked for a window three times longer than the
//! instrument's, phase-shifted so the middle third lines up with what the
//! instrument would have seen. The long window is smoothed with a Blackman
//! kernel and the middle third kept, which hides the convolution edges.

use crate::lab::{
    ElectricalNode, Reconfigurable, RetimableLink, Transient, TransientOverride, Trigger,
};
use crate::util::signal::{blackman, odd_window_width, smooth_same};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::rc::Weak;
use tracing::trace;

const OVERSAMPLE: f64 = 3.0;
// Kernel span in units of the cutoff period.
const KERNEL_PERIODS: f64 = 1.15;

pub const MIN_CUTOFF_HZ: f64 = 1e-3;
pub const MAX_CUTOFF_HZ: f64 = 1e12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub cutoff_hz: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { cutoff_hz: 120e6 }
    }
}

impl FilterConfig {
    pub fn normalized(mut self) -> Self {
        self.cutoff_hz = if self.cutoff_hz.is_finite() {
            self.cutoff_hz.clamp(MIN_CUTOFF_HZ, MAX_CUTOFF_HZ)
        } else {
            Self::default().cutoff_hz
        };
        self
    }
}

#[derive(Default)]
pub struct ElectricalFilter {
    config: FilterConfig,
    input: Option<RetimableLink>,
}

impl ElectricalFilter {
    pub fn cutoff_hz(&self) -> f64 {
        self.config.cutoff_hz
    }

    pub fn set_cutoff_hz(&mut self, cutoff_hz: f64) {
        self.update_config(FilterConfig { cutoff_hz });
    }

    pub fn set_inputs(&mut self, input: RetimableLink) {
        self.input = Some(input);
    }

    fn pull_oversampled(&self) -> Option<(Vec<f64>, Vec<f64>)> {
        let link = self.input.as_ref()?;
        let cutoff = self.config.cutoff_hz;
        let guard = TransientOverride::engage(link, |source, current| {
            let freq = source.output_freq();
            let sample_time = source.negotiated_sample_time();
            let shift = (freq / cutoff).atan() + TAU * freq * (OVERSAMPLE - 1.0) * sample_time / 2.0;
            Transient {
                timemult: OVERSAMPLE,
                phase: current.phase - shift,
            }
        })?;
        let mut source = guard.source().borrow_mut();
        let signal = source.output_signal();
        let time = source.output_timearray();
        Some((signal, time))
    }
}

impl ElectricalNode for ElectricalFilter {
    fn output_signal(&mut self) -> Vec<f64> {
        let Some((signal, time)) = self.pull_oversampled() else {
            return Vec::new();
        };
        let n1 = signal.len();
        let n0 = (n1 as f64 / OVERSAMPLE) as usize;
        let dt = match time.as_slice() {
            [t0, t1, ..] => t1 - t0,
            _ => return signal,
        };

        let width = odd_window_width((KERNEL_PERIODS / self.config.cutoff_hz) / dt, n1);
        let smoothed = smooth_same(&signal, &blackman(width));
        let added = (n1 - n0) / 2;
        trace!("[filter] kernel {width}, keeping {}..{}", added, n1 - added);
        smoothed[added..n1 - added].to_vec()
    }

    fn output_timearray(&mut self) -> Vec<f64> {
        self.input
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|node| node.borrow_mut().output_timearray())
            .unwrap_or_default()
    }

    fn output_freq(&mut self) -> f64 {
        self.input
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|node| node.borrow_mut().output_freq())
            .unwrap_or(0.0)
    }

    fn retrigger(&mut self, trigger: Trigger) {
        if let Some(node) = self.input.as_ref().and_then(Weak::upgrade) {
            node.borrow_mut().retrigger(trigger);
        }
    }
}

impl Reconfigurable<FilterConfig> for ElectricalFilter {
    fn update_config(&mut self, config: FilterConfig) {
        self.config = config.normalized();
    }
}
