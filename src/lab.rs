//! Pull-based signal pipeline: shared sample types and the capability traits
//! every bench node implements.

pub mod transient;
pub mod wiring;

pub use transient::{Transient, TransientOverride};
pub use wiring::{Handle, Lab, NodeId};

use rustfft::num_complex::Complex64;
use std::cell::{Cell, RefCell};
use std::rc::Weak;

/// A sampled waveform: a uniform time axis and one amplitude per instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform<T> {
    pub time: Vec<f64>,
    pub amplitude: Vec<T>,
}

impl<T> Default for Waveform<T> {
    fn default() -> Self {
        Self {
            time: Vec::new(),
            amplitude: Vec::new(),
        }
    }
}

impl<T> Waveform<T> {
    pub fn new(time: Vec<f64>, amplitude: Vec<T>) -> Self {
        debug_assert_eq!(time.len(), amplitude.len());
        Self { time, amplitude }
    }

    pub fn len(&self) -> usize {
        self.amplitude.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplitude.is_empty()
    }

    pub fn step(&self) -> f64 {
        match self.time.as_slice() {
            [t0, t1, ..] => t1 - t0,
            _ => 0.0,
        }
    }
}

/// Optical power (W) per wavelength bin (nm).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrum {
    pub wavelength_nm: Vec<f64>,
    pub power: Vec<f64>,
}

impl Spectrum {
    pub fn bin_width(&self) -> f64 {
        match self.wavelength_nm.as_slice() {
            [w0, w1, ..] => w1 - w0,
            _ => 0.0,
        }
    }
}

/// What travels on an optical link: the spectrum plus the complex power envelope
/// (I on the real part, Q on the imaginary part).
#[derive(Debug, Clone, Default)]
pub struct OpticalSignal {
    pub spectrum: Spectrum,
    pub envelope: Waveform<Complex64>,
}

impl OpticalSignal {
    pub fn scale(&mut self, factor: f64) {
        self.spectrum.power.iter_mut().for_each(|p| *p *= factor);
        self.envelope.amplitude.iter_mut().for_each(|a| *a *= factor);
    }
}

/// Sampling contract published by a terminal instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleSpec {
    pub sample_time: f64,
    pub n_points: usize,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            sample_time: 2e-6,
            n_points: 1000,
        }
    }
}

/// How a sink re-aligns the sources feeding it before an acquisition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    /// Set the carried phase reference to this value (radians).
    Phase(f64),
    /// Restore the phase reference captured when the source was built.
    Reference,
}

/// Which half of a complex baseband signal a tap exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqBranch {
    InPhase,
    Quadrature,
}

impl IqBranch {
    pub fn pick(self, value: Complex64) -> f64 {
        match self {
            IqBranch::InPhase => value.re,
            IqBranch::Quadrature => value.im,
        }
    }
}

pub trait OpticalNode {
    fn output_opt_signal(&mut self) -> OpticalSignal;

    /// Frequency of the modulating signal, 0 for an unmodulated carrier.
    fn output_freq(&mut self) -> f64 {
        0.0
    }

    fn retrigger(&mut self, _trigger: Trigger) {}
}

pub trait ElectricalNode {
    fn output_signal(&mut self) -> Vec<f64>;
    fn output_timearray(&mut self) -> Vec<f64>;
    fn output_freq(&mut self) -> f64;
    fn retrigger(&mut self, trigger: Trigger);
}

pub trait SinkNode {
    fn output_sampletime(&self) -> f64;
    fn output_npoints(&self) -> usize;
}

/// A generator whose time window and phase may be borrowed by a downstream
/// filter for the duration of one pull.
pub trait RetimableSource: ElectricalNode {
    fn transient(&self) -> Transient;
    fn set_transient(&mut self, transient: Transient);
    /// Sample time the source would use on its next pull, before oversampling.
    fn negotiated_sample_time(&self) -> f64;
}

pub type OpticalLink = Weak<RefCell<dyn OpticalNode>>;
pub type ElectricalLink = Weak<RefCell<dyn ElectricalNode>>;
pub type RetimableLink = Weak<RefCell<dyn RetimableSource>>;
pub type ClockLink = Weak<dyn SinkNode>;

/// Sampling contract cell shared between an instrument and its sources.
///
/// Lives outside the instrument's `RefCell` so a source can read it while the
/// instrument is in the middle of a tick.
#[derive(Debug, Default)]
pub struct SampleClock {
    spec: Cell<SampleSpec>,
}

impl SampleClock {
    pub fn new(spec: SampleSpec) -> Self {
        Self {
            spec: Cell::new(spec),
        }
    }

    pub fn get(&self) -> SampleSpec {
        self.spec.get()
    }

    pub fn set(&self, spec: SampleSpec) {
        self.spec.set(spec);
    }
}

impl SinkNode for SampleClock {
    fn output_sampletime(&self) -> f64 {
        self.spec.get().sample_time
    }

    fn output_npoints(&self) -> usize {
        self.spec.get().n_points
    }
}

/// Configuration blocks applied wholesale to a node or instrument.
pub trait Reconfigurable<Cfg> {
    fn update_config(&mut self, config: Cfg);
}

/// Result of pulling an electrical link.
#[derive(Debug, Clone, Default)]
pub struct ElectricalPull {
    pub signal: Vec<f64>,
    pub time: Vec<f64>,
}

// Signal before time axis: the axis of a generator reflects the window of
// the pull that just happened.
pub fn pull_electrical(link: Option<&ElectricalLink>) -> Option<ElectricalPull> {
    let node = link?.upgrade()?;
    let mut node = node.borrow_mut();
    let signal = node.output_signal();
    let time = node.output_timearray();
    Some(ElectricalPull { signal, time })
}

pub fn pull_optical(link: Option<&OpticalLink>) -> Option<(OpticalSignal, f64)> {
    let node = link?.upgrade()?;
    let mut node = node.borrow_mut();
    let freq = node.output_freq();
    Some((node.output_opt_signal(), freq))
}

pub fn electrical_freq(link: Option<&ElectricalLink>) -> f64 {
    link.and_then(Weak::upgrade)
        .map(|node| node.borrow_mut().output_freq())
        .unwrap_or(0.0)
}

pub fn retrigger_electrical(link: Option<&ElectricalLink>, trigger: Trigger) {
    if let Some(node) = link.and_then(Weak::upgrade) {
        node.borrow_mut().retrigger(trigger);
    }
}

pub fn retrigger_optical(link: Option<&OpticalLink>, trigger: Trigger) {
    if let Some(node) = link.and_then(Weak::upgrade) {
        node.borrow_mut().retrigger(trigger);
    }
}

pub fn read_clock(link: Option<&ClockLink>) -> Option<SampleSpec> {
    let clock = link?.upgrade()?;
    Some(SampleSpec {
        sample_time: clock.output_sampletime(),
        n_points: clock.output_npoints(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn dropped_links_read_as_no_signal() {
        let link: ElectricalLink = {
            struct Dummy;
            impl ElectricalNode for Dummy {
                fn output_signal(&mut self) -> Vec<f64> {
                    vec![1.0]
                }
                fn output_timearray(&mut self) -> Vec<f64> {
                    vec![0.0]
                }
                fn output_freq(&mut self) -> f64 {
                    5.0
                }
                fn retrigger(&mut self, _trigger: Trigger) {}
            }
            let node: Rc<RefCell<dyn ElectricalNode>> = Rc::new(RefCell::new(Dummy));
            Rc::downgrade(&node)
        };
        assert!(pull_electrical(Some(&link)).is_none());
        assert!(pull_electrical(None).is_none());
        assert_eq!(electrical_freq(Some(&link)), 0.0);
    }

    #[test]
    fn clock_is_readable_through_weak_link() {
        let clock = Rc::new(SampleClock::new(SampleSpec {
            sample_time: 1e-3,
            n_points: 64,
        }));
        let as_sink: Rc<dyn SinkNode> = clock.clone();
        let link: ClockLink = Rc::downgrade(&as_sink);
        assert_eq!(read_clock(Some(&link)).map(|s| s.n_points), Some(64));
        clock.set(SampleSpec {
            sample_time: 2e-3,
            n_points: 10,
        });
        assert_eq!(read_clock(Some(&link)).map(|s| s.sample_time), Some(2e-3));
    }

    #[test]
    fn optical_scale_touches_spectrum_and_envelope() {
        let mut signal = OpticalSignal {
            spectrum: Spectrum {
                wavelength_nm: vec![1.0, 2.0],
                power: vec![2.0, 4.0],
            },
            envelope: Waveform::new(vec![0.0, 1.0], vec![Complex64::new(1.0, 1.0); 2]),
        };
        signal.scale(0.5);
        assert_eq!(signal.spectrum.power, vec![1.0, 2.0]);
        assert_eq!(signal.envelope.amplitude[0], Complex64::new(0.5, 0.5));
    }
}
