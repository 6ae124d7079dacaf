//! Optical time-domain reflectometer. Synthesizes a backscatter trace from the
//! attached fiber's length and loss; nothing is pulled through the graph.

use super::export::{Table, write_table};
use crate::components::Fiber;
use crate::lab::Reconfigurable;
use crate::util::signal::linspace;
use crate::util::units::C_M_PER_S;
use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Weak;
use tracing::{debug, info};

const MIN_POINTS: usize = 20;
const MAX_POINTS: usize = 10_000_000;
const NOISE_TOP_DB: f64 = -100.0;
const NOISE_BOTTOM_DB: f64 = -120.0;
const LOSS_WOBBLE_DB_PER_KM: f64 = 0.005;
const RIPPLE_DB: f64 = 0.03;
const LAUNCH_POINTS: usize = 10;
const MAX_EVENTS: usize = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OtdrState {
    #[default]
    Idle,
    Measuring,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtdrConfig {
    pub power_dbm: f64,
    pub group_index: f64,
    pub pulse_width_ns: f64,
    pub range_km: f64,
}

impl Default for OtdrConfig {
    fn default() -> Self {
        Self {
            power_dbm: 0.0,
            group_index: 1.45,
            pulse_width_ns: 1.0,
            range_km: 100.0,
        }
    }
}

impl OtdrConfig {
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if !self.power_dbm.is_finite() {
            self.power_dbm = defaults.power_dbm;
        }
        if !(self.group_index.is_finite() && self.group_index >= 1.0) {
            self.group_index = defaults.group_index;
        }
        if !(self.pulse_width_ns.is_finite() && self.pulse_width_ns > 0.0) {
            self.pulse_width_ns = defaults.pulse_width_ns;
        }
        if !(self.range_km.is_finite() && self.range_km > 0.0) {
            self.range_km = defaults.range_km;
        }
        self
    }

    /// Two-point resolution in metres.
    pub fn resolution_m(&self) -> f64 {
        (C_M_PER_S / self.group_index) * self.pulse_width_ns * 1e-9
    }

    pub fn n_points(&self) -> usize {
        ((self.range_km * 1000.0 / self.resolution_m()).floor() as usize).clamp(MIN_POINTS, MAX_POINTS)
    }
}

/// A splice, connector or break: position in km and amplitude in dB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FiberEvent {
    pub position_km: f64,
    pub amplitude_db: f64,
}

pub struct Otdr {
    config: OtdrConfig,
    state: OtdrState,
    fiber: Option<Weak<RefCell<Fiber>>>,
    events: Vec<FiberEvent>,
    distance_km: Vec<f64>,
    trace_db: Vec<f64>,
    rng: ChaCha8Rng,
}

impl Otdr {
    pub fn new(config: OtdrConfig) -> Self {
        Self::with_rng(config, ChaCha8Rng::from_entropy())
    }

    pub fn with_seed(config: OtdrConfig, seed: u64) -> Self {
        Self::with_rng(config, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(config: OtdrConfig, rng: ChaCha8Rng) -> Self {
        let mut otdr = Self {
            config: config.normalized(),
            state: OtdrState::Idle,
            fiber: None,
            events: Vec::new(),
            distance_km: Vec::new(),
            trace_db: Vec::new(),
            rng,
        };
        otdr.rebuild_axis();
        otdr
    }

    pub fn config(&self) -> OtdrConfig {
        self.config
    }

    pub fn state(&self) -> OtdrState {
        self.state
    }

    /// Attaching a fiber starts a fresh set of events.
    pub fn set_input_fiber(&mut self, fiber: Weak<RefCell<Fiber>>) {
        self.fiber = Some(fiber);
        self.events.clear();
    }

    /// Forgets the cached events; the next measurement draws new ones.
    pub fn reset_events(&mut self) {
        self.events.clear();
    }

    pub fn events(&self) -> &[FiberEvent] {
        &self.events
    }

    pub fn distance_km(&self) -> &[f64] {
        &self.distance_km
    }

    pub fn trace_db(&self) -> &[f64] {
        &self.trace_db
    }

    fn rebuild_axis(&mut self) {
        let n = self.config.n_points();
        self.distance_km = linspace(0.0, self.config.range_km, n);
        self.trace_db = vec![0.0; n];
    }

    fn noise(&mut self) -> f64 {
        self.rng.gen_range(NOISE_BOTTOM_DB..NOISE_TOP_DB)
    }

    fn fiber_params(&self) -> (f64, f64) {
        self.fiber
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|f| {
                let f = f.borrow();
                (f.length_km(), f.attenuation_db_per_km())
            })
            .unwrap_or((0.0, 0.0))
    }

    fn draw_events(&mut self, length_km: f64) {
        let count = self.rng.gen_range(1..=MAX_EVENTS);
        let low = 0.1f64.min(length_km);
        self.events = (0..count)
            .map(|_| FiberEvent {
                position_km: if length_km > low {
                    self.rng.gen_range(low..length_km)
                } else {
                    low
                },
                amplitude_db: self.rng.gen_range(-5.0..3.0),
            })
            .collect();
        debug!("[otdr] drew {} events", self.events.len());
    }

    /// Runs one shot. Returns the normalized trace in dB.
    pub fn measure(&mut self) -> &[f64] {
        self.state = OtdrState::Measuring;
        let (length_km, loss) = self.fiber_params();
        let n = self.distance_km.len();
        let wobble_every = (n / 10).max(1);

        let mut end: Option<usize> = None;
        let mut slope = loss;
        let mut trace = Vec::with_capacity(n);
        for i in 0..n {
            let z = self.distance_km[i];
            let level = if z <= length_km {
                if i % wobble_every == 0 {
                    slope = loss + self.rng.gen_range(-LOSS_WOBBLE_DB_PER_KM..LOSS_WOBBLE_DB_PER_KM);
                }
                let rp = self.config.power_dbm - z * slope;
                if rp <= NOISE_TOP_DB { self.noise() } else { rp }
            } else {
                if end.is_none() {
                    end = Some(i.saturating_sub(1));
                }
                self.noise()
            };
            trace.push(level + self.rng.gen_range(-RIPPLE_DB..RIPPLE_DB));
        }

        if self.events.is_empty() && length_km > 0.0 {
            self.draw_events(length_km);
        }
        let end_index = end.unwrap_or(n);
        for event in &self.events {
            let loc = nearest_index(&self.distance_km, event.position_km);
            if event.amplitude_db < 0.0 && loc < end_index {
                trace[loc..].iter_mut().for_each(|v| *v += event.amplitude_db);
            } else {
                trace[loc] += event.amplitude_db;
                if loc + 1 < n && loc > 0 {
                    trace[loc + 1] = trace[loc - 1];
                }
            }
        }

        // Nothing inside the fiber drops under the floor, nothing past the
        // end rises above it.
        for v in trace.iter_mut().take(end_index) {
            if *v < NOISE_TOP_DB {
                *v = self.rng.gen_range(NOISE_BOTTOM_DB..NOISE_TOP_DB);
            }
        }
        for v in trace.iter_mut().skip(end_index) {
            *v = self.rng.gen_range(NOISE_BOTTOM_DB..NOISE_TOP_DB);
        }

        trace.iter_mut().take(LAUNCH_POINTS).for_each(|v| *v += 1.0);
        if n > 1 {
            trace[1] += 1.0;
        }
        if let Some(e) = end.filter(|&e| e > 0 && e + 1 < n) {
            trace[e] += 2.0;
            trace[e + 1] = trace[e - 1];
        }

        let top = trace.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if top.is_finite() {
            trace.iter_mut().for_each(|v| *v -= top);
        }
        self.trace_db = trace;
        self.state = OtdrState::Idle;
        info!(
            "[otdr] {:.2} km at {:.3} dB/km, {} events, {} points",
            length_km,
            loss,
            self.events.len(),
            n
        );
        &self.trace_db
    }

    pub fn export(&self, path: Option<&Path>) -> Result<Option<PathBuf>> {
        let table = Table::new()
            .column("Length (km)", self.distance_km.clone())
            .column("Rel. reflected power (dB)", self.trace_db.clone());
        write_table(path, &table)
    }
}

impl Default for Otdr {
    fn default() -> Self {
        Self::new(OtdrConfig::default())
    }
}

impl Reconfigurable<OtdrConfig> for Otdr {
    fn update_config(&mut self, config: OtdrConfig) {
        self.config = config.normalized();
        self.rebuild_axis();
        debug!(
            "[otdr] resolution {:.3} m, {} points",
            self.config.resolution_m(),
            self.config.n_points()
        );
    }
}

fn nearest_index(axis: &[f64], value: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &x) in axis.iter().enumerate() {
        let d = (x - value).abs();
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::FiberConfig;
    use crate::lab::{Handle, Lab};

    fn short_range() -> OtdrConfig {
        OtdrConfig {
            pulse_width_ns: 100.0,
            range_km: 50.0,
            ..OtdrConfig::default()
        }
    }

    #[test]
    fn resolution_and_points() {
        let cfg = OtdrConfig::default();
        assert!((cfg.resolution_m() - 0.206_896_55).abs() < 1e-6);
        assert_eq!(cfg.n_points(), 483_333);
        let tiny = OtdrConfig {
            range_km: 1e-3,
            ..OtdrConfig::default()
        };
        assert_eq!(tiny.n_points(), 20);
    }

    #[test]
    fn trace_is_normalized_and_falls_with_distance() {
        let mut lab = Lab::new();
        let fiber: Handle<Fiber> = lab.add_configured(
            "fiber",
            FiberConfig {
                length_km: 30.0,
                attenuation_db_per_km: 0.35,
            },
        );
        let mut otdr = Otdr::with_seed(short_range(), 21);
        otdr.set_input_fiber(fiber.downgrade());
        let trace = otdr.measure().to_vec();
        assert_eq!(otdr.state(), OtdrState::Idle);
        assert_eq!(trace.len(), otdr.distance_km().len());
        let top = trace.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        assert!(top.abs() < 1e-12);
        // Past the fiber end only the noise floor remains.
        let tail = &trace[trace.len() - 100..];
        assert!(tail.iter().all(|&v| v < -90.0));
        assert!(!otdr.events().is_empty() && otdr.events().len() <= MAX_EVENTS);
    }

    #[test]
    fn events_are_cached_until_reset() {
        let mut lab = Lab::new();
        let fiber = lab.add("fiber", Fiber::default());
        let mut otdr = Otdr::with_seed(short_range(), 3);
        otdr.set_input_fiber(fiber.downgrade());
        otdr.measure();
        let first = otdr.events().to_vec();
        otdr.measure();
        assert_eq!(otdr.events(), first.as_slice());
        otdr.reset_events();
        assert!(otdr.events().is_empty());
        otdr.measure();
        assert_ne!(otdr.events(), first.as_slice());
        assert!(otdr.events().iter().all(|e| e.position_km >= 0.1 && e.position_km <= 1.0));
    }

    #[test]
    fn unattached_otdr_sees_only_noise() {
        let mut otdr = Otdr::with_seed(short_range(), 1);
        let trace = otdr.measure().to_vec();
        assert!(otdr.events().is_empty());
        assert!(trace.iter().all(|v| v.is_finite() && *v <= 0.0));
    }

    #[test]
    fn export_has_two_columns() {
        let mut otdr = Otdr::with_seed(short_range(), 2);
        otdr.measure();
        let dir = tempfile::tempdir().unwrap();
        let path = otdr.export(Some(&dir.path().join("otdr"))).unwrap().unwrap();
        let cols = crate::instruments::export::read_columns(&path, &[0, 1]).unwrap();
        assert_eq!(cols[0].len(), otdr.distance_km().len());
    }
}
