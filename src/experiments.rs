//! Named bench topologies. Each one wires sources, components and
//! instruments into a fresh [`Lab`] using the persisted settings.

use crate::components::{
    AmModulator, ElectricalFilter, Fiber, FiberConfig, OpticalQuadrature, Photodetector,
    QamModulator,
};
use crate::instruments::{
    Esa, Instrument, Osa, Oscilloscope, OscilloscopeConfig, Otdr, SpanEdit, TICK_INTERVAL,
};
use crate::lab::{ElectricalLink, Handle, IqBranch, Lab, NodeId, OpticalLink};
use crate::settings::LabSettings;
use crate::sources::{FunctionGenerator, Laser, PrbsGenerator, QamGenerator, QamTap};
use anyhow::{Result, bail};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Experiment {
    SignalScope,
    FourSignalScope,
    FilterBode,
    EyeDiagram,
    Constellation,
    EsaSignal,
    EsaPrbs,
    EsaFilter,
    OpticalModOsa,
    OpticalModScope,
    OpticalPrbsScope,
    OpticalQamScope,
    FiberOtdr,
}

impl Experiment {
    pub const ALL: [Experiment; 13] = [
        Experiment::SignalScope,
        Experiment::FourSignalScope,
        Experiment::FilterBode,
        Experiment::EyeDiagram,
        Experiment::Constellation,
        Experiment::EsaSignal,
        Experiment::EsaPrbs,
        Experiment::EsaFilter,
        Experiment::OpticalModOsa,
        Experiment::OpticalModScope,
        Experiment::OpticalPrbsScope,
        Experiment::OpticalQamScope,
        Experiment::FiberOtdr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Experiment::SignalScope => "signal_scope",
            Experiment::FourSignalScope => "four_signal_scope",
            Experiment::FilterBode => "filter_bode",
            Experiment::EyeDiagram => "eye_diagram",
            Experiment::Constellation => "constellation",
            Experiment::EsaSignal => "esa_signal",
            Experiment::EsaPrbs => "esa_prbs",
            Experiment::EsaFilter => "esa_filter",
            Experiment::OpticalModOsa => "optical_mod_osa",
            Experiment::OpticalModScope => "optical_mod_scope",
            Experiment::OpticalPrbsScope => "optical_prbs_scope",
            Experiment::OpticalQamScope => "optical_qam_scope",
            Experiment::FiberOtdr => "fiber_otdr",
        }
    }

    /// Builds the topology. With `seed` every random node is seeded from it,
    /// which makes runs reproducible.
    pub fn build(self, settings: &LabSettings, seed: Option<u64>) -> Result<Bench> {
        let mut ctx = Builder {
            lab: Lab::new(),
            settings,
            seed,
        };
        let probes = match self {
            Experiment::SignalScope => ctx.signal_scope(1)?,
            Experiment::FourSignalScope => ctx.signal_scope(4)?,
            Experiment::FilterBode => ctx.filter_bode()?,
            Experiment::EyeDiagram => ctx.eye_diagram()?,
            Experiment::Constellation => ctx.constellation()?,
            Experiment::EsaSignal => ctx.esa_signal()?,
            Experiment::EsaPrbs => ctx.esa_prbs()?,
            Experiment::EsaFilter => ctx.esa_filter()?,
            Experiment::OpticalModOsa => ctx.optical_mod_osa()?,
            Experiment::OpticalModScope => ctx.optical_scope(Drive::Sine)?,
            Experiment::OpticalPrbsScope => ctx.optical_scope(Drive::Prbs)?,
            Experiment::OpticalQamScope => ctx.optical_qam_scope()?,
            Experiment::FiberOtdr => ctx.fiber_otdr()?,
        };
        info!("[experiment] {self}: {} nodes", ctx.lab.len());
        Ok(Bench {
            experiment: self,
            lab: ctx.lab,
            probes,
        })
    }
}

impl fmt::Display for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Experiment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        match Self::ALL.iter().find(|e| e.name() == wanted) {
            Some(&experiment) => Ok(experiment),
            None => bail!(
                "unknown experiment {s:?}; expected one of: {}",
                Self::ALL.map(Experiment::name).join(", ")
            ),
        }
    }
}

/// An instrument owned by a running bench.
#[derive(Clone)]
pub enum Probe {
    Scope(Handle<Oscilloscope>),
    Esa(Handle<Esa>),
    Osa(Handle<Osa>),
    Otdr(Handle<Otdr>),
}

impl Probe {
    pub fn name(&self) -> &'static str {
        match self {
            Probe::Scope(_) => "oscilloscope",
            Probe::Esa(_) => "esa",
            Probe::Osa(_) => "osa",
            Probe::Otdr(_) => "otdr",
        }
    }

    fn with_instrument<R>(&self, f: impl FnOnce(&mut dyn Instrument) -> R) -> Option<R> {
        match self {
            Probe::Scope(h) => Some(f(&mut *h.borrow_mut())),
            Probe::Esa(h) => Some(f(&mut *h.borrow_mut())),
            Probe::Osa(h) => Some(f(&mut *h.borrow_mut())),
            Probe::Otdr(_) => None,
        }
    }

    pub fn start(&self) {
        self.with_instrument(|i| i.start());
    }

    pub fn stop(&self) {
        self.with_instrument(|i| i.stop());
    }

    /// The OTDR has no free-running mode; it measures only on `single`.
    pub fn poll(&self, now: Instant) -> bool {
        self.with_instrument(|i| i.poll(now)).unwrap_or(false)
    }

    pub fn single(&self) -> bool {
        match self {
            Probe::Otdr(h) => {
                h.borrow_mut().measure();
                true
            }
            _ => self.with_instrument(|i| i.single()).unwrap_or(false),
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Probe::Scope(h) => {
                let scope = h.borrow();
                let config = scope.config();
                let channels: Vec<String> = (0..config.channels.len())
                    .filter(|&ch| config.channels[ch].enabled)
                    .map(|ch| {
                        let trace = scope.trace(ch);
                        let (lo, hi) = trace
                            .iter()
                            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                                (lo.min(v), hi.max(v))
                            });
                        let pp = if trace.is_empty() { 0.0 } else { hi - lo };
                        format!(
                            "CH{} {:.4} Vpp ({}/div)",
                            ch + 1,
                            pp,
                            config.volts_per_div_label(ch)
                        )
                    })
                    .collect();
                format!("{}/div, {}", config.time_per_div_label(), channels.join(", "))
            }
            Probe::Esa(h) => match h.borrow().peak_frequency() {
                Some(f) => format!("peak at {f:.4} MHz"),
                None => "no trace".to_string(),
            },
            Probe::Osa(h) => match h.borrow().peak_wavelength() {
                Some(wl) => format!("peak at {wl:.3} nm"),
                None => "no trace".to_string(),
            },
            Probe::Otdr(h) => {
                let otdr = h.borrow();
                format!(
                    "{} events over {} points",
                    otdr.events().len(),
                    otdr.trace_db().len()
                )
            }
        }
    }

    /// Only the analyzers have a span; the rest ignore the edit.
    pub fn edit_span(&self, edit: SpanEdit) -> bool {
        match self {
            Probe::Esa(h) => h.borrow_mut().edit_span(edit),
            Probe::Osa(h) => h.borrow_mut().edit_span(edit),
            Probe::Scope(_) | Probe::Otdr(_) => return false,
        }
        true
    }

    pub fn export(&self, path: Option<&Path>) -> Result<Option<PathBuf>> {
        match self {
            Probe::Scope(h) => h.borrow_mut().export(path),
            Probe::Esa(h) => h.borrow_mut().export(path),
            Probe::Osa(h) => h.borrow_mut().export(path),
            Probe::Otdr(h) => h.borrow().export(path),
        }
    }
}

/// A built topology. Dropping it drops every node.
pub struct Bench {
    pub experiment: Experiment,
    pub lab: Lab,
    pub probes: Vec<Probe>,
}

impl Bench {
    /// One acquisition on every probe.
    pub fn single(&self) -> usize {
        self.probes.iter().filter(|p| p.single()).count()
    }

    /// Applies `edits` in order to every analyzer on the bench. Returns how
    /// many analyzers took them.
    pub fn edit_spans(&self, edits: &[SpanEdit]) -> usize {
        if edits.is_empty() {
            return 0;
        }
        let edited = self
            .probes
            .iter()
            .filter(|p| edits.iter().all(|&edit| p.edit_span(edit)))
            .count();
        debug!("[experiment] {}: {edits:?} on {edited} analyzers", self.experiment);
        edited
    }

    /// Free-runs every instrument for `duration`, then stops them. Returns
    /// the number of acquisitions made.
    pub fn run_for(&self, duration: Duration) -> usize {
        let start = Instant::now();
        self.probes.iter().for_each(Probe::start);
        let mut acquisitions = 0;
        loop {
            let now = Instant::now();
            if now.duration_since(start) >= duration {
                break;
            }
            acquisitions += self.probes.iter().filter(|p| p.poll(now)).count();
            std::thread::sleep(TICK_INTERVAL / 4);
        }
        self.probes.iter().for_each(Probe::stop);
        // Tick-less instruments still get one measurement.
        acquisitions += self
            .probes
            .iter()
            .filter(|p| matches!(p, Probe::Otdr(_)))
            .filter(|p| p.single())
            .count();
        debug!(
            "[experiment] {}: {acquisitions} acquisitions across {} nodes",
            self.experiment,
            self.lab.len()
        );
        acquisitions
    }

    /// Writes every probe's trace into `dir` as `<experiment>_<probe>.txt`.
    pub fn export_all(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (index, probe) in self.probes.iter().enumerate() {
            let stem = if self.probes.len() > 1 {
                format!("{}_{}{}", self.experiment, probe.name(), index + 1)
            } else {
                format!("{}_{}", self.experiment, probe.name())
            };
            if let Some(path) = probe.export(Some(&dir.join(stem)))? {
                written.push(path);
            }
        }
        Ok(written)
    }
}

#[derive(Clone, Copy)]
enum Drive {
    Sine,
    Prbs,
}

struct Builder<'a> {
    lab: Lab,
    settings: &'a LabSettings,
    seed: Option<u64>,
}

impl Builder<'_> {
    fn next_seed(&mut self) -> Option<u64> {
        let seed = self.seed?;
        self.seed = Some(seed.wrapping_add(1));
        Some(seed)
    }

    fn rng(&mut self) -> ChaCha8Rng {
        match self.next_seed() {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }

    fn function_generator(&mut self, label: &str) -> Handle<FunctionGenerator> {
        let config = self.settings.function_generator;
        let node = match self.next_seed() {
            Some(seed) => FunctionGenerator::with_seed(config, seed),
            None => FunctionGenerator::new(config),
        };
        self.lab.add(label, node)
    }

    fn prbs_generator(&mut self) -> Handle<PrbsGenerator> {
        let config = self.settings.prbs;
        let node = match self.next_seed() {
            Some(seed) => PrbsGenerator::with_seed(config, seed),
            None => PrbsGenerator::new(config),
        };
        self.lab.add("prbs", node)
    }

    fn qam_generator(&mut self) -> Handle<QamGenerator> {
        let config = self.settings.qam;
        let node = match self.next_seed() {
            Some(seed) => QamGenerator::with_seed(config, seed),
            None => QamGenerator::new(config),
        };
        self.lab.add("qam", node)
    }

    /// Scope with the first `channels` channels enabled.
    fn scope(&mut self, channels: usize, xy_channel: Option<usize>) -> Handle<Oscilloscope> {
        let mut config: OscilloscopeConfig = self.settings.oscilloscope;
        for (ch, channel) in config.channels.iter_mut().enumerate() {
            channel.enabled = ch < channels;
        }
        config.xy_channel = xy_channel;
        let node = match self.next_seed() {
            Some(seed) => Oscilloscope::with_seed(config, seed),
            None => Oscilloscope::new(config),
        };
        self.lab.add("scope", node)
    }

    fn wire_scope(
        &mut self,
        scope: &Handle<Oscilloscope>,
        inputs: &[(NodeId, ElectricalLink)],
    ) -> Result<()> {
        let ids: Vec<_> = inputs.iter().map(|(id, _)| *id).collect();
        self.lab.connect(scope, &ids, |s| {
            let mut links: [Option<ElectricalLink>; 4] = Default::default();
            for (slot, (_, link)) in links.iter_mut().zip(inputs) {
                *slot = Some(link.clone());
            }
            s.set_inputs(links);
        })
    }

    fn laser(&mut self) -> Handle<Laser> {
        self.lab.add_configured("laser", self.settings.laser)
    }

    fn fiber(&mut self, label: &str, input: (NodeId, OpticalLink)) -> Result<Handle<Fiber>> {
        let fiber: Handle<Fiber> = self.lab.add_configured(label, self.settings.fiber);
        self.lab.connect(&fiber, &[input.0], |f| f.set_inputs(input.1))?;
        Ok(fiber)
    }

    fn detector(&mut self, label: &str, fiber: &Handle<Fiber>) -> Result<Handle<Photodetector>> {
        let detector: Handle<Photodetector> =
            self.lab.add_configured(label, self.settings.photodetector);
        self.lab
            .connect(&detector, &[fiber.id()], |d| d.set_inputs(fiber.optical()))?;
        Ok(detector)
    }

    fn signal_scope(&mut self, channels: usize) -> Result<Vec<Probe>> {
        let scope = self.scope(channels, None);
        let clock = scope.borrow().clock_link();
        let mut inputs = Vec::with_capacity(channels);
        for ch in 0..channels {
            let generator = self.function_generator(&format!("gen{}", ch + 1));
            self.lab
                .sync(&generator, scope.id(), |g| g.set_inputs(clock.clone()))?;
            inputs.push((generator.id(), generator.electrical()));
        }
        self.wire_scope(&scope, &inputs)?;
        Ok(vec![Probe::Scope(scope)])
    }

    fn filter_bode(&mut self) -> Result<Vec<Probe>> {
        let scope = self.scope(2, None);
        let generator = self.function_generator("gen");
        let filter: Handle<ElectricalFilter> =
            self.lab.add_configured("filter", self.settings.filter);
        self.lab
            .connect(&filter, &[generator.id()], |f| f.set_inputs(generator.retimable()))?;
        let clock = scope.borrow().clock_link();
        self.lab.sync(&generator, scope.id(), |g| g.set_inputs(clock))?;
        self.wire_scope(
            &scope,
            &[
                (generator.id(), generator.electrical()),
                (filter.id(), filter.electrical()),
            ],
        )?;
        Ok(vec![Probe::Scope(scope)])
    }

    fn eye_diagram(&mut self) -> Result<Vec<Probe>> {
        let scope = self.scope(1, None);
        let prbs = self.prbs_generator();
        let clock = scope.borrow().clock_link();
        self.lab.sync(&prbs, scope.id(), |g| g.set_inputs(clock))?;
        self.wire_scope(&scope, &[(prbs.id(), prbs.electrical())])?;
        Ok(vec![Probe::Scope(scope)])
    }

    fn qam_taps(&mut self, qam: &Handle<QamGenerator>) -> Result<(Handle<QamTap>, Handle<QamTap>)> {
        let tap_i = self.lab.add("qam-i", QamTap::new(IqBranch::InPhase));
        let tap_q = self.lab.add("qam-q", QamTap::new(IqBranch::Quadrature));
        self.lab
            .connect(&tap_i, &[qam.id()], |t| t.set_inputs(qam.downgrade()))?;
        self.lab
            .connect(&tap_q, &[qam.id()], |t| t.set_inputs(qam.downgrade()))?;
        Ok((tap_i, tap_q))
    }

    fn constellation(&mut self) -> Result<Vec<Probe>> {
        let scope = self.scope(2, Some(0));
        let qam = self.qam_generator();
        let clock = scope.borrow().clock_link();
        self.lab.sync(&qam, scope.id(), |g| g.set_inputs(clock))?;
        let (tap_i, tap_q) = self.qam_taps(&qam)?;
        self.wire_scope(
            &scope,
            &[(tap_i.id(), tap_i.electrical()), (tap_q.id(), tap_q.electrical())],
        )?;
        Ok(vec![Probe::Scope(scope)])
    }

    fn esa(&mut self) -> Handle<Esa> {
        self.lab.add_configured("esa", self.settings.esa)
    }

    fn esa_signal(&mut self) -> Result<Vec<Probe>> {
        let esa = self.esa();
        let generator = self.function_generator("gen");
        let clock = esa.borrow().clock_link();
        self.lab.sync(&generator, esa.id(), |g| g.set_inputs(clock))?;
        self.lab
            .connect(&esa, &[generator.id()], |e| e.set_inputs(generator.electrical()))?;
        Ok(vec![Probe::Esa(esa)])
    }

    fn esa_prbs(&mut self) -> Result<Vec<Probe>> {
        let esa = self.esa();
        let prbs = self.prbs_generator();
        let clock = esa.borrow().clock_link();
        self.lab.sync(&prbs, esa.id(), |g| g.set_inputs(clock))?;
        self.lab
            .connect(&esa, &[prbs.id()], |e| e.set_inputs(prbs.electrical()))?;
        Ok(vec![Probe::Esa(esa)])
    }

    fn esa_filter(&mut self) -> Result<Vec<Probe>> {
        let esa = self.esa();
        let generator = self.function_generator("gen");
        let filter: Handle<ElectricalFilter> =
            self.lab.add_configured("filter", self.settings.filter);
        let clock = esa.borrow().clock_link();
        self.lab.sync(&generator, esa.id(), |g| g.set_inputs(clock))?;
        self.lab
            .connect(&filter, &[generator.id()], |f| f.set_inputs(generator.retimable()))?;
        self.lab
            .connect(&esa, &[filter.id()], |e| e.set_inputs(filter.electrical()))?;
        Ok(vec![Probe::Esa(esa)])
    }

    fn am_modulator(
        &mut self,
        laser: &Handle<Laser>,
        drive: (NodeId, ElectricalLink),
    ) -> Result<Handle<AmModulator>> {
        let modulator: Handle<AmModulator> =
            self.lab.add_configured("eoam", self.settings.modulator);
        self.lab.connect(&modulator, &[laser.id(), drive.0], |m| {
            m.set_inputs(laser.optical(), drive.1)
        })?;
        Ok(modulator)
    }

    fn optical_mod_osa(&mut self) -> Result<Vec<Probe>> {
        let laser = self.laser();
        // No instrument clocks this generator; it runs on its own record.
        let generator = self.function_generator("gen");
        let modulator = self.am_modulator(&laser, (generator.id(), generator.electrical()))?;
        let fiber = self.fiber("fiber", (modulator.id(), modulator.optical()))?;
        let osa = match self.next_seed() {
            Some(seed) => Osa::with_seed(self.settings.osa, seed),
            None => Osa::new(self.settings.osa),
        };
        let osa = self.lab.add("osa", osa);
        self.lab
            .connect(&osa, &[fiber.id()], |o| o.set_inputs(fiber.optical()))?;
        Ok(vec![Probe::Osa(osa)])
    }

    fn optical_scope(&mut self, drive: Drive) -> Result<Vec<Probe>> {
        let scope = self.scope(1, None);
        let clock = scope.borrow().clock_link();
        let laser = self.laser();
        let drive = match drive {
            Drive::Sine => {
                let generator = self.function_generator("gen");
                self.lab.sync(&generator, scope.id(), |g| g.set_inputs(clock))?;
                (generator.id(), generator.electrical())
            }
            Drive::Prbs => {
                let prbs = self.prbs_generator();
                self.lab.sync(&prbs, scope.id(), |g| g.set_inputs(clock))?;
                (prbs.id(), prbs.electrical())
            }
        };
        let modulator = self.am_modulator(&laser, drive)?;
        let fiber = self.fiber("fiber", (modulator.id(), modulator.optical()))?;
        let detector = self.detector("pd", &fiber)?;
        self.wire_scope(&scope, &[(detector.id(), detector.electrical())])?;
        Ok(vec![Probe::Scope(scope)])
    }

    fn optical_qam_scope(&mut self) -> Result<Vec<Probe>> {
        let scope = self.scope(2, Some(0));
        let clock = scope.borrow().clock_link();
        let laser = self.laser();
        let qam = self.qam_generator();
        self.lab.sync(&qam, scope.id(), |g| g.set_inputs(clock))?;
        let (tap_i, tap_q) = self.qam_taps(&qam)?;

        let modulator: Handle<QamModulator> =
            self.lab.add_configured("eoqam", self.settings.modulator);
        self.lab
            .connect(&modulator, &[laser.id(), tap_i.id(), tap_q.id()], |m| {
                m.set_inputs(laser.optical(), tap_i.electrical(), tap_q.electrical())
            })?;

        // One physical fiber per quadrature so each arm has its own output.
        let mut detectors = Vec::with_capacity(2);
        for (branch, suffix) in [(IqBranch::InPhase, "i"), (IqBranch::Quadrature, "q")] {
            let arm = self
                .lab
                .add(format!("eoqam-{suffix}"), OpticalQuadrature::new(branch));
            self.lab
                .connect(&arm, &[modulator.id()], |a| a.set_inputs(modulator.downgrade()))?;
            let fiber = self.fiber(&format!("fiber-{suffix}"), (arm.id(), arm.optical()))?;
            let detector = self.detector(&format!("pd-{suffix}"), &fiber)?;
            detectors.push((detector.id(), detector.electrical()));
        }
        self.wire_scope(&scope, &detectors)?;
        Ok(vec![Probe::Scope(scope)])
    }

    fn fiber_otdr(&mut self) -> Result<Vec<Probe>> {
        let mut rng = self.rng();
        let config = FiberConfig {
            length_km: rng.gen_range(1.0..300.0),
            attenuation_db_per_km: rng.gen_range(0.1..1.0),
        };
        info!(
            "[experiment] fiber under test: {:.2} km at {:.3} dB/km",
            config.length_km, config.attenuation_db_per_km
        );
        let fiber: Handle<Fiber> = self.lab.add_configured("fiber", config);
        let otdr = match self.next_seed() {
            Some(seed) => Otdr::with_seed(self.settings.otdr, seed),
            None => Otdr::new(self.settings.otdr),
        };
        let otdr = self.lab.add("otdr", otdr);
        self.lab
            .connect(&otdr, &[fiber.id()], |o| o.set_input_fiber(fiber.downgrade()))?;
        Ok(vec![Probe::Otdr(otdr)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::OtdrConfig;

    fn quick_settings() -> LabSettings {
        let mut settings = LabSettings::default();
        settings.otdr = OtdrConfig {
            pulse_width_ns: 100.0,
            ..OtdrConfig::default()
        };
        settings
    }

    #[test]
    fn names_round_trip() {
        for experiment in Experiment::ALL {
            assert_eq!(experiment.name().parse::<Experiment>().unwrap(), experiment);
        }
        assert_eq!("Fiber-OTDR".parse::<Experiment>().unwrap(), Experiment::FiberOtdr);
        assert!("bode".parse::<Experiment>().is_err());
    }

    #[test]
    fn signal_scope_produces_a_sine() {
        let bench = Experiment::SignalScope
            .build(&quick_settings(), Some(1))
            .unwrap();
        assert_eq!(bench.single(), 1);
        let Probe::Scope(scope) = &bench.probes[0] else {
            panic!("expected a scope");
        };
        let trace = scope.borrow().trace(0).to_vec();
        assert_eq!(trace.len(), 1000);
        let pp = trace.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            - trace.iter().copied().fold(f64::INFINITY, f64::min);
        assert!(pp > 0.5, "peak-to-peak {pp}");
    }

    #[test]
    fn every_experiment_builds_and_measures() {
        let settings = quick_settings();
        for experiment in Experiment::ALL {
            let bench = experiment.build(&settings, Some(7)).unwrap();
            assert!(!bench.probes.is_empty(), "{experiment}");
            assert_eq!(bench.single(), bench.probes.len(), "{experiment}");
            assert!(!bench.probes[0].summary().is_empty());
        }
    }

    #[test]
    fn bode_pair_wires_two_channels() {
        let bench = Experiment::FilterBode.build(&quick_settings(), Some(2)).unwrap();
        bench.single();
        let Probe::Scope(scope) = &bench.probes[0] else {
            panic!("expected a scope");
        };
        assert!(scope.borrow().config().channels[1].enabled);
        assert_eq!(scope.borrow().trace(1).len(), 1000);
    }

    #[test]
    fn analyzers_are_built_from_saved_settings() {
        let mut settings = quick_settings();
        settings.esa.span.start = 5.0;
        settings.esa.span.stop = 45.0;
        settings.esa.averages = 4;
        let bench = Experiment::EsaSignal.build(&settings, Some(4)).unwrap();
        let Probe::Esa(esa) = &bench.probes[0] else {
            panic!("expected an esa");
        };
        let config = esa.borrow().config();
        assert_eq!((config.span.start, config.span.stop), (5.0, 45.0));
        assert_eq!(config.averages, 4);
    }

    #[test]
    fn span_edits_reach_only_analyzers() {
        let settings = quick_settings();
        let esa_bench = Experiment::EsaPrbs.build(&settings, Some(5)).unwrap();
        let edits = [SpanEdit::Center(100.0), SpanEdit::Span(20.0)];
        assert_eq!(esa_bench.edit_spans(&edits), 1);
        let Probe::Esa(esa) = &esa_bench.probes[0] else {
            panic!("expected an esa");
        };
        let span = esa.borrow().config().span;
        assert!((span.start - 90.0).abs() < 1e-9);
        assert!((span.stop - 110.0).abs() < 1e-9);
        assert_eq!(esa_bench.single(), 1);

        let scope_bench = Experiment::SignalScope.build(&settings, Some(5)).unwrap();
        assert_eq!(scope_bench.edit_spans(&edits), 0);
        assert_eq!(scope_bench.edit_spans(&[]), 0);
    }

    #[test]
    fn scope_summary_names_the_vertical_scale() {
        let bench = Experiment::SignalScope.build(&quick_settings(), Some(6)).unwrap();
        bench.single();
        let summary = bench.probes[0].summary();
        let label = match &bench.probes[0] {
            Probe::Scope(scope) => scope.borrow().config().volts_per_div_label(0),
            _ => panic!("expected a scope"),
        };
        assert!(summary.contains(&format!("({label}/div)")), "{summary}");
    }

    #[test]
    fn exports_land_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let bench = Experiment::FiberOtdr.build(&quick_settings(), Some(3)).unwrap();
        bench.single();
        let written = bench.export_all(dir.path()).unwrap();
        assert_eq!(written.len(), 1);
        assert!(written[0].ends_with("fiber_otdr_otdr.txt"));
    }
}
