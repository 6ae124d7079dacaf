mod analysis;
mod components;
mod experiments;
mod instruments;
mod lab;
mod settings;
mod sources;
mod util;

use anyhow::Result;
use clap::{Parser, ValueHint};
use experiments::Experiment;
use instruments::SpanEdit;
use settings::SettingsManager;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_RUN: Duration = Duration::from_secs(1);

/// Headless virtual photonics bench.
#[derive(Debug, Parser)]
#[command(name = "photonbench", version)]
struct Options {
    /// Experiment to run; defaults to the last one run, then `signal_scope`
    experiment: Option<Experiment>,

    /// Free-run time in seconds
    #[arg(long = "seconds", value_name = "S", value_parser = parse_seconds)]
    run_for: Option<Duration>,

    /// Seed every random node for a reproducible run
    #[arg(long)]
    seed: Option<u64>,

    /// Write every instrument trace into this directory
    #[arg(long = "export", value_name = "DIR", value_hint = ValueHint::DirPath)]
    export_dir: Option<PathBuf>,

    /// Analyzer span center, in MHz on the ESA and nm on the OSA
    #[arg(long, value_name = "X", allow_negative_numbers = true)]
    center: Option<f64>,

    /// Analyzer span width, in the unit of `--center`
    #[arg(long, value_name = "X")]
    span: Option<f64>,

    /// Report EVM, SNR and BER of an oscilloscope I/Q export and exit
    #[arg(long = "evm", value_name = "FILE", value_hint = ValueHint::FilePath)]
    evm_capture: Option<PathBuf>,

    /// List experiment names and exit
    #[arg(long)]
    list: bool,
}

impl Options {
    /// Center first, so `--span` opens around the new center.
    fn span_edits(&self) -> Vec<SpanEdit> {
        self.center
            .map(SpanEdit::Center)
            .into_iter()
            .chain(self.span.map(SpanEdit::Span))
            .collect()
    }
}

fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw.parse().map_err(|e| format!("bad duration {raw:?}: {e}"))?;
    if !(secs.is_finite() && secs >= 0.0) {
        return Err("duration must be a non-negative number of seconds".into());
    }
    Ok(Duration::from_secs_f64(secs))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = Options::parse();
    if options.list {
        for experiment in Experiment::ALL {
            println!("{experiment}");
        }
        return Ok(());
    }

    let mut manager = SettingsManager::load_or_default();

    if let Some(capture) = &options.evm_capture {
        let report = analysis::evm::evm_from_capture(capture, &manager.settings().evm)?;
        println!("{report}");
        return Ok(());
    }

    let experiment = match options.experiment {
        Some(experiment) => experiment,
        None => match manager.settings().last_experiment.as_deref() {
            Some(name) => name.parse().unwrap_or_else(|e| {
                warn!("[main] ignoring saved experiment: {e}");
                Experiment::SignalScope
            }),
            None => Experiment::SignalScope,
        },
    };

    let bench = experiment.build(manager.settings(), options.seed)?;
    let edits = options.span_edits();
    if !edits.is_empty() && bench.edit_spans(&edits) == 0 {
        warn!("[main] {experiment} has no analyzer; ignoring span options");
    }
    let acquisitions = bench.run_for(options.run_for.unwrap_or(DEFAULT_RUN));
    info!("[main] {experiment}: {acquisitions} acquisitions");
    for probe in &bench.probes {
        println!("{experiment} {}: {}", probe.name(), probe.summary());
    }

    let export_dir = options
        .export_dir
        .clone()
        .or_else(|| manager.settings().export_dir.clone());
    if let Some(dir) = export_dir {
        for path in bench.export_all(&dir)? {
            println!("wrote {}", path.display());
        }
    }

    if let Err(e) = manager.update(|s| s.last_experiment = Some(experiment.name().to_string())) {
        warn!("[settings] could not save {}: {e:#}", manager.path().display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, clap::Error> {
        Options::try_parse_from(std::iter::once("photonbench").chain(args.iter().copied()))
    }

    #[test]
    fn parses_experiment_and_flags() {
        let options = parse(&["esa_prbs", "--seconds", "0.5", "--seed", "9", "--export", "out"])
            .unwrap();
        assert_eq!(options.experiment, Some(Experiment::EsaPrbs));
        assert_eq!(options.run_for, Some(Duration::from_millis(500)));
        assert_eq!(options.seed, Some(9));
        assert_eq!(options.export_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["--seconds"]).is_err());
        assert!(parse(&["--seconds", "-1"]).is_err());
        assert!(parse(&["--seconds", "inf"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
        assert!(parse(&["nope"]).is_err());
        assert!(parse(&["esa_prbs", "esa_signal"]).is_err());
    }

    #[test]
    fn span_options_become_edits_in_order() {
        let options = parse(&["esa_signal", "--span", "20", "--center", "100"]).unwrap();
        assert_eq!(
            options.span_edits(),
            vec![SpanEdit::Center(100.0), SpanEdit::Span(20.0)]
        );
        let options = parse(&["--span", "5"]).unwrap();
        assert_eq!(options.span_edits(), vec![SpanEdit::Span(5.0)]);
        assert!(parse(&["--center", "x"]).is_err());
    }

    #[test]
    fn empty_args_pick_defaults() {
        let options = parse(&[]).unwrap();
        assert_eq!(options.experiment, None);
        assert_eq!(options.run_for, None);
        assert_eq!(options.seed, None);
        assert_eq!(options.export_dir, None);
        assert_eq!(options.evm_capture, None);
        assert!(options.span_edits().is_empty());
        assert!(!options.list);
    }

    #[test]
    fn command_definition_is_consistent() {
        use clap::CommandFactory;
        Options::command().debug_assert();
    }
}
