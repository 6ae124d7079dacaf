//! Error vector magnitude and the BER it implies for square QAM, computed
//! from an I/Q capture (oscilloscope export, CH1 = I, CH2 = Q).

use crate::instruments::export::read_columns;
use crate::util::signal::linspace;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::info;

/// Where the ideal per-axis levels come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceLevels {
    /// Levels read off the capture's histogram by hand.
    Explicit { i: Vec<f64>, q: Vec<f64> },
    /// `levels` points evenly spaced over `[-v_max, v_max]` on both axes.
    Uniform { v_max: f64 },
}

impl Default for ReferenceLevels {
    fn default() -> Self {
        Self::Explicit {
            i: vec![-0.0073, -0.0022, 0.0022, 0.0073],
            q: vec![-0.0073, -0.0022, 0.0022, 0.0073],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvmConfig {
    /// Levels per axis (L).
    pub levels: usize,
    /// Constellation size (M).
    pub points: usize,
    pub references: ReferenceLevels,
}

impl Default for EvmConfig {
    fn default() -> Self {
        Self {
            levels: 4,
            points: 16,
            references: ReferenceLevels::default(),
        }
    }
}

impl EvmConfig {
    pub fn normalized(mut self) -> Self {
        self.levels = self.levels.max(2);
        self.points = self.points.max(self.levels);
        self
    }

    fn axes(&self) -> (Vec<f64>, Vec<f64>) {
        match &self.references {
            ReferenceLevels::Explicit { i, q } => (i.clone(), q.clone()),
            ReferenceLevels::Uniform { v_max } => {
                let axis = linspace(-v_max, *v_max, self.levels);
                (axis.clone(), axis)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvmReport {
    pub evm: f64,
    pub snr: f64,
    pub ber: f64,
    pub samples: usize,
}

impl EvmReport {
    pub fn snr_db(&self) -> f64 {
        10.0 * self.snr.log10()
    }
}

impl fmt::Display for EvmReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EVM {:.3e}, SNR {:.3} ({:.2} dB), BER {:.3e}",
            self.evm,
            self.snr,
            self.snr_db(),
            self.ber
        )
    }
}

fn nearest(levels: &[f64], value: f64) -> f64 {
    levels
        .iter()
        .copied()
        .min_by(|a, b| (value - a).abs().total_cmp(&(value - b).abs()))
        .unwrap_or(0.0)
}

/// Decides each sample to the nearest level on each axis independently.
/// Samples that crossed into another decision region count against that
/// region, not the one they were sent from.
pub fn evm(i_samples: &[f64], q_samples: &[f64], config: &EvmConfig) -> Result<EvmReport> {
    let config = config.clone().normalized();
    let (refs_i, refs_q) = config.axes();
    if refs_i.is_empty() || refs_q.is_empty() {
        bail!("no reference levels");
    }
    let samples = i_samples.len().min(q_samples.len());
    if samples == 0 {
        bail!("capture holds no I/Q samples");
    }

    let (mut err_sum, mut ideal_sum) = (0.0, 0.0);
    for (&i, &q) in i_samples.iter().zip(q_samples) {
        let (ideal_i, ideal_q) = (nearest(&refs_i, i), nearest(&refs_q, q));
        err_sum += (i - ideal_i).hypot(q - ideal_q);
        ideal_sum += ideal_i.hypot(ideal_q);
    }
    if ideal_sum <= 0.0 {
        bail!("reference constellation has zero energy");
    }

    let evm = (err_sum / ideal_sum).sqrt();
    let snr = if evm > 0.0 { 1.0 / (evm * evm) } else { f64::INFINITY };
    let ber = qam_ber(config.levels, config.points, snr);
    Ok(EvmReport {
        evm,
        snr,
        ber,
        samples,
    })
}

/// `(2/log2 L)(1 - 1/L) erfc(sqrt(3 log2 L / (L² - 1)) · 2 SNR / log2 M)`
pub fn qam_ber(levels: usize, points: usize, snr: f64) -> f64 {
    let l = levels.max(2) as f64;
    let m = points.max(2) as f64;
    let scale = (2.0 / l.log2()) * (1.0 - 1.0 / l);
    let q1 = (3.0 * l.log2() / (l * l - 1.0)).sqrt();
    let q2 = 2.0 * snr / m.log2();
    scale * erfc(q1 * q2)
}

// Abramowitz & Stegun 7.1.26.
fn erfc(x: f64) -> f64 {
    if x == f64::INFINITY {
        return 0.0;
    }
    let t = 1.0 / (1.0 + 0.327_591_1 * x.abs());
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    let result = poly * (-x * x).exp();
    if x >= 0.0 { result } else { 2.0 - result }
}

/// Runs [`evm`] on columns 1 and 2 of an oscilloscope export.
pub fn evm_from_capture(path: &Path, config: &EvmConfig) -> Result<EvmReport> {
    let mut columns = read_columns(path, &[1, 2])?;
    let q = columns.pop().unwrap_or_default();
    let i = columns.pop().unwrap_or_default();
    let report = evm(&i, &q, config)?;
    info!("[evm] {}: {report} over {} samples", path.display(), report.samples);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::export::{Table, write_table};

    fn uniform(v_max: f64) -> EvmConfig {
        EvmConfig {
            references: ReferenceLevels::Uniform { v_max },
            ..EvmConfig::default()
        }
    }

    #[test]
    fn ideal_constellation_has_no_error() {
        let levels = linspace(-3.0, 3.0, 4);
        let (mut i, mut q) = (Vec::new(), Vec::new());
        for &a in &levels {
            for &b in &levels {
                i.push(a);
                q.push(b);
            }
        }
        let report = evm(&i, &q, &uniform(3.0)).unwrap();
        assert_eq!(report.samples, 16);
        assert_eq!(report.evm, 0.0);
        assert!(report.snr.is_infinite());
        assert_eq!(report.ber, 0.0);
    }

    #[test]
    fn single_offset_sample() {
        let report = evm(&[1.1], &[1.0], &uniform(3.0)).unwrap();
        let expected = (0.1 / 2f64.sqrt()).sqrt();
        assert!((report.evm - expected).abs() < 1e-12);
        assert!((report.snr - 1.0 / (expected * expected)).abs() < 1e-9);
        assert!(report.ber > 0.0 && report.ber < 0.75);
    }

    #[test]
    fn ber_falls_with_snr() {
        let low = qam_ber(4, 16, 0.5);
        let high = qam_ber(4, 16, 5.0);
        assert!(low > high);
        // At zero SNR only the prefactor is left.
        assert!((qam_ber(4, 16, 0.0) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn erfc_matches_reference_values() {
        assert!((erfc(0.0) - 1.0).abs() < 1e-6);
        assert!((erfc(1.0) - 0.157_299_2).abs() < 1e-6);
        assert!((erfc(-1.0) - 1.842_700_8).abs() < 1e-6);
    }

    #[test]
    fn empty_capture_is_an_error() {
        assert!(evm(&[], &[], &EvmConfig::default()).is_err());
        assert!(evm(&[0.0], &[0.0], &uniform(0.0)).is_err());
    }

    #[test]
    fn reads_scope_export() {
        let dir = tempfile::tempdir().unwrap();
        let table = Table::new()
            .column("Time (s)", vec![0.0, 1e-9])
            .column("CH1 (V)", vec![0.0073, -0.0022])
            .column("CH2 (V)", vec![-0.0022, 0.0073]);
        let path = write_table(Some(&dir.path().join("qam")), &table)
            .unwrap()
            .unwrap();
        let report = evm_from_capture(&path, &EvmConfig::default()).unwrap();
        assert_eq!(report.samples, 2);
        assert_eq!(report.evm, 0.0);
    }
}
