//! Persisted instrument and component settings. The bench topology itself is
//! never saved; experiments rebuild it from code.

use crate::analysis::EvmConfig;
use crate::components::{FiberConfig, FilterConfig, ModulatorConfig, PhotodetectorConfig};
use crate::instruments::{EsaConfig, OsaConfig, OscilloscopeConfig, OtdrConfig};
use crate::sources::{FunctionGeneratorConfig, LaserConfig, PrbsConfig, QamConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const APP_NAME: &str = "photonbench";
const FILE_NAME: &str = "settings.json";

pub fn config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LabSettings {
    pub oscilloscope: OscilloscopeConfig,
    pub esa: EsaConfig,
    pub osa: OsaConfig,
    pub otdr: OtdrConfig,
    pub function_generator: FunctionGeneratorConfig,
    pub prbs: PrbsConfig,
    pub qam: QamConfig,
    pub laser: LaserConfig,
    pub modulator: ModulatorConfig,
    pub fiber: FiberConfig,
    pub photodetector: PhotodetectorConfig,
    pub filter: FilterConfig,
    pub evm: EvmConfig,
    pub last_experiment: Option<String>,
    pub export_dir: Option<PathBuf>,
}

impl LabSettings {
    pub fn sanitize(&mut self) {
        self.oscilloscope = self.oscilloscope.normalized();
        self.esa = self.esa.normalized();
        self.osa = self.osa.normalized();
        self.otdr = self.otdr.normalized();
        self.function_generator = self.function_generator.normalized();
        self.prbs = self.prbs.normalized();
        self.qam = self.qam.normalized();
        self.laser = self.laser.normalized();
        self.modulator = self.modulator.normalized();
        self.fiber = self.fiber.normalized();
        self.photodetector = self.photodetector.normalized();
        self.filter = self.filter.normalized();
        self.evm = self.evm.clone().normalized();
        if self
            .last_experiment
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            self.last_experiment = None;
        }
    }
}

#[derive(Debug)]
pub struct SettingsManager {
    path: PathBuf,
    data: LabSettings,
}

impl SettingsManager {
    pub fn load_or_default() -> Self {
        Self::load_from(config_dir().join(FILE_NAME))
    }

    /// Unreadable or malformed files fall back to defaults.
    pub fn load_from(path: PathBuf) -> Self {
        let mut data: LabSettings = fs::read_to_string(&path)
            .ok()
            .and_then(|s| {
                serde_json::from_str(&s)
                    .map_err(|e| warn!("[settings] parse error {path:?}: {e}"))
                    .ok()
            })
            .unwrap_or_default();
        data.sanitize();
        debug!("[settings] loaded from {}", path.display());
        Self { path, data }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &LabSettings {
        &self.data
    }

    /// Applies `mutate`, sanitizes and writes the result.
    pub fn update<R>(&mut self, mutate: impl FnOnce(&mut LabSettings) -> R) -> Result<R> {
        let result = mutate(&mut self.data);
        self.data.sanitize();
        self.save()?;
        Ok(result)
    }

    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.data).context("serializing settings")?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &json)
            .and_then(|()| fs::rename(&temp_path, &self.path))
            .with_context(|| format!("writing {}", self.path.display()))?;
        info!("[settings] saved {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitized_defaults() -> LabSettings {
        let mut s = LabSettings::default();
        s.sanitize();
        s
    }

    #[test]
    fn round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(FILE_NAME);
        let mut manager = SettingsManager::load_from(path.clone());
        assert_eq!(manager.settings(), &sanitized_defaults());
        manager
            .update(|s| {
                s.fiber.length_km = 25.0;
                s.last_experiment = Some("fiber_otdr".into());
            })
            .unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = SettingsManager::load_from(path);
        assert_eq!(reloaded.settings().fiber.length_km, 25.0);
        assert_eq!(reloaded.settings().last_experiment.as_deref(), Some("fiber_otdr"));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);
        fs::write(&path, "{ not json").unwrap();
        let manager = SettingsManager::load_from(path);
        assert_eq!(manager.settings(), &sanitized_defaults());
    }

    #[test]
    fn partial_documents_keep_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);
        fs::write(&path, r#"{ "fiber": { "length_km": 3.0 } }"#).unwrap();
        let manager = SettingsManager::load_from(path);
        let s = manager.settings();
        assert_eq!(s.fiber.length_km, 3.0);
        assert_eq!(s.fiber.attenuation_db_per_km, FiberConfig::default().attenuation_db_per_km);
        assert_eq!(s.oscilloscope, sanitized_defaults().oscilloscope);
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let mut s = LabSettings::default();
        s.fiber.length_km = -4.0;
        s.oscilloscope.n_points = 0;
        s.oscilloscope.horizontal_offset_pct = 400.0;
        s.otdr.group_index = 0.2;
        s.last_experiment = Some("  ".into());
        s.sanitize();
        assert_eq!(s.fiber.length_km, 0.0);
        assert_eq!(s.oscilloscope.n_points, 2);
        assert_eq!(s.oscilloscope.horizontal_offset_pct, 100.0);
        assert_eq!(s.otdr.group_index, OtdrConfig::default().group_index);
        assert_eq!(s.last_experiment, None);
    }
}
