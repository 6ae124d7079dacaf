//! Single-mode fiber span with distributed loss.

use crate::lab::{
    OpticalLink, OpticalNode, OpticalSignal, Reconfigurable, Trigger, pull_optical,
    retrigger_optical,
};
use crate::util::units::span_transmission;
use serde::{Deserialize, Serialize};
use std::rc::Weak;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FiberConfig {
    pub length_km: f64,
    pub attenuation_db_per_km: f64,
}

impl Default for FiberConfig {
    fn default() -> Self {
        Self {
            length_km: 1.0,
            attenuation_db_per_km: 0.35,
        }
    }
}

impl FiberConfig {
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        self.length_km = if self.length_km.is_finite() {
            self.length_km.max(0.0)
        } else {
            defaults.length_km
        };
        self.attenuation_db_per_km = if self.attenuation_db_per_km.is_finite() {
            self.attenuation_db_per_km.max(0.0)
        } else {
            defaults.attenuation_db_per_km
        };
        self
    }

    pub fn transmission(&self) -> f64 {
        span_transmission(self.attenuation_db_per_km, self.length_km)
    }
}

#[derive(Default)]
pub struct Fiber {
    config: FiberConfig,
    input: Option<OpticalLink>,
}

impl Fiber {
    pub fn set_inputs(&mut self, input: OpticalLink) {
        self.input = Some(input);
    }

    pub fn length_km(&self) -> f64 {
        self.config.length_km
    }

    pub fn attenuation_db_per_km(&self) -> f64 {
        self.config.attenuation_db_per_km
    }

    pub fn set_length_km(&mut self, length_km: f64) {
        self.update_config(FiberConfig {
            length_km,
            ..self.config
        });
    }

    pub fn set_attenuation_db_per_km(&mut self, attenuation_db_per_km: f64) {
        self.update_config(FiberConfig {
            attenuation_db_per_km,
            ..self.config
        });
    }
}

impl OpticalNode for Fiber {
    fn output_opt_signal(&mut self) -> OpticalSignal {
        let Some((mut signal, _)) = pull_optical(self.input.as_ref()) else {
            return OpticalSignal::default();
        };
        signal.scale(self.config.transmission());
        signal
    }

    fn output_freq(&mut self) -> f64 {
        self.input
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|node| node.borrow_mut().output_freq())
            .unwrap_or(0.0)
    }

    fn retrigger(&mut self, trigger: Trigger) {
        retrigger_optical(self.input.as_ref(), trigger);
    }
}

impl Reconfigurable<FiberConfig> for Fiber {
    fn update_config(&mut self, config: FiberConfig) {
        self.config = config.normalized();
        debug!(
            "[fiber] {} km at {} dB/km",
            self.config.length_km, self.config.attenuation_db_per_km
        );
    }
}
