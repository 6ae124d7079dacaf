//! Inline optical and electrical components.

pub mod fiber;
pub mod filter;
pub mod modulator;
pub mod photodetector;

pub use fiber::{Fiber, FiberConfig};
pub use filter::{ElectricalFilter, FilterConfig};
pub use modulator::{AmModulator, ModulatorConfig, OpticalQuadrature, QamModulator};
pub use photodetector::{DetectorMaterial, Photodetector, PhotodetectorConfig};
