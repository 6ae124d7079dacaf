//! Signal sources: electrical generators and the laser.

pub mod function_gen;
pub mod laser;
pub mod prbs_gen;
pub mod qam_gen;
pub mod timing;

pub use function_gen::{FunctionGenerator, FunctionGeneratorConfig, WaveKind};
pub use laser::{Laser, LaserConfig};
pub use prbs_gen::{PrbsConfig, PrbsGenerator};
pub use qam_gen::{QamConfig, QamGenerator, QamTap};
