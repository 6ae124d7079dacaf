//! Offline analysis of exported captures.

pub mod evm;

pub use evm::{EvmConfig, EvmReport, ReferenceLevels};
