//! Measurement instruments: the sinks that drive every pull.

pub mod acquisition;
pub mod analyzer;
pub mod esa;
pub mod export;
pub mod oscilloscope;
pub mod osa;
pub mod otdr;
pub mod trace;

pub use acquisition::{Acquisition, AcquisitionState, Instrument, TICK_INTERVAL};
pub use analyzer::{DisplayConfig, Span, SpanEdit, SpectrogramHistory};
pub use esa::{Esa, EsaConfig};
pub use oscilloscope::{ChannelConfig, Oscilloscope, OscilloscopeConfig, TriggerMode};
pub use osa::{Osa, OsaConfig};
pub use otdr::{FiberEvent, Otdr, OtdrConfig, OtdrState};
