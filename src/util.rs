pub mod signal;
pub mod units;
