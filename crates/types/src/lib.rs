//! Types for recording the base fee of Ethereum blocks.
pub mod constants;
pub mod record;
pub mod units;
