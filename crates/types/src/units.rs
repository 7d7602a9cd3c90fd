//! For converting between wei and gwei.

use ethers::{
    types::U256,
    utils::{format_units, parse_units, ConversionError},
};
use thiserror::Error;

use crate::constants::DEFAULT_BASE_FEE_GWEI;

#[derive(Debug, Error)]
pub enum UnitsError {
    #[error("Unit conversion error {0}")]
    Conversion(#[from] ConversionError),
    #[error("Gwei value {0} is not a finite non-negative number")]
    InvalidGwei(f64),
}

/// Converts a decimal gwei string (e.g., "12.5") to wei.
pub fn gwei_to_wei(gwei: &str) -> Result<U256, UnitsError> {
    Ok(parse_units(gwei, "gwei")?.into())
}

/// Converts a floating point gwei amount to wei.
///
/// Anything beyond 9 decimal places is below one wei and is truncated.
pub fn gwei_f64_to_wei(gwei: f64) -> Result<U256, UnitsError> {
    if !gwei.is_finite() || gwei < 0.0 {
        return Err(UnitsError::InvalidGwei(gwei));
    }
    gwei_to_wei(&format!("{gwei:.9}"))
}

/// Gwei amount without trailing zeros.
///
/// E.g., 12500000000 wei -> "12.5", 1000000000 wei -> "1".
pub fn to_gwei_pretty(wei: U256) -> Result<String, UnitsError> {
    let full = format_units(wei, "gwei")?;
    let trimmed = match full.contains('.') {
        true => full.trim_end_matches('0').trim_end_matches('.'),
        false => full.as_str(),
    };
    Ok(trimmed.to_string())
}

/// The fee recorded for blocks that have no base fee.
pub fn default_base_fee() -> Result<U256, UnitsError> {
    gwei_to_wei(DEFAULT_BASE_FEE_GWEI)
}
