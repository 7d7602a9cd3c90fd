//! Fee prediction from recorded history.
//!
//! A prediction is a percentile of the base fees over a trailing window of blocks.
use ethers::types::U256;
use thiserror::Error;

use crate::store::FeeStore;

#[derive(Debug, Error, PartialEq)]
pub enum PredictError {
    #[error("Percentile {0} must be within [0, 1]")]
    InvalidPercentile(f64),
    #[error("Window start {start} is after end {end}")]
    InvalidWindow { start: u64, end: u64 },
}

/// Fee at the given percentile among the records for blocks `start..=end`.
///
/// The fees are sorted ascending and the element at `floor(count * percentile)`
/// is returned (the last element for percentile 1). Returns `None` if no block
/// in the window is recorded.
pub fn percentile_fee(
    store: &FeeStore,
    start: u64,
    end: u64,
    percentile: f64,
) -> Result<Option<U256>, PredictError> {
    if !(0.0..=1.0).contains(&percentile) {
        return Err(PredictError::InvalidPercentile(percentile));
    }
    if start > end {
        return Err(PredictError::InvalidWindow { start, end });
    }
    let mut fees: Vec<U256> = store.range(start..=end).map(|(_, r)| r.fee).collect();
    if fees.is_empty() {
        return Ok(None);
    }
    fees.sort_unstable();
    let index = ((fees.len() as f64) * percentile).floor() as usize;
    Ok(Some(fees[index.min(fees.len() - 1)]))
}

/// A fee prediction made after a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Prediction {
    /// Block the window ends at.
    pub block: u64,
    /// First block of the window.
    pub window_start: u64,
    pub fee: U256,
}

/// Recomputes a prediction every `every_n` observed blocks.
#[derive(Debug)]
pub struct Predictor {
    every_n: u64,
    window: u64,
    percentile: f64,
    /// Blocks remaining until the next prediction.
    countdown: u64,
}

impl Predictor {
    /// `window` is the number of blocks looked back over, including the observed block.
    pub fn new(every_n: u64, window: u64, percentile: f64) -> Result<Self, PredictError> {
        if !(0.0..=1.0).contains(&percentile) {
            return Err(PredictError::InvalidPercentile(percentile));
        }
        Ok(Self {
            every_n: every_n.max(1),
            window: window.max(1),
            percentile,
            countdown: 1,
        })
    }

    /// Registers a newly recorded block. Returns a prediction if one is due.
    pub fn observe(
        &mut self,
        store: &FeeStore,
        block: u64,
    ) -> Result<Option<Prediction>, PredictError> {
        self.countdown -= 1;
        if self.countdown > 0 {
            return Ok(None);
        }
        self.countdown = self.every_n;
        let window_start = block.saturating_sub(self.window - 1);
        let prediction = percentile_fee(store, window_start, block, self.percentile)?.map(|fee| {
            Prediction {
                block,
                window_start,
                fee,
            }
        });
        Ok(prediction)
    }
}
