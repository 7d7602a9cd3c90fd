//! The per-block data that is persisted.
use ethers::types::U256;
use serde::{Deserialize, Serialize};

/// Fee information for one block as it is stored on disk, keyed by block number.
///
/// Serialized as `{"fee": "0x3b9aca00", "t": 1681338455}`.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct FeeRecord {
    /// Base fee in wei.
    pub fee: U256,
    /// Block timestamp in unix seconds.
    pub t: u64,
}

/// Fee information for a block as returned by a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockFee {
    pub number: u64,
    pub timestamp: u64,
    /// Base fee in wei.
    pub base_fee: U256,
}

impl BlockFee {
    /// The stored form of the block, as a (key, value) pair.
    pub fn to_entry(&self) -> (u64, FeeRecord) {
        (
            self.number,
            FeeRecord {
                fee: self.base_fee,
                t: self.timestamp,
            },
        )
    }
}

impl From<(u64, FeeRecord)> for BlockFee {
    fn from((number, record): (u64, FeeRecord)) -> Self {
        BlockFee {
            number,
            timestamp: record.t,
            base_fee: record.fee,
        }
    }
}
