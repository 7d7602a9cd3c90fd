//! Values shared by the recorder and collector.

/// Fee assumed for blocks that do not carry `baseFeePerGas` (pre-London blocks,
/// or chains without an EIP-1559 fee market), in gwei.
pub const DEFAULT_BASE_FEE_GWEI: &str = "0.1";

/// A status line is logged whenever a recorded block number is a multiple of this.
pub const STATUS_EVERY_N_BLOCKS: u64 = 25;

/// Number of new records held in memory before the store is written to disk.
pub const DEFAULT_FLUSH_EVERY: u64 = 100;

/// Default location of the fee history file.
pub const DEFAULT_STORE_PATH: &str = "data/basefee.json";
