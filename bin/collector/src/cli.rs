//! For Command Line Interface for basefee_collector

use std::path::PathBuf;

use basefee_recorder::{rpc::BlockTag, walk::Direction};
use basefee_types::constants::{DEFAULT_FLUSH_EVERY, DEFAULT_STORE_PATH};
use clap::{Args, Parser, Subcommand, ValueEnum};
use url::Url;

pub const LOCALHOST: &str = "http://127.0.0.1:8545/";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct AppArgs {
    /// Fee history file to read and extend.
    #[clap(short, long, global = true, default_value_t = String::from(DEFAULT_STORE_PATH))]
    pub file: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Walk blocks from a start block and record the base fee of each one not yet held.
    Walk(WalkArgs),
    /// Show how many blocks are held and which range they cover.
    Status,
    /// Compute a base fee percentile over a range of held blocks.
    Predict(PredictArgs),
    /// Merge a file in the older gwei-float layout into the fee history.
    Import {
        /// File to import, e.g. data.json
        #[clap(long)]
        from: PathBuf,
    },
    /// Check the node is reachable and show its latest block.
    Latest(NodeArgs),
}

#[derive(Args, Debug)]
pub struct NodeArgs {
    /// Url of node for eth_getBlockByNumber requests
    #[clap(short, long, env = "BASEFEE_NODE", default_value_t = Url::parse(LOCALHOST).expect("Couldn't read node"))]
    pub node: Url,
}

#[derive(Args, Debug)]
pub struct WalkArgs {
    #[command(flatten)]
    pub node: NodeArgs,
    /// Block to start from: a number (decimal or 0x-hex) or "latest"
    #[clap(short, long, default_value = "latest")]
    pub start: BlockTag,
    /// Order in which blocks are visited.
    #[clap(short, long, value_enum, default_value_t = DirectionFlag::Backward)]
    pub direction: DirectionFlag,
    /// Last block to visit (inclusive). Highest when walking forward, lowest when walking backward.
    #[clap(long)]
    pub stop: Option<u64>,
    /// End the walk on the first node error instead of retrying.
    #[clap(long)]
    pub no_retry: bool,
    /// Seconds to wait before retrying a failed request.
    #[clap(long, default_value_t = 10)]
    pub retry_secs: u64,
    /// Attempts per block before giving up (unlimited if absent).
    #[clap(long)]
    pub max_attempts: Option<u32>,
    /// New records held before the file is rewritten.
    #[clap(long, default_value_t = DEFAULT_FLUSH_EVERY)]
    pub flush_every: u64,
    /// Milliseconds to pause after each block fetched.
    #[clap(long, default_value_t = 100)]
    pub delay_ms: u64,
    /// When walking forward, keep waiting for new blocks at the chain head.
    #[clap(long)]
    pub follow: bool,
    /// Seconds between checks for a new block at the chain head.
    #[clap(long, default_value_t = 12)]
    pub poll_secs: u64,
    /// Log a fee prediction after every N recorded blocks.
    #[clap(long)]
    pub predict_every: Option<u64>,
    /// Blocks looked back over for a prediction.
    #[clap(long, default_value_t = 200)]
    pub window: u64,
    /// Percentile (0 to 1) used for predictions.
    #[clap(long, default_value_t = 0.5)]
    pub percentile: f64,
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// First block of the window (defaults to `window` blocks before the end).
    #[clap(long)]
    pub start: Option<u64>,
    /// Last block of the window (defaults to the latest held block).
    #[clap(long)]
    pub end: Option<u64>,
    /// Window size used when no start is given.
    #[clap(long, default_value_t = 200)]
    pub window: u64,
    /// Percentile (0 to 1) of the fees in the window.
    #[clap(short, long, default_value_t = 0.5)]
    pub percentile: f64,
}

/// Direction of a walk.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum DirectionFlag {
    /// Ascending block numbers
    Forward,
    /// Descending block numbers
    Backward,
}

impl From<DirectionFlag> for Direction {
    fn from(flag: DirectionFlag) -> Self {
        match flag {
            DirectionFlag::Forward => Direction::Forward,
            DirectionFlag::Backward => Direction::Backward,
        }
    }
}
