//! Calls a node for block fee information.
use async_trait::async_trait;
use basefee_types::{
    record::BlockFee,
    units::{default_base_fee, UnitsError},
};
use ethers::types::{Block, H256};
use log::debug;
use reqwest::Client;
use thiserror::Error;
use url::Url;

use crate::rpc::{get_block_by_number, BlockResponse, BlockTag, RpcErrorObject};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Block retrieved does not yet have a number")]
    NoBlockNumber,
    #[error("Block {0} timestamp does not fit in u64")]
    TimestampOverflow(u64),
    #[error("Node has no block for tag {0}")]
    BlockAbsent(BlockTag),
    #[error("Reqwest error {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("Node returned JSON-RPC error {0}")]
    Rpc(RpcErrorObject),
    #[error("Node response is not a valid block {0}")]
    InvalidResponse(#[from] serde_json::Error),
    #[error("Units error {0}")]
    UnitsError(#[from] UnitsError),
}

impl NodeError {
    /// Whether the same request may succeed if sent again later.
    ///
    /// Transport failures, HTTP errors (rate limits, gateway errors) and
    /// JSON-RPC error objects are transient. A malformed block is not.
    pub fn is_transient(&self) -> bool {
        match self {
            NodeError::ReqwestError(e) => !(e.is_builder() || e.is_decode()),
            NodeError::Rpc(_) => true,
            NodeError::BlockAbsent(_) => true,
            NodeError::NoBlockNumber
            | NodeError::TimestampOverflow(_)
            | NodeError::InvalidResponse(_)
            | NodeError::UnitsError(_) => false,
        }
    }
}

/// Something that can provide block fee information.
#[async_trait]
pub trait BlockSource {
    /// Fetches a block. Returns `None` if the node does not have the block yet
    /// (the number is ahead of the chain head).
    async fn block(&self, tag: BlockTag) -> Result<Option<BlockFee>, NodeError>;

    /// Number of the current chain head.
    async fn latest_number(&self) -> Result<u64, NodeError> {
        match self.block(BlockTag::Latest).await? {
            Some(block) => Ok(block.number),
            None => Err(NodeError::BlockAbsent(BlockTag::Latest)),
        }
    }
}

/// JSON-RPC over HTTP to a single node.
#[derive(Clone, Debug)]
pub struct NodeClient {
    client: Client,
    url: Url,
}

impl NodeClient {
    pub fn new(url: Url) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl BlockSource for NodeClient {
    async fn block(&self, tag: BlockTag) -> Result<Option<BlockFee>, NodeError> {
        let body = self
            .client
            .post(self.url.clone())
            .json(&get_block_by_number(tag))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let block = parse_block_response(&body)?;
        if block.is_none() {
            debug!("Node has no block for {tag}");
        }
        Ok(block)
    }
}

/// Reads an eth_getBlockByNumber response body.
///
/// A body that is not a well formed response is an `InvalidResponse`, which is
/// not retried.
pub(crate) fn parse_block_response(body: &[u8]) -> Result<Option<BlockFee>, NodeError> {
    let response: BlockResponse = serde_json::from_slice(body)?;
    if let Some(error) = response.error {
        return Err(NodeError::Rpc(error));
    }
    match response.result {
        Some(block) => Ok(Some(block_fee(&block)?)),
        None => Ok(None),
    }
}

/// Extracts the fee information from a block.
///
/// Blocks without a base fee are recorded with the default fee.
pub(crate) fn block_fee(block: &Block<H256>) -> Result<BlockFee, NodeError> {
    let Some(number) = block.number else {
        return Err(NodeError::NoBlockNumber);
    };
    let number = number.as_u64();
    if block.timestamp.bits() > 64 {
        return Err(NodeError::TimestampOverflow(number));
    }
    let base_fee = match block.base_fee_per_gas {
        Some(fee) => fee,
        None => default_base_fee()?,
    };
    Ok(BlockFee {
        number,
        timestamp: block.timestamp.as_u64(),
        base_fee,
    })
}
