use std::{fmt::Display, str::FromStr};

use ethers::types::{Block, H256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Serialize)]
pub(crate) struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<Value>,
    id: u64,
}

/// Error object a node returns in place of a result.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

impl Display for RpcErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}

/// Response to eth_getBlockByNumber. The result is `null` for a block
/// the node does not have yet.
#[derive(Deserialize, Serialize)]
pub(crate) struct BlockResponse {
    id: u32,
    jsonrpc: String,
    #[serde(default)]
    pub(crate) result: Option<Block<H256>>,
    #[serde(default)]
    pub(crate) error: Option<RpcErrorObject>,
}

#[derive(Debug, Error, PartialEq)]
pub enum BlockTagError {
    #[error("Block tag must be a decimal number, 0x-prefixed hex number or 'latest', got {0}")]
    Unrecognised(String),
}

/// A block to request, either by number or the node's current head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockTag {
    Number(u64),
    Latest,
}

impl Display for BlockTag {
    /// Renders the tag as the node expects it (e.g., "0xabc", "latest").
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockTag::Number(n) => write!(f, "0x{n:x}"),
            BlockTag::Latest => write!(f, "latest"),
        }
    }
}

impl FromStr for BlockTag {
    type Err = BlockTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unrecognised = || BlockTagError::Unrecognised(s.to_string());
        if s.eq_ignore_ascii_case("latest") {
            return Ok(BlockTag::Latest);
        }
        if let Some(hex) = s.strip_prefix("0x") {
            return u64::from_str_radix(hex, 16)
                .map(BlockTag::Number)
                .map_err(|_| unrecognised());
        }
        s.parse::<u64>()
            .map(BlockTag::Number)
            .map_err(|_| unrecognised())
    }
}

/// Generates a JSON-RPC request for eth_getBlockByNumber for
/// the specified block (e.g., "0xabc", "latest").
///
/// Only transaction hashes are requested, the fee is in the header.
pub(crate) fn get_block_by_number(block: BlockTag) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: "2.0".to_owned(),
        method: "eth_getBlockByNumber".to_owned(),
        params: vec![json!(block.to_string()), Value::Bool(false)],
        id: 1,
    }
}
