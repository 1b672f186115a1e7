//! Chain-data types and error definitions.

use bitcoin::block::{Header, Version};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, CompactTarget, FeeRate, TxMerkleNode, Txid};
use serde::Deserialize;
use thiserror::Error;

use crate::resilience::retries::{classify_status, RetryReason, Retryable};

/// Errors that can occur while talking to the chain-data service or
/// observing the chain.
///
/// Cloneable so that one poll failure can be fanned out to every subscriber.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// Connection, timeout or body read failure.
    #[error("HTTP transport error: {0}")]
    Http(String),

    /// Service answered 429.
    #[error("Rate limited by chain service")]
    RateLimited,

    /// Service answered a retryable 5xx status.
    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    /// Service answered 404.
    #[error("Not found")]
    NotFound,

    /// Any other non-success status.
    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Retry budget spent; carries the last failure.
    #[error("Giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: Box<ChainError>,
    },

    /// Response body could not be decoded.
    #[error("Malformed response: {0}")]
    Decode(String),

    /// Header does not hash to the block the service reports at that height.
    #[error("Block hash mismatch at height {height}: expected {expected}, got {actual}")]
    BlockMismatch {
        height: u32,
        expected: BlockHash,
        actual: BlockHash,
    },

    /// Transaction exists but is not in a block yet.
    #[error("Transaction {0} is not confirmed")]
    TxNotConfirmed(Txid),

    /// None of the blocks around a height had a timestamp.
    #[error("No block timestamps found around height {0}")]
    NoTimestamps(u32),

    /// Broadcast accepted but the service reported a different txid.
    #[error("Broadcast txid mismatch: expected {expected}, service returned {actual}")]
    TxidMismatch { expected: Txid, actual: Txid },

    /// Bridge has been stopped.
    #[error("Chain bridge is shutting down")]
    ShuttingDown,

    /// Failure of a named operation.
    #[error("{op}: {source}")]
    Op {
        op: &'static str,
        source: Box<ChainError>,
    },
}

impl ChainError {
    /// Build the error for a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            404 => ChainError::NotFound,
            429 => ChainError::RateLimited,
            _ if classify_status(status).is_some() => ChainError::Server { status, body },
            _ => ChainError::UnexpectedStatus { status, body },
        }
    }

    /// Strip operation context and retry wrappers.
    pub fn root(&self) -> &ChainError {
        match self {
            ChainError::Op { source, .. } | ChainError::RetriesExhausted { source, .. } => {
                source.root()
            }
            other => other,
        }
    }

    /// True for failures that may succeed if repeated later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root(),
            ChainError::Http(_) | ChainError::RateLimited | ChainError::Server { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), ChainError::NotFound)
    }
}

impl Retryable for ChainError {
    fn retry_reason(&self) -> Option<RetryReason> {
        match self {
            ChainError::Http(_) => Some(RetryReason::Transport),
            ChainError::RateLimited => Some(RetryReason::RateLimited),
            ChainError::Server { status, .. } => classify_status(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        ChainError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Decode(err.to_string())
    }
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Attach an operation name to a failure.
pub trait ResultExt<T> {
    fn context(self, op: &'static str) -> ChainResult<T>;
}

impl<T> ResultExt<T> for ChainResult<T> {
    fn context(self, op: &'static str) -> ChainResult<T> {
        self.map_err(|source| ChainError::Op {
            op,
            source: Box::new(source),
        })
    }
}

/// Block metadata returned by `GET /block/{hash}`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockResponse {
    pub id: BlockHash,
    pub height: u32,
    pub version: i32,
    pub timestamp: u32,
    #[serde(default)]
    pub tx_count: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub weight: u64,
    pub merkle_root: TxMerkleNode,
    /// Absent for the genesis block.
    #[serde(default)]
    pub previousblockhash: Option<BlockHash>,
    pub nonce: u32,
    pub bits: u32,
}

impl BlockResponse {
    /// Rebuild the consensus header from the metadata.
    pub fn header(&self) -> Header {
        Header {
            version: Version::from_consensus(self.version),
            prev_blockhash: self.previousblockhash.unwrap_or_else(BlockHash::all_zeros),
            merkle_root: self.merkle_root,
            time: self.timestamp,
            bits: CompactTarget::from_consensus(self.bits),
            nonce: self.nonce,
        }
    }

    /// Rebuild the header and check that it hashes to `id`.
    pub fn verified_header(&self) -> ChainResult<Header> {
        let header = self.header();
        let actual = header.block_hash();
        if actual != self.id {
            return Err(ChainError::BlockMismatch {
                height: self.height,
                expected: self.id,
                actual,
            });
        }
        Ok(header)
    }
}

/// Confirmation status embedded in a transaction response.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TxStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u32>,
    #[serde(default)]
    pub block_hash: Option<BlockHash>,
    #[serde(default)]
    pub block_time: Option<u64>,
}

impl TxStatus {
    /// Containing height, only when confirmed.
    pub fn confirmed_height(&self) -> Option<u32> {
        if self.confirmed {
            self.block_height
        } else {
            None
        }
    }
}

/// Transaction returned by `GET /tx/{txid}`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionResponse {
    pub txid: Txid,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub locktime: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub weight: u64,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub status: TxStatus,
}

/// Recommended fees in sat/vB from `GET /v1/fees/recommended`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimates {
    pub fastest_fee: u64,
    pub half_hour_fee: u64,
    pub hour_fee: u64,
    pub economy_fee: u64,
    pub minimum_fee: u64,
}

impl FeeEstimates {
    /// Pick the tier for a confirmation target, in sat/vB.
    pub fn sat_per_vb_for_target(&self, conf_target: u32) -> u64 {
        match conf_target {
            0..=1 => self.fastest_fee,
            2..=3 => self.half_hour_fee,
            4..=6 => self.hour_fee,
            7..=12 => self.economy_fee,
            _ => self.minimum_fee,
        }
    }

    /// Fee rate for a confirmation target.
    pub fn fee_rate_for_target(&self, conf_target: u32) -> ChainResult<FeeRate> {
        let sat_vb = self.sat_per_vb_for_target(conf_target);
        FeeRate::from_sat_per_vb(sat_vb)
            .ok_or_else(|| ChainError::Decode(format!("fee rate {sat_vb} sat/vB overflows")))
    }
}

/// Delivered once a transaction reaches its target depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationEvent {
    pub txid: Txid,
    /// Height of the containing block.
    pub block_height: u32,
    /// Depth at delivery time.
    pub confirmations: u32,
    pub block_hash: Option<BlockHash>,
    /// Attached only when the registration asked for block details.
    pub header: Option<Header>,
    /// Not reported by the service.
    pub tx_index: Option<u32>,
}
