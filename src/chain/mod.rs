//! Chain observation subsystem.
//!
//! # Data Flow
//! ```text
//! Chain-data REST service
//!     → client.rs (rate limit, retries, decoding)
//!     → cache.rs (height, hashes, timestamps with TTL)
//!     → confirmation.rs (one poller per watched transaction)
//!     → epoch.rs (one shared poller, fan-out of new heights)
//!     → bridge.rs (facade consumed by the asset protocol)
//!     → lookup.rs (height / timestamp queries for proof verification)
//! ```
//!
//! # Design Decisions
//! - Pollers talk to the source directly; only facade lookups use the cache
//! - Delivery to subscribers never blocks a poller (full queues drop)
//! - Poll failures are reported to subscribers, never end a poll loop

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{BlockHash, Transaction, Txid};

pub mod bridge;
pub mod cache;
pub mod client;
pub mod confirmation;
pub mod epoch;
pub mod lookup;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use bridge::ChainBridge;
pub use cache::ResultCache;
pub use client::ChainClient;
pub use confirmation::{ConfirmationNotifier, ConfirmationRegistration, ConfirmationRequest};
pub use epoch::{EpochNotifier, EpochRegistration};
pub use lookup::{BridgeChainLookup, ChainLookup};
pub use types::{
    BlockResponse, ChainError, ChainResult, ConfirmationEvent, FeeEstimates, ResultExt,
    TransactionResponse, TxStatus,
};

/// Read and broadcast access to a chain-data service.
#[async_trait]
pub trait ChainSource: Send + Sync + 'static {
    /// Height of the current tip.
    async fn current_height(&self) -> ChainResult<u32>;

    /// Hash of the block at `height` on the current best chain.
    async fn block_hash(&self, height: u32) -> ChainResult<BlockHash>;

    /// Block metadata by hash.
    async fn block(&self, hash: &BlockHash) -> ChainResult<BlockResponse>;

    /// Transaction with its confirmation status.
    async fn transaction(&self, txid: &Txid) -> ChainResult<TransactionResponse>;

    /// Submit a signed transaction.
    async fn broadcast(&self, tx: &Transaction) -> ChainResult<Txid>;

    /// Recommended fee tiers.
    async fn fee_estimates(&self) -> ChainResult<FeeEstimates>;
}

#[async_trait]
impl<S: ChainSource + ?Sized> ChainSource for Arc<S> {
    async fn current_height(&self) -> ChainResult<u32> {
        (**self).current_height().await
    }

    async fn block_hash(&self, height: u32) -> ChainResult<BlockHash> {
        (**self).block_hash(height).await
    }

    async fn block(&self, hash: &BlockHash) -> ChainResult<BlockResponse> {
        (**self).block(hash).await
    }

    async fn transaction(&self, txid: &Txid) -> ChainResult<TransactionResponse> {
        (**self).transaction(txid).await
    }

    async fn broadcast(&self, tx: &Transaction) -> ChainResult<Txid> {
        (**self).broadcast(tx).await
    }

    async fn fee_estimates(&self) -> ChainResult<FeeEstimates> {
        (**self).fee_estimates().await
    }
}
