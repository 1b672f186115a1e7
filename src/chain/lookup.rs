//! Chain lookups used by proof verification.

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::Txid;
use futures_util::future::join_all;

use crate::chain::bridge::ChainBridge;
use crate::chain::types::{ChainError, ChainResult, ResultExt};
use crate::chain::ChainSource;

/// Number of blocks averaged by `mean_block_timestamp`, including the
/// requested one.
pub const MEAN_TIMESTAMP_WINDOW: u32 = 11;

/// Chain queries a proof verifier needs.
#[async_trait]
pub trait ChainLookup: Send + Sync {
    /// Height of the block containing `txid`.
    async fn tx_block_height(&self, txid: &Txid) -> ChainResult<u32>;

    /// Mean timestamp, in Unix seconds, of the block at `height` and its ten
    /// predecessors. Missing blocks are skipped.
    async fn mean_block_timestamp(&self, height: u32) -> ChainResult<u64>;

    async fn current_height(&self) -> ChainResult<u32>;
}

/// `ChainLookup` backed by a chain bridge.
pub struct BridgeChainLookup<S> {
    bridge: Arc<ChainBridge<S>>,
}

impl<S> Clone for BridgeChainLookup<S> {
    fn clone(&self) -> Self {
        Self {
            bridge: Arc::clone(&self.bridge),
        }
    }
}

impl<S: ChainSource> BridgeChainLookup<S> {
    pub fn new(bridge: Arc<ChainBridge<S>>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl<S: ChainSource> ChainLookup for BridgeChainLookup<S> {
    async fn tx_block_height(&self, txid: &Txid) -> ChainResult<u32> {
        let tx = self
            .bridge
            .source()
            .transaction(txid)
            .await
            .context("get transaction")?;
        tx.status
            .confirmed_height()
            .ok_or(ChainError::TxNotConfirmed(*txid))
    }

    async fn mean_block_timestamp(&self, height: u32) -> ChainResult<u64> {
        let lowest = height.saturating_sub(MEAN_TIMESTAMP_WINDOW - 1);
        let lookups = (lowest..=height).map(|h| self.bridge.block_timestamp(h));

        let mut total: u64 = 0;
        let mut count: u64 = 0;
        for result in join_all(lookups).await {
            match result {
                Ok(timestamp) if timestamp > 0 => {
                    total += u64::from(timestamp);
                    count += 1;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(height, error = %err, "Skipping block timestamp");
                }
            }
        }

        if count == 0 {
            return Err(ChainError::NoTimestamps(height));
        }
        Ok(total / count)
    }

    async fn current_height(&self) -> ChainResult<u32> {
        self.bridge.current_height().await
    }
}
