//! In-memory chain for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Transaction, TxMerkleNode, Txid};

use super::types::{
    BlockResponse, ChainError, ChainResult, FeeEstimates, TransactionResponse, TxStatus,
};
use super::ChainSource;

#[derive(Default)]
struct State {
    height: u32,
    hashes: HashMap<u32, BlockHash>,
    blocks: HashMap<BlockHash, BlockResponse>,
    txs: HashMap<Txid, TxStatus>,
    fees: Option<FeeEstimates>,
    broadcast: Vec<Transaction>,
    height_error: Option<ChainError>,
    calls: HashMap<&'static str, usize>,
}

impl State {
    fn hit(&mut self, endpoint: &'static str) {
        *self.calls.entry(endpoint).or_default() += 1;
    }
}

#[derive(Default)]
pub(crate) struct MockChain {
    state: Mutex<State>,
}

impl MockChain {
    pub(crate) fn new(height: u32) -> Self {
        let chain = Self::default();
        chain.set_height(height);
        chain
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn set_height(&self, height: u32) {
        self.state().height = height;
    }

    pub(crate) fn fail_height(&self, err: Option<ChainError>) {
        self.state().height_error = err;
    }

    /// Add a block whose header hashes to its id, returning the hash.
    pub(crate) fn add_block(&self, height: u32, timestamp: u32) -> BlockHash {
        let mut state = self.state();
        let mut block = BlockResponse {
            id: BlockHash::all_zeros(),
            height,
            version: 0x2000_0000,
            timestamp,
            tx_count: 1,
            size: 0,
            weight: 0,
            merkle_root: TxMerkleNode::from_byte_array([height as u8; 32]),
            previousblockhash: height
                .checked_sub(1)
                .and_then(|h| state.hashes.get(&h).copied()),
            nonce: height,
            bits: 0x1d00_ffff,
        };
        let hash = block.header().block_hash();
        block.id = hash;
        state.hashes.insert(height, hash);
        state.blocks.insert(hash, block);
        hash
    }

    /// Point `height` at a different hash without a matching block.
    pub(crate) fn replace_hash(&self, height: u32, hash: BlockHash) {
        self.state().hashes.insert(height, hash);
    }

    pub(crate) fn set_tx(&self, txid: Txid, status: TxStatus) {
        self.state().txs.insert(txid, status);
    }

    pub(crate) fn confirm_tx(&self, txid: Txid, height: u32) {
        let hash = self.state().hashes.get(&height).copied();
        self.set_tx(
            txid,
            TxStatus {
                confirmed: true,
                block_height: Some(height),
                block_hash: hash,
                block_time: None,
            },
        );
    }

    pub(crate) fn set_fees(&self, fees: FeeEstimates) {
        self.state().fees = Some(fees);
    }

    pub(crate) fn broadcasted(&self) -> Vec<Transaction> {
        self.state().broadcast.clone()
    }

    pub(crate) fn calls(&self, endpoint: &'static str) -> usize {
        self.state().calls.get(endpoint).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn current_height(&self) -> ChainResult<u32> {
        let mut state = self.state();
        state.hit("height");
        match &state.height_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.height),
        }
    }

    async fn block_hash(&self, height: u32) -> ChainResult<BlockHash> {
        let mut state = self.state();
        state.hit("block_hash");
        state.hashes.get(&height).copied().ok_or(ChainError::NotFound)
    }

    async fn block(&self, hash: &BlockHash) -> ChainResult<BlockResponse> {
        let mut state = self.state();
        state.hit("block");
        state.blocks.get(hash).cloned().ok_or(ChainError::NotFound)
    }

    async fn transaction(&self, txid: &Txid) -> ChainResult<TransactionResponse> {
        let mut state = self.state();
        state.hit("transaction");
        let status = state.txs.get(txid).cloned().ok_or(ChainError::NotFound)?;
        Ok(TransactionResponse {
            txid: *txid,
            version: 2,
            locktime: 0,
            size: 0,
            weight: 0,
            fee: 0,
            status,
        })
    }

    async fn broadcast(&self, tx: &Transaction) -> ChainResult<Txid> {
        let mut state = self.state();
        state.hit("broadcast");
        state.broadcast.push(tx.clone());
        Ok(tx.compute_txid())
    }

    async fn fee_estimates(&self) -> ChainResult<FeeEstimates> {
        let mut state = self.state();
        state.hit("fees");
        state.fees.ok_or(ChainError::NotFound)
    }
}
