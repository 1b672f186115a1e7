//! Chain bridge facade.
//!
//! # Responsibilities
//! - Cached height, hash, header and timestamp lookups
//! - Fee estimation by confirmation target
//! - Transaction broadcast
//! - Header verification against the best chain
//! - Confirmation and epoch registration
//! - Background tasks: epoch poller, cache sweeper
//!
//! # Lifecycle
//! ```text
//! Idle ──start()──→ Running ──stop()──→ Stopped
//!   └──────────────stop()─────────────────┘
//! ```
//! `start` and `stop` are idempotent. Once stopped, registrations fail with
//! `ChainError::ShuttingDown`.

use std::sync::{Arc, Mutex};

use bitcoin::block::Header;
use bitcoin::{BlockHash, FeeRate, Transaction, Txid};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::cache::ResultCache;
use crate::chain::confirmation::{
    ConfirmationNotifier, ConfirmationRegistration, ConfirmationRequest,
};
use crate::chain::epoch::{EpochNotifier, EpochRegistration};
use crate::chain::lookup::BridgeChainLookup;
use crate::chain::types::{ChainError, ChainResult, ResultExt};
use crate::chain::ChainSource;
use crate::config::BridgeConfig;
use crate::lifecycle::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    Stopped,
}

/// Facade over the chain-data source, cache and notifiers.
pub struct ChainBridge<S> {
    source: Arc<S>,
    cache: Arc<ResultCache>,
    confirmations: ConfirmationNotifier<S>,
    epochs: Arc<EpochNotifier<S>>,
    shutdown: Shutdown,
    state: Mutex<State>,
}

impl<S: ChainSource> ChainBridge<S> {
    pub fn new(source: S, config: &BridgeConfig) -> Self {
        let source = Arc::new(source);
        let shutdown = Shutdown::new();
        let poll_interval = config.poll_interval();
        let cache = Arc::new(ResultCache::new(
            config.cache_ttl(),
            config.hash_cache_capacity,
            config.timestamp_cache_capacity,
        ));

        Self {
            confirmations: ConfirmationNotifier::new(
                Arc::clone(&source),
                Arc::clone(&cache),
                poll_interval,
                shutdown.clone(),
            ),
            epochs: Arc::new(EpochNotifier::new(
                Arc::clone(&source),
                poll_interval,
                config.epoch_queue_depth,
            )),
            source,
            cache,
            shutdown,
            state: Mutex::new(State::Idle),
        }
    }

    fn state(&self) -> State {
        *self.state.lock().expect("bridge state lock poisoned")
    }

    /// Start background tasks.
    pub fn start(&self) -> ChainResult<()> {
        let mut state = self.state.lock().expect("bridge state lock poisoned");
        match *state {
            State::Running => return Ok(()),
            State::Stopped => return Err(ChainError::ShuttingDown),
            State::Idle => {}
        }

        self.epochs.start(&self.shutdown);
        self.spawn_cache_sweeper();
        *state = State::Running;

        info!("Chain bridge started");
        Ok(())
    }

    /// Cancel every poller, wait for all of them to exit, then clear the
    /// registries.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().expect("bridge state lock poisoned");
            if *state == State::Stopped {
                return;
            }
            *state = State::Stopped;
        }

        info!(
            confirmations = self.confirmations.active_requests(),
            subscribers = self.epochs.subscriber_count(),
            "Chain bridge stopping"
        );
        self.shutdown.drain().await;
        self.confirmations.clear();
        self.epochs.clear();
        info!("Chain bridge stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    fn spawn_cache_sweeper(&self) {
        let cache = Arc::clone(&self.cache);
        let token = self.shutdown.token();
        let period = cache.ttl();

        self.shutdown.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            debug!(removed, "Purged expired cache entries");
                        }
                    }
                }
            }
        });
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Current tip height.
    pub async fn current_height(&self) -> ChainResult<u32> {
        if let Some(height) = self.cache.height() {
            return Ok(height);
        }

        let height = self
            .source
            .current_height()
            .await
            .context("get current height")?;
        self.cache.set_height(height);
        Ok(height)
    }

    /// Hash of the block at `height`, with whether it came from the cache.
    async fn lookup_block_hash(&self, height: u32) -> ChainResult<(BlockHash, bool)> {
        if let Some(hash) = self.cache.block_hash(height) {
            return Ok((hash, true));
        }

        let hash = self
            .source
            .block_hash(height)
            .await
            .context("get block hash")?;
        self.cache.observe_block(height, hash);
        Ok((hash, false))
    }

    /// Hash of the block at `height`.
    pub async fn block_hash(&self, height: u32) -> ChainResult<BlockHash> {
        self.lookup_block_hash(height).await.map(|(hash, _)| hash)
    }

    /// Header of the block with `hash`.
    pub async fn block_header(&self, hash: &BlockHash) -> ChainResult<Header> {
        let block = self.source.block(hash).await.context("get block")?;
        let header = block.verified_header().context("get block")?;
        self.cache.set_block_timestamp(block.height, block.timestamp);
        Ok(header)
    }

    /// Header of the block at `height`.
    pub async fn block_header_by_height(&self, height: u32) -> ChainResult<Header> {
        let hash = self.block_hash(height).await?;
        self.block_header(&hash).await
    }

    /// Timestamp of the block at `height`.
    pub async fn block_timestamp(&self, height: u32) -> ChainResult<u32> {
        if let Some(timestamp) = self.cache.block_timestamp(height) {
            return Ok(timestamp);
        }

        let hash = self.block_hash(height).await?;
        let block = self.source.block(&hash).await.context("get block")?;
        self.cache.set_block_timestamp(height, block.timestamp);
        Ok(block.timestamp)
    }

    /// Fee rate for confirmation within `conf_target` blocks.
    pub async fn estimate_fee(&self, conf_target: u32) -> ChainResult<FeeRate> {
        let fees = self
            .source
            .fee_estimates()
            .await
            .context("get fee estimates")?;
        let rate = fees.fee_rate_for_target(conf_target)?;
        debug!(conf_target, sat_per_kwu = rate.to_sat_per_kwu(), "Estimated fee");
        Ok(rate)
    }

    /// Broadcast a signed transaction.
    pub async fn publish_transaction(&self, tx: &Transaction, label: &str) -> ChainResult<Txid> {
        let txid = self.source.broadcast(tx).await?;
        info!(%txid, label, "Published transaction");
        Ok(txid)
    }

    /// Check that `header` is the block at `height` on the best chain.
    ///
    /// A cached hash that disagrees is refetched once before failing.
    pub async fn verify_block(&self, header: &Header, height: u32) -> ChainResult<()> {
        let actual = header.block_hash();
        let (expected, cached) = self.lookup_block_hash(height).await?;
        if expected == actual {
            return Ok(());
        }
        if !cached {
            return Err(ChainError::BlockMismatch {
                height,
                expected,
                actual,
            });
        }

        self.cache.invalidate(height);
        let fresh = self
            .source
            .block_hash(height)
            .await
            .context("get block hash")?;
        self.cache.observe_block(height, fresh);

        if fresh == actual {
            return Ok(());
        }
        warn!(height, expected = %fresh, actual = %actual, "Block verification failed");
        Err(ChainError::BlockMismatch {
            height,
            expected: fresh,
            actual,
        })
    }

    /// Watch a transaction until it reaches `request.num_confs`.
    pub fn register_confirmations(
        &self,
        request: ConfirmationRequest,
        cancel: CancellationToken,
    ) -> ChainResult<ConfirmationRegistration> {
        if self.state() == State::Stopped {
            return Err(ChainError::ShuttingDown);
        }
        self.confirmations.register(request, cancel)
    }

    /// Subscribe to new tip heights.
    pub fn register_block_epochs(&self, cancel: CancellationToken) -> ChainResult<EpochRegistration> {
        if self.state() == State::Stopped {
            return Err(ChainError::ShuttingDown);
        }
        Ok(self.epochs.register(cancel))
    }

    pub fn active_confirmations(&self) -> usize {
        self.confirmations.active_requests()
    }

    pub fn epoch_subscribers(&self) -> usize {
        self.epochs.subscriber_count()
    }

    /// Chain lookup for proof verification.
    pub fn chain_lookup(self: &Arc<Self>) -> BridgeChainLookup<S> {
        BridgeChainLookup::new(Arc::clone(self))
    }
}
