//! Transaction confirmation tracking.
//!
//! # Responsibilities
//! - Run one poller per registered transaction
//! - Report when the transaction reaches its target depth
//! - Signal when the containing block changes (reorg)
//!
//! # State Machine
//! ```text
//! Pending ──(seen in block H)──→ Confirming ──(tip − H + 1 ≥ target)──→ Satisfied
//!    ↑                              │
//!    └──────(left the chain)────────┘  (reorg signal)
//! ```
//! Satisfied delivers one event and removes the request. Cancellation or
//! shutdown ends the poller without an event.

use std::sync::Arc;
use std::time::Duration;

use bitcoin::{ScriptBuf, Txid};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chain::cache::ResultCache;
use crate::chain::types::{ChainError, ChainResult, ConfirmationEvent, ResultExt};
use crate::chain::ChainSource;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// What to watch for.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub txid: Txid,
    /// Output script the caller expects the transaction to pay.
    pub script: ScriptBuf,
    /// Required depth; zero is treated as one.
    pub num_confs: u32,
    /// Height at or after which the transaction can appear.
    pub height_hint: u32,
    /// Attach the confirming block header to the event.
    pub include_block: bool,
    /// Best-effort reorg signal.
    pub reorg: Option<mpsc::Sender<()>>,
}

impl ConfirmationRequest {
    pub fn new(txid: Txid, script: ScriptBuf, num_confs: u32, height_hint: u32) -> Self {
        Self {
            txid,
            script,
            num_confs,
            height_hint,
            include_block: false,
            reorg: None,
        }
    }

    pub fn include_block(mut self) -> Self {
        self.include_block = true;
        self
    }

    pub fn with_reorg_signal(mut self, reorg: mpsc::Sender<()>) -> Self {
        self.reorg = Some(reorg);
        self
    }
}

/// Handle returned to the caller of a registration.
#[derive(Debug)]
pub struct ConfirmationRegistration {
    pub id: Uuid,
    /// Receives exactly one event once the target depth is reached.
    pub confirmed: mpsc::Receiver<ConfirmationEvent>,
    /// Receives poll failures; full queue drops.
    pub errors: mpsc::Receiver<ChainError>,
    token: CancellationToken,
}

impl ConfirmationRegistration {
    /// Stop watching. No event is delivered afterwards.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// Registry of confirmation pollers.
pub struct ConfirmationNotifier<S> {
    source: Arc<S>,
    cache: Arc<ResultCache>,
    poll_interval: Duration,
    requests: Arc<DashMap<Uuid, CancellationToken>>,
    shutdown: Shutdown,
}

impl<S: ChainSource> ConfirmationNotifier<S> {
    /// Pollers keep `cache` in step with the blocks they see.
    pub fn new(
        source: Arc<S>,
        cache: Arc<ResultCache>,
        poll_interval: Duration,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            source,
            cache,
            poll_interval,
            requests: Arc::new(DashMap::new()),
            shutdown,
        }
    }

    /// Start a poller for `request`.
    ///
    /// The poller stops when `cancel` fires, when the registration is
    /// cancelled, or on shutdown.
    pub fn register(
        &self,
        request: ConfirmationRequest,
        cancel: CancellationToken,
    ) -> ChainResult<ConfirmationRegistration> {
        if self.shutdown.is_triggered() {
            return Err(ChainError::ShuttingDown);
        }

        let id = Uuid::new_v4();
        let token = self.shutdown.child_token();
        let (confirmed_tx, confirmed_rx) = mpsc::channel(1);
        let (errors_tx, errors_rx) = mpsc::channel(1);

        info!(
            request_id = %id,
            txid = %request.txid,
            num_confs = request.num_confs,
            height_hint = request.height_hint,
            script_len = request.script.len(),
            "Registered confirmation request"
        );

        self.requests.insert(id, token.clone());
        let poller = Poller {
            id,
            request,
            source: Arc::clone(&self.source),
            cache: Arc::clone(&self.cache),
            recorded_height: None,
            confirmed_tx,
            errors_tx,
            requests: Arc::clone(&self.requests),
        };
        self.shutdown
            .spawn(poller.run(self.poll_interval, token.clone(), cancel));

        Ok(ConfirmationRegistration {
            id,
            confirmed: confirmed_rx,
            errors: errors_rx,
            token,
        })
    }

    /// Cancel a request by id. Returns `false` if it was not active.
    pub fn cancel(&self, id: &Uuid) -> bool {
        match self.requests.remove(id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, id: &Uuid) -> bool {
        self.requests.contains_key(id)
    }

    pub fn active_requests(&self) -> usize {
        self.requests.len()
    }

    /// Cancel and forget every request.
    pub fn clear(&self) {
        for entry in self.requests.iter() {
            entry.value().cancel();
        }
        self.requests.clear();
    }
}

enum Progress {
    Pending,
    Confirming { confirmations: u32 },
    Satisfied(ConfirmationEvent),
}

struct Poller<S> {
    id: Uuid,
    request: ConfirmationRequest,
    source: Arc<S>,
    cache: Arc<ResultCache>,
    /// Containing height last observed.
    recorded_height: Option<u32>,
    confirmed_tx: mpsc::Sender<ConfirmationEvent>,
    errors_tx: mpsc::Sender<ChainError>,
    requests: Arc<DashMap<Uuid, CancellationToken>>,
}

impl<S: ChainSource> Poller<S> {
    async fn run(mut self, period: Duration, token: CancellationToken, external: CancellationToken) {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = external.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let progress = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = external.cancelled() => break,
                progress = self.tick() => progress,
            };

            match progress {
                Ok(Progress::Satisfied(event)) => {
                    self.requests.remove(&self.id);
                    info!(
                        request_id = %self.id,
                        txid = %event.txid,
                        block_height = event.block_height,
                        confirmations = event.confirmations,
                        "Transaction confirmed"
                    );
                    if self.confirmed_tx.try_send(event).is_ok() {
                        metrics::record_confirmation_delivered();
                    } else {
                        metrics::record_dropped_notification("confirmation");
                    }
                    return;
                }
                Ok(Progress::Confirming { confirmations }) => {
                    debug!(
                        request_id = %self.id,
                        confirmations,
                        target = self.target(),
                        "Transaction confirming"
                    );
                }
                Ok(Progress::Pending) => {
                    debug!(request_id = %self.id, "Transaction pending");
                }
                Err(err) => {
                    warn!(request_id = %self.id, error = %err, "Confirmation poll failed");
                    if self.errors_tx.try_send(err).is_err() {
                        metrics::record_dropped_notification("confirmation_error");
                    }
                }
            }
        }

        self.requests.remove(&self.id);
        debug!(request_id = %self.id, "Confirmation request cancelled");
    }

    fn target(&self) -> u32 {
        self.request.num_confs.max(1)
    }

    async fn tick(&mut self) -> ChainResult<Progress> {
        let txid = self.request.txid;
        let tx = match self.source.transaction(&txid).await {
            Err(err) if err.is_not_found() => return Ok(Progress::Pending),
            other => other.context("fetch transaction status")?,
        };

        let Some(height) = tx.status.confirmed_height() else {
            if let Some(previous) = self.recorded_height.take() {
                self.signal_reorg(previous, None);
            }
            return Ok(Progress::Pending);
        };

        if let Some(previous) = self.recorded_height {
            if previous != height {
                self.signal_reorg(previous, Some(height));
            }
        }
        self.recorded_height = Some(height);
        if let Some(hash) = tx.status.block_hash {
            self.cache.observe_block(height, hash);
        }

        let tip = self
            .source
            .current_height()
            .await
            .context("fetch current height")?;
        let confirmations = tip.saturating_add(1).saturating_sub(height);
        if confirmations < self.target() {
            return Ok(Progress::Confirming { confirmations });
        }

        let mut block_hash = tx.status.block_hash;
        let mut header = None;
        if self.request.include_block {
            let hash = match block_hash {
                Some(hash) => hash,
                None => self
                    .source
                    .block_hash(height)
                    .await
                    .context("fetch confirming block hash")?,
            };
            let block = self
                .source
                .block(&hash)
                .await
                .context("fetch confirming block")?;
            block_hash = Some(hash);
            header = Some(block.header());
        }

        Ok(Progress::Satisfied(ConfirmationEvent {
            txid,
            block_height: height,
            confirmations,
            block_hash,
            header,
            tx_index: None,
        }))
    }

    fn signal_reorg(&self, from: u32, to: Option<u32>) {
        warn!(
            request_id = %self.id,
            txid = %self.request.txid,
            from,
            to = ?to,
            "Confirming block changed"
        );
        metrics::record_reorg();
        self.cache.invalidate(from);
        if let Some(reorg) = &self.request.reorg {
            if reorg.try_send(()).is_err() {
                metrics::record_dropped_notification("reorg");
            }
        }
    }
}
