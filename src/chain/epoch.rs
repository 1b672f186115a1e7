//! Block epoch notifications.
//!
//! One shared poller fetches the tip height every interval and offers each
//! strictly higher height to every subscriber. Delivery is at-most-once and
//! latest-wins: a subscriber whose queue is full misses that height.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::types::{ChainError, ChainResult, ResultExt};
use crate::chain::ChainSource;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// Handle returned to an epoch subscriber.
#[derive(Debug)]
pub struct EpochRegistration {
    pub heights: mpsc::Receiver<u32>,
    pub errors: mpsc::Receiver<ChainError>,
}

struct Subscriber {
    heights: mpsc::Sender<u32>,
    errors: mpsc::Sender<ChainError>,
    cancel: CancellationToken,
}

impl Subscriber {
    fn is_gone(&self) -> bool {
        self.cancel.is_cancelled() || self.heights.is_closed()
    }
}

/// Shared new-height poller.
pub struct EpochNotifier<S> {
    source: Arc<S>,
    poll_interval: Duration,
    queue_depth: usize,
    subscribers: RwLock<Vec<Subscriber>>,
    last_height: Mutex<Option<u32>>,
}

impl<S: ChainSource> EpochNotifier<S> {
    pub fn new(source: Arc<S>, poll_interval: Duration, queue_depth: usize) -> Self {
        Self {
            source,
            poll_interval,
            queue_depth: queue_depth.max(1),
            subscribers: RwLock::new(Vec::new()),
            last_height: Mutex::new(None),
        }
    }

    /// Add a subscriber. It is dropped once `cancel` fires or its height
    /// receiver is closed.
    pub fn register(&self, cancel: CancellationToken) -> EpochRegistration {
        let (heights_tx, heights_rx) = mpsc::channel(self.queue_depth);
        let (errors_tx, errors_rx) = mpsc::channel(1);

        let mut subscribers = self.subscribers.write().expect("epoch subscribers lock poisoned");
        subscribers.push(Subscriber {
            heights: heights_tx,
            errors: errors_tx,
            cancel,
        });
        debug!(subscribers = subscribers.len(), "Registered epoch subscriber");

        EpochRegistration {
            heights: heights_rx,
            errors: errors_rx,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("epoch subscribers lock poisoned")
            .len()
    }

    /// Last height offered to subscribers.
    pub fn last_height(&self) -> Option<u32> {
        *self.last_height.lock().expect("epoch height lock poisoned")
    }

    /// Drop every subscriber, closing their queues.
    pub fn clear(&self) {
        self.subscribers
            .write()
            .expect("epoch subscribers lock poisoned")
            .clear();
    }

    /// Spawn the poller on the shutdown tracker.
    pub fn start(self: &Arc<Self>, shutdown: &Shutdown) {
        shutdown.spawn(Arc::clone(self).run(shutdown.token()));
    }

    /// Poll until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_ms = self.poll_interval.as_millis() as u64,
            "Epoch notifier starting"
        );

        let period = self.poll_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.fetch_height() => result,
            };

            match result {
                Ok(height) => self.offer_height(height),
                Err(err) => self.offer_error(err),
            }
        }

        info!("Epoch notifier received shutdown signal, exiting loop");
    }

    async fn fetch_height(&self) -> ChainResult<u32> {
        self.source
            .current_height()
            .await
            .context("fetch current height")
    }

    fn prune(&self) {
        let mut subscribers = self.subscribers.write().expect("epoch subscribers lock poisoned");
        let before = subscribers.len();
        subscribers.retain(|s| !s.is_gone());
        if subscribers.len() != before {
            debug!(removed = before - subscribers.len(), "Pruned epoch subscribers");
        }
    }

    /// Offer `height` if it is above the last broadcast height.
    pub(crate) fn offer_height(&self, height: u32) {
        {
            let mut last = self.last_height.lock().expect("epoch height lock poisoned");
            if last.is_some_and(|l| height <= l) {
                return;
            }
            *last = Some(height);
        }

        self.prune();
        debug!(height, "New block epoch");
        metrics::record_epoch_height(height);

        let subscribers = self.subscribers.read().expect("epoch subscribers lock poisoned");
        for sub in subscribers.iter() {
            if sub.heights.try_send(height).is_err() {
                metrics::record_dropped_notification("epoch");
            }
        }
    }

    pub(crate) fn offer_error(&self, err: ChainError) {
        warn!(error = %err, "Epoch poll failed");
        self.prune();

        let subscribers = self.subscribers.read().expect("epoch subscribers lock poisoned");
        for sub in subscribers.iter() {
            if sub.errors.try_send(err.clone()).is_err() {
                metrics::record_dropped_notification("epoch_error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;

    const POLL: Duration = Duration::from_secs(30);

    fn setup(height: u32, depth: usize) -> (Arc<MockChain>, Arc<EpochNotifier<MockChain>>) {
        let chain = Arc::new(MockChain::new(height));
        let notifier = Arc::new(EpochNotifier::new(Arc::clone(&chain), POLL, depth));
        (chain, notifier)
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_heights_fan_out() {
        let (chain, notifier) = setup(100, 10);
        let shutdown = Shutdown::new();
        let mut a = notifier.register(CancellationToken::new());
        let mut b = notifier.register(CancellationToken::new());
        notifier.start(&shutdown);

        assert_eq!(a.heights.recv().await, Some(100));
        assert_eq!(b.heights.recv().await, Some(100));

        // Same height is not repeated.
        time::sleep(POLL).await;
        assert!(a.heights.try_recv().is_err());

        chain.set_height(101);
        assert_eq!(a.heights.recv().await, Some(101));
        assert_eq!(b.heights.recv().await, Some(101));
        assert_eq!(notifier.last_height(), Some(101));

        shutdown.drain().await;
    }

    #[tokio::test]
    async fn test_lower_height_ignored() {
        let (_chain, notifier) = setup(0, 10);
        let mut sub = notifier.register(CancellationToken::new());

        notifier.offer_height(50);
        notifier.offer_height(49);
        notifier.offer_height(50);
        notifier.offer_height(51);

        assert_eq!(sub.heights.recv().await, Some(50));
        assert_eq!(sub.heights.recv().await, Some(51));
        assert!(sub.heights.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_skips_without_blocking_others() {
        let (_chain, notifier) = setup(0, 1);
        let mut slow = notifier.register(CancellationToken::new());
        let mut fast = notifier.register(CancellationToken::new());

        notifier.offer_height(1);
        assert_eq!(fast.heights.recv().await, Some(1));
        notifier.offer_height(2);
        assert_eq!(fast.heights.recv().await, Some(2));

        // Slow subscriber kept the first height and missed the second.
        assert_eq!(slow.heights.recv().await, Some(1));
        assert!(slow.heights.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_errors_fan_out() {
        let (_chain, notifier) = setup(0, 10);
        let mut a = notifier.register(CancellationToken::new());
        let mut b = notifier.register(CancellationToken::new());

        notifier.offer_error(ChainError::RateLimited);
        notifier.offer_error(ChainError::RateLimited);

        assert!(matches!(a.errors.recv().await, Some(ChainError::RateLimited)));
        assert!(matches!(b.errors.recv().await, Some(ChainError::RateLimited)));
        // Error queue holds one.
        assert!(a.errors.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_keeps_loop_alive() {
        let (chain, notifier) = setup(7, 10);
        let shutdown = Shutdown::new();
        chain.fail_height(Some(ChainError::Http("connection refused".into())));
        let mut sub = notifier.register(CancellationToken::new());
        notifier.start(&shutdown);

        let err = sub.errors.recv().await.unwrap();
        assert!(err.is_transient());

        chain.fail_height(None);
        assert_eq!(sub.heights.recv().await, Some(7));
        shutdown.drain().await;
    }

    #[tokio::test]
    async fn test_cancelled_and_dropped_subscribers_pruned() {
        let (_chain, notifier) = setup(0, 10);
        let cancel = CancellationToken::new();
        let _cancelled = notifier.register(cancel.clone());
        let dropped = notifier.register(CancellationToken::new());
        let mut kept = notifier.register(CancellationToken::new());
        assert_eq!(notifier.subscriber_count(), 3);

        cancel.cancel();
        drop(dropped);
        notifier.offer_height(1);

        assert_eq!(notifier.subscriber_count(), 1);
        assert_eq!(kept.heights.recv().await, Some(1));
    }
}
