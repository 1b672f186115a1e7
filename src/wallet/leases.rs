//! Time-bounded exclusive leases over unspent outputs.
//!
//! # Responsibilities
//! - Keep two funding calls from selecting the same output
//! - Expire leases lazily at query time
//! - Roll back partially taken leases when funding fails
//!
//! # Design Decisions
//! - Check and install happen under one map entry lock
//! - `release` removes any present entry, expired or not
//! - Sweeping only bounds memory; correctness never depends on it

use std::time::Duration;

use bitcoin::OutPoint;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::wallet::types::{WalletError, WalletResult};

/// Lease table keyed by outpoint.
#[derive(Debug, Default)]
pub struct LeaseManager {
    leases: DashMap<OutPoint, Instant>,
}

impl LeaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease `outpoint` for `duration`. Returns the expiry.
    pub fn lease(&self, outpoint: OutPoint, duration: Duration) -> WalletResult<Instant> {
        let now = Instant::now();
        let expiry = now + duration;

        match self.leases.entry(outpoint) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    return Err(WalletError::AlreadyLeased(outpoint));
                }
                entry.insert(expiry);
            }
            Entry::Vacant(entry) => {
                entry.insert(expiry);
            }
        }

        tracing::debug!(%outpoint, secs = duration.as_secs(), "Leased output");
        metrics::record_active_leases(self.leases.len());
        Ok(expiry)
    }

    /// Drop the lease on `outpoint`.
    pub fn release(&self, outpoint: &OutPoint) -> WalletResult<()> {
        self.leases
            .remove(outpoint)
            .ok_or(WalletError::NotLeased(*outpoint))?;

        tracing::debug!(%outpoint, "Released output");
        metrics::record_active_leases(self.leases.len());
        Ok(())
    }

    /// True only for a present, unexpired lease.
    pub fn is_leased(&self, outpoint: &OutPoint) -> bool {
        self.leases
            .get(outpoint)
            .is_some_and(|expiry| *expiry > Instant::now())
    }

    /// Unexpired leases with their expiry.
    pub fn leased_outpoints(&self) -> Vec<(OutPoint, Instant)> {
        let now = Instant::now();
        self.leases
            .iter()
            .filter(|e| *e.value() > now)
            .map(|e| (*e.key(), *e.value()))
            .collect()
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.leases.len();
        self.leases.retain(|_, expiry| *expiry > now);
        let removed = before.saturating_sub(self.leases.len());

        metrics::record_active_leases(self.leases.len());
        removed
    }

    /// Start a batch that releases everything it leased unless committed.
    pub fn batch(&self) -> LeaseBatch<'_> {
        LeaseBatch {
            manager: self,
            outpoints: Vec::new(),
            committed: false,
        }
    }
}

/// Leases taken by one funding attempt.
pub struct LeaseBatch<'a> {
    manager: &'a LeaseManager,
    outpoints: Vec<OutPoint>,
    committed: bool,
}

impl LeaseBatch<'_> {
    /// Lease `outpoint` and remember it for rollback.
    pub fn lease(&mut self, outpoint: OutPoint, duration: Duration) -> WalletResult<()> {
        self.manager.lease(outpoint, duration)?;
        self.outpoints.push(outpoint);
        Ok(())
    }

    pub fn outpoints(&self) -> &[OutPoint] {
        &self.outpoints
    }

    /// Keep the leases.
    pub fn commit(mut self) -> Vec<OutPoint> {
        self.committed = true;
        std::mem::take(&mut self.outpoints)
    }
}

impl Drop for LeaseBatch<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for outpoint in &self.outpoints {
            let _ = self.manager.release(outpoint);
        }
        if !self.outpoints.is_empty() {
            tracing::debug!(count = self.outpoints.len(), "Rolled back leases");
        }
    }
}
