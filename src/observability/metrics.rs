//! Metrics collection.
//!
//! # Metrics
//! - `anchor_chain_requests_total` (counter): chain-data requests by endpoint, outcome
//! - `anchor_chain_retries_total` (counter): retried attempts by reason
//! - `anchor_cache_lookups_total` (counter): cache lookups by kind, hit/miss
//! - `anchor_active_leases` (gauge): unexpired UTXO leases
//! - `anchor_confirmations_delivered_total` (counter)
//! - `anchor_reorgs_detected_total` (counter)
//! - `anchor_epoch_height` (gauge): last broadcast height
//! - `anchor_notifications_dropped_total` (counter): full subscriber queues by stream
//!
//! Recording goes through the `metrics` facade; installing an exporter is
//! left to the embedding application.

use metrics::{counter, gauge};

/// Record the outcome of a single chain-data request attempt.
pub fn record_chain_request(endpoint: &'static str, outcome: &'static str) {
    counter!(
        "anchor_chain_requests_total",
        "endpoint" => endpoint,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a retried attempt.
pub fn record_retry(reason: &'static str) {
    counter!("anchor_chain_retries_total", "reason" => reason).increment(1);
}

/// Record a cache lookup.
pub fn record_cache_lookup(kind: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("anchor_cache_lookups_total", "kind" => kind, "result" => result).increment(1);
}

/// Record the number of unexpired leases.
pub fn record_active_leases(count: usize) {
    gauge!("anchor_active_leases").set(count as f64);
}

/// Record a delivered confirmation event.
pub fn record_confirmation_delivered() {
    counter!("anchor_confirmations_delivered_total").increment(1);
}

/// Record a detected reorg.
pub fn record_reorg() {
    counter!("anchor_reorgs_detected_total").increment(1);
}

/// Record a broadcast epoch height.
pub fn record_epoch_height(height: u32) {
    gauge!("anchor_epoch_height").set(height as f64);
}

/// Record a notification dropped because the subscriber queue was full.
pub fn record_dropped_notification(stream: &'static str) {
    counter!("anchor_notifications_dropped_total", "stream" => stream).increment(1);
}
