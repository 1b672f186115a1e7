//! Retry logic.
//!
//! # Responsibilities
//! - Classify failures as retryable or terminal
//! - Compute the wait before the next attempt
//!
//! # Design Decisions
//! - Only transport errors, 429 and 500/502/503/504 are retried
//! - A request runs at most `max_retries + 1` times
//! - Not-found and other statuses fail on the first attempt

use std::time::Duration;

use super::backoff::retry_delay;

/// Why a failed attempt is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Connection, timeout or body read failure.
    Transport,
    /// Server answered 429.
    RateLimited,
    /// Server answered 500, 502, 503 or 504.
    ServerError,
}

impl RetryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryReason::Transport => "transport",
            RetryReason::RateLimited => "rate_limited",
            RetryReason::ServerError => "server_error",
        }
    }
}

/// Implemented by errors that know whether they are transient.
pub trait Retryable {
    /// `None` means the failure is terminal.
    fn retry_reason(&self) -> Option<RetryReason>;
}

/// Classify an HTTP status for retry purposes.
///
/// Success statuses and terminal failures both return `None`.
pub fn classify_status(status: u16) -> Option<RetryReason> {
    match status {
        429 => Some(RetryReason::RateLimited),
        500 | 502 | 503 | 504 => Some(RetryReason::ServerError),
        _ => None,
    }
}

/// Bounded retry policy with linear backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Total attempts a request may make.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before retrying after the zero-based `attempt` failed with `err`.
    ///
    /// Returns `None` when the error is terminal or the budget is spent.
    pub fn next_delay<E: Retryable>(&self, attempt: u32, err: &E) -> Option<(Duration, RetryReason)> {
        let reason = err.retry_reason()?;
        if attempt >= self.max_retries {
            return None;
        }
        let rate_limited = reason == RetryReason::RateLimited;
        Some((retry_delay(self.base_delay, attempt, rate_limited), reason))
    }
}
