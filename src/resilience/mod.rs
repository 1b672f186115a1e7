//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to the chain-data service:
//!     → rate_limit.rs (wait for a token)
//!     → On failure: retries.rs (check if retryable)
//!     → backoff.rs (linear delay, doubled for 429)
//! ```
//!
//! # Design Decisions
//! - One limiter per client, shared by every call and every retry
//! - Waiting is cancel-safe: dropping the future abandons the wait

pub mod backoff;
pub mod rate_limit;
pub mod retries;

pub use rate_limit::RateLimiter;
pub use retries::{RetryPolicy, RetryReason, Retryable};
