//! Linear backoff between retry attempts.

use std::time::Duration;

/// Delay to wait after the zero-based `attempt` failed.
///
/// Grows linearly with the attempt number. Rate-limited responses wait twice
/// as long.
pub fn retry_delay(base: Duration, attempt: u32, rate_limited: bool) -> Duration {
    let factor = attempt.saturating_add(1);
    let delay = base.saturating_mul(factor);
    if rate_limited {
        delay.saturating_mul(2)
    } else {
        delay
    }
}
