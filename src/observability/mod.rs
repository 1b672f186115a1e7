//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! client / notifiers / wallet produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Whatever metrics exporter the embedding application installs
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON optional) for machine parsing
//! - Metrics are cheap (facade no-ops without a recorder)

pub mod logging;
pub mod metrics;
