//! Chain observation and transaction funding over an Esplora-style REST
//! service.

pub mod chain;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod wallet;

pub use chain::{ChainBridge, ChainClient, ChainError, ChainSource};
pub use config::schema::AnchorConfig;
pub use lifecycle::Shutdown;
pub use wallet::{WalletAnchor, WalletError};
