//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the anchor.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the chain anchor.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AnchorConfig {
    /// Chain-data REST client settings.
    pub client: ClientConfig,

    /// Polling, cache and notification settings.
    pub bridge: BridgeConfig,

    /// Funding and signing settings.
    pub wallet: WalletConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Chain-data client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the Esplora-style REST API (no trailing slash needed).
    pub base_url: String,

    /// Token bucket refill rate.
    pub requests_per_second: u32,

    /// Token bucket capacity. A burst of 1 spaces requests evenly.
    pub burst_size: u32,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Retries after the first attempt.
    pub retry_attempts: u32,

    /// Base delay for linear backoff in milliseconds.
    pub retry_delay_ms: u64,
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://mempool.space/api".to_string(),
            requests_per_second: 10,
            burst_size: 1,
            timeout_secs: 30,
            retry_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Chain bridge configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Poll interval for confirmation and epoch pollers, in milliseconds.
    pub poll_interval_ms: u64,

    /// Maximum cached block hashes.
    pub hash_cache_capacity: usize,

    /// Maximum cached block timestamps.
    pub timestamp_cache_capacity: usize,

    /// Cache entry lifetime in seconds.
    pub cache_ttl_secs: u64,

    /// Queue depth of each epoch subscriber's height output.
    pub epoch_queue_depth: usize,
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            hash_cache_capacity: 100,
            timestamp_cache_capacity: 1000,
            cache_ttl_secs: 60,
            epoch_queue_depth: 10,
        }
    }
}

/// Bitcoin network the wallet operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    #[default]
    Testnet,
    Signet,
    Regtest,
}

impl Network {
    /// Convert to bitcoin crate network type.
    pub fn to_bitcoin_network(self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Signet => bitcoin::Network::Signet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }
}

/// Wallet funding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Network used when rendering change addresses.
    pub network: Network,

    /// Minimum confirmations for coin selection.
    pub min_confs: u32,

    /// How long a selected output stays leased, in seconds.
    pub lease_duration_secs: u64,

    /// Change at or below this many sats is left to the fee.
    pub dust_threshold_sat: u64,
}

impl WalletConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            min_confs: 1,
            lease_duration_secs: 600,
            dust_threshold_sat: 546,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON-formatted log lines.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
