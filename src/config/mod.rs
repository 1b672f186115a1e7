//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AnchorConfig (validated, immutable)
//!     → sections handed to client, bridge and wallet
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AnchorConfig, BridgeConfig, ClientConfig, Network, ObservabilityConfig, WalletConfig,
};
pub use validation::{validate_config, ValidationError};
