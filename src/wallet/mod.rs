//! Transaction funding and signing subsystem.
//!
//! # Data Flow
//! ```text
//! Unsigned template (PSBT)
//!     → funding.rs (select store outputs first-fit, price, add change)
//!     → leases.rs (exclusive lease per selected output)
//!     → signing.rs (BIP143 signatures, then witness finalization)
//!     → anchor.rs (facade; fee context from the chain bridge)
//! ```
//!
//! # Design Decisions
//! - Key material and the unspent listing sit behind `store.rs` traits
//! - Signing reports per input instead of failing the packet

pub mod anchor;
pub mod funding;
pub mod leases;
pub mod signing;
pub mod store;
pub mod types;

pub use anchor::WalletAnchor;
pub use funding::{estimate_fee, estimate_vsize, fund_transaction, FundingParams};
pub use leases::{LeaseBatch, LeaseManager};
pub use signing::{finalize_input, finalize_inputs, sign_inputs};
pub use store::{KeyRing, MemoryKeyRing, MemoryStore, WalletStore};
pub use types::{FundedTransaction, SigningReport, Utxo, WalletError, WalletResult};
