//! Wallet types and error definitions.

use bitcoin::psbt::Psbt;
use bitcoin::{Amount, OutPoint, TxOut};
use thiserror::Error;

use crate::chain::ChainError;

/// Errors that can occur while funding or signing transactions.
#[derive(Debug, Error)]
pub enum WalletError {
    /// Spendable outputs do not cover outputs plus fee.
    #[error("Insufficient funds: need {} sat, have {} sat", .need.to_sat(), .have.to_sat())]
    InsufficientFunds { need: Amount, have: Amount },

    /// An unexpired lease already exists.
    #[error("Output {0} is already leased")]
    AlreadyLeased(OutPoint),

    /// No lease entry exists.
    #[error("Output {0} is not leased")]
    NotLeased(OutPoint),

    /// Input spends a script type the signer does not handle.
    #[error("Input {index}: unsupported script type")]
    UnsupportedScript { index: usize },

    /// Input carries no previous output.
    #[error("Input {index}: missing previous output")]
    MissingPrevout { index: usize },

    /// Signature hash or key handling failed.
    #[error("Signing error: {0}")]
    Signing(String),

    /// Input could not be finalized.
    #[error("Input {index}: cannot finalize: {reason}")]
    Finalize { index: usize, reason: String },

    /// Template transaction is malformed.
    #[error("Invalid transaction template: {0}")]
    InvalidTemplate(String),

    /// Amount arithmetic overflowed.
    #[error("Amount overflow")]
    AmountOverflow,

    /// Key or unspent-output store failed.
    #[error("Wallet store error: {0}")]
    Store(String),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Result type for wallet operations.
pub type WalletResult<T> = Result<T, WalletError>;

/// A spendable output held by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub txout: TxOut,
    pub confirmations: u32,
}

impl Utxo {
    pub fn value(&self) -> Amount {
        self.txout.value
    }
}

/// Result of funding a template.
#[derive(Debug, Clone)]
pub struct FundedTransaction {
    /// Funded packet. Every input carries its `witness_utxo`.
    pub psbt: Psbt,
    /// Position of the change output, if one was added.
    pub change_index: Option<usize>,
    /// Inputs minus outputs.
    pub fee: Amount,
    /// Outpoints leased for this transaction.
    pub leased: Vec<OutPoint>,
}

/// Per-input outcome of a signing pass.
#[derive(Debug, Default)]
pub struct SigningReport {
    /// Inputs that received a signature.
    pub signed: Vec<usize>,
    /// Inputs without a previous output, without a held key, or already final.
    pub skipped: Vec<usize>,
    /// Inputs that could not be signed.
    pub failed: Vec<(usize, WalletError)>,
    /// Inputs finalized afterwards.
    pub finalized: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WalletError::InsufficientFunds {
            need: Amount::from_sat(10_000),
            have: Amount::from_sat(2_500),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: need 10000 sat, have 2500 sat"
        );

        let err: WalletError = ChainError::NotFound.into();
        assert_eq!(err.to_string(), "Not found");
    }
}
