//! Coin selection, fee estimation and change construction.
//!
//! # Responsibilities
//! - Price a template with a linear P2WPKH size model
//! - Select and lease unspent outputs first-fit, in listing order
//! - Add a change output above the dust threshold
//!
//! # Design Decisions
//! - The fee always assumes one change output, so dropping dust change
//!   only ever overpays
//! - Leases go through a `LeaseBatch`; any failure releases all of them

use std::collections::HashSet;
use std::time::Duration;

use bitcoin::psbt::{self, Psbt};
use bitcoin::{Amount, FeeRate, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Witness};
use tracing::{debug, info};

use crate::wallet::leases::LeaseManager;
use crate::wallet::store::{KeyRing, WalletStore};
use crate::wallet::types::{FundedTransaction, Utxo, WalletError, WalletResult};

/// Estimated virtual size of a P2WPKH input (in vbytes).
const P2WPKH_INPUT_VBYTES: u64 = 68;

/// Estimated virtual size of any output (in vbytes).
const OUTPUT_VBYTES: u64 = 31;

/// Fixed overhead (in vbytes): version, locktime, segwit marker and counts.
const TX_OVERHEAD_VBYTES: u64 = 11;

/// Estimated virtual size of a P2WPKH transaction.
pub fn estimate_vsize(num_inputs: usize, num_outputs: usize) -> u64 {
    TX_OVERHEAD_VBYTES
        + num_inputs as u64 * P2WPKH_INPUT_VBYTES
        + num_outputs as u64 * OUTPUT_VBYTES
}

/// Estimated fee of a P2WPKH transaction at `fee_rate`.
pub fn estimate_fee(num_inputs: usize, num_outputs: usize, fee_rate: FeeRate) -> WalletResult<Amount> {
    fee_rate
        .fee_vb(estimate_vsize(num_inputs, num_outputs))
        .ok_or(WalletError::AmountOverflow)
}

/// Funding knobs taken from the caller and wallet configuration.
#[derive(Debug, Clone, Copy)]
pub struct FundingParams {
    pub min_confs: u32,
    pub fee_rate: FeeRate,
    /// Requested change position; appended when absent or out of range.
    pub change_index: Option<usize>,
    pub lease_duration: Duration,
    pub dust_threshold: Amount,
}

fn checked_sum(values: impl IntoIterator<Item = Amount>) -> WalletResult<Amount> {
    values
        .into_iter()
        .try_fold(Amount::ZERO, |acc, v| acc.checked_add(v))
        .ok_or(WalletError::AmountOverflow)
}

/// Fund `template` from `store`, leasing every selected output.
pub fn fund_transaction(
    store: &dyn WalletStore,
    keys: &dyn KeyRing,
    leases: &LeaseManager,
    params: &FundingParams,
    mut template: Psbt,
) -> WalletResult<FundedTransaction> {
    let tx = &template.unsigned_tx;
    if template.inputs.len() != tx.input.len() || template.outputs.len() != tx.output.len() {
        return Err(WalletError::InvalidTemplate(format!(
            "{} inputs / {} outputs in packet, {} / {} in transaction",
            template.inputs.len(),
            template.outputs.len(),
            tx.input.len(),
            tx.output.len()
        )));
    }

    let outputs_total = checked_sum(tx.output.iter().map(|o| o.value))?;
    let existing_inputs = tx.input.len();
    let spent: HashSet<OutPoint> = tx.input.iter().map(|i| i.previous_output).collect();
    let mut inputs_total = checked_sum(
        template
            .inputs
            .iter()
            .filter_map(|i| i.witness_utxo.as_ref().map(|u| u.value)),
    )?;

    // Outputs plus the change output the estimate always assumes.
    let num_outputs = tx.output.len() + 1;
    let required_for = |selected: usize| -> WalletResult<Amount> {
        let fee = estimate_fee(existing_inputs + selected, num_outputs, params.fee_rate)?;
        outputs_total
            .checked_add(fee)
            .ok_or(WalletError::AmountOverflow)
    };

    let mut batch = leases.batch();
    let mut selected: Vec<Utxo> = Vec::new();
    let mut required = required_for(0)?;

    if inputs_total < required {
        for utxo in store.list_unspent(params.min_confs)? {
            if spent.contains(&utxo.outpoint) {
                continue;
            }
            match batch.lease(utxo.outpoint, params.lease_duration) {
                Ok(()) => {}
                Err(WalletError::AlreadyLeased(_)) => continue,
                Err(e) => return Err(e),
            }

            inputs_total = inputs_total
                .checked_add(utxo.value())
                .ok_or(WalletError::AmountOverflow)?;
            selected.push(utxo);
            required = required_for(selected.len())?;

            if inputs_total >= required {
                break;
            }
        }
    }

    if inputs_total < required {
        debug!(
            need = required.to_sat(),
            have = inputs_total.to_sat(),
            "Funding failed"
        );
        return Err(WalletError::InsufficientFunds {
            need: required,
            have: inputs_total,
        });
    }

    for utxo in &selected {
        template.unsigned_tx.input.push(TxIn {
            previous_output: utxo.outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::default(),
        });
        template.inputs.push(psbt::Input {
            witness_utxo: Some(utxo.txout.clone()),
            ..Default::default()
        });
    }

    let change = inputs_total - required;
    let mut change_index = None;
    if change > params.dust_threshold {
        let script_pubkey = keys.derive_change_script()?;
        let outputs = &mut template.unsigned_tx.output;
        let index = match params.change_index {
            Some(i) if i <= outputs.len() => i,
            _ => outputs.len(),
        };
        outputs.insert(
            index,
            TxOut {
                value: change,
                script_pubkey,
            },
        );
        template.outputs.insert(index, psbt::Output::default());
        change_index = Some(index);
    }

    let final_outputs = checked_sum(template.unsigned_tx.output.iter().map(|o| o.value))?;
    let fee = inputs_total - final_outputs;
    let leased = batch.commit();

    info!(
        inputs = template.unsigned_tx.input.len(),
        selected = selected.len(),
        fee_sat = fee.to_sat(),
        change_sat = change_index.map(|_| change.to_sat()),
        "Funded transaction"
    );

    Ok(FundedTransaction {
        psbt: template,
        change_index,
        fee,
        leased,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::store::{MemoryKeyRing, MemoryStore};
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::{Network, Transaction, Txid};

    fn outpoint(n: u8) -> OutPoint {
        OutPoint::new(Txid::from_byte_array([n; 32]), 0)
    }

    fn template(outputs: &[u64]) -> Psbt {
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![],
            output: outputs
                .iter()
                .map(|v| TxOut {
                    value: Amount::from_sat(*v),
                    script_pubkey: ScriptBuf::new_op_return([0u8; 32]),
                })
                .collect(),
        };
        Psbt::from_unsigned_tx(tx).unwrap()
    }

    fn params(sat_vb: u64) -> FundingParams {
        FundingParams {
            min_confs: 1,
            fee_rate: FeeRate::from_sat_per_vb(sat_vb).unwrap(),
            change_index: None,
            lease_duration: Duration::from_secs(600),
            dust_threshold: Amount::from_sat(546),
        }
    }

    struct Wallet {
        store: MemoryStore,
        keys: MemoryKeyRing,
        leases: LeaseManager,
    }

    fn wallet(values: &[u64]) -> Wallet {
        let store = MemoryStore::new();
        let keys = MemoryKeyRing::new(Network::Regtest);
        for (n, value) in values.iter().enumerate() {
            let script = keys.new_script().unwrap();
            store.add_utxo(
                outpoint(n as u8 + 1),
                TxOut {
                    value: Amount::from_sat(*value),
                    script_pubkey: script,
                },
                6,
            );
        }
        Wallet {
            store,
            keys,
            leases: LeaseManager::new(),
        }
    }

    fn fund(w: &Wallet, p: &FundingParams, t: Psbt) -> WalletResult<FundedTransaction> {
        fund_transaction(&w.store, &w.keys, &w.leases, p, t)
    }

    fn input_total(f: &FundedTransaction) -> u64 {
        f.psbt
            .inputs
            .iter()
            .map(|i| i.witness_utxo.as_ref().unwrap().value.to_sat())
            .sum()
    }

    fn output_total(f: &FundedTransaction) -> u64 {
        f.psbt.unsigned_tx.output.iter().map(|o| o.value.to_sat()).sum()
    }

    #[test]
    fn test_estimate_fee() {
        // 1 input, 2 outputs: 11 + 68 + 62 = 141 vbytes.
        let fee = estimate_fee(1, 2, FeeRate::from_sat_per_vb(1).unwrap()).unwrap();
        assert_eq!(fee, Amount::from_sat(141));
        let fee = estimate_fee(2, 2, FeeRate::from_sat_per_vb(10).unwrap()).unwrap();
        assert_eq!(fee, Amount::from_sat(2_090));
    }

    #[tokio::test]
    async fn test_first_fit_in_listing_order_with_change() {
        let w = wallet(&[30_000, 50_000, 100_000]);
        let funded = fund(&w, &params(2), template(&[60_000])).unwrap();

        // 30k + 50k covers 60k + fee(2 in, 2 out) = 60k + 2 * 209.
        let spent: Vec<_> = funded
            .psbt
            .unsigned_tx
            .input
            .iter()
            .map(|i| i.previous_output)
            .collect();
        assert_eq!(spent, vec![outpoint(1), outpoint(2)]);
        assert_eq!(funded.change_index, Some(1));

        let change = funded.psbt.unsigned_tx.output[1].value.to_sat();
        assert_eq!(change, 80_000 - 60_000 - 418);
        assert_eq!(funded.fee.to_sat(), 418);
        assert_eq!(input_total(&funded), output_total(&funded) + funded.fee.to_sat());
        assert_eq!(funded.psbt.outputs.len(), 2);
        assert!(w.keys.private_key_for_script(&funded.psbt.unsigned_tx.output[1].script_pubkey).is_some());

        assert_eq!(funded.leased, vec![outpoint(1), outpoint(2)]);
        assert!(w.leases.is_leased(&outpoint(1)));
        assert!(!w.leases.is_leased(&outpoint(3)));
    }

    #[tokio::test]
    async fn test_change_position_requested() {
        let w = wallet(&[100_000]);
        let mut p = params(1);
        p.change_index = Some(0);
        let funded = fund(&w, &p, template(&[10_000, 20_000])).unwrap();
        assert_eq!(funded.change_index, Some(0));
        assert_eq!(funded.psbt.unsigned_tx.output[1].value.to_sat(), 10_000);

        // Out of range falls back to appending.
        let w = wallet(&[100_000]);
        p.change_index = Some(9);
        let funded = fund(&w, &p, template(&[10_000])).unwrap();
        assert_eq!(funded.change_index, Some(1));
    }

    #[tokio::test]
    async fn test_dust_change_is_dropped() {
        // 1 in, 2 out at 1 sat/vB = 141 sat fee; leftover 500 is dust.
        let w = wallet(&[10_641]);
        let funded = fund(&w, &params(1), template(&[10_000])).unwrap();
        assert_eq!(funded.change_index, None);
        assert_eq!(funded.psbt.unsigned_tx.output.len(), 1);
        assert_eq!(funded.fee.to_sat(), 641);

        // Exactly at the threshold is still dropped.
        let w = wallet(&[10_687]);
        let funded = fund(&w, &params(1), template(&[10_000])).unwrap();
        assert_eq!(funded.change_index, None);

        let w = wallet(&[10_688]);
        let funded = fund(&w, &params(1), template(&[10_000])).unwrap();
        assert_eq!(funded.change_index, Some(1));
        assert_eq!(funded.psbt.unsigned_tx.output[1].value.to_sat(), 547);
    }

    #[tokio::test]
    async fn test_insufficient_funds_releases_leases() {
        let w = wallet(&[1_000, 2_000]);
        let err = fund(&w, &params(1), template(&[50_000])).unwrap_err();
        match err {
            WalletError::InsufficientFunds { need, have } => {
                assert_eq!(have.to_sat(), 3_000);
                assert!(need.to_sat() > 50_000);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(w.leases.leased_outpoints().is_empty());
    }

    #[tokio::test]
    async fn test_leased_outputs_are_skipped() {
        let w = wallet(&[40_000, 40_000]);
        w.leases.lease(outpoint(1), Duration::from_secs(600)).unwrap();

        let funded = fund(&w, &params(1), template(&[10_000])).unwrap();
        assert_eq!(funded.psbt.unsigned_tx.input[0].previous_output, outpoint(2));

        // Everything is now leased.
        let err = fund(&w, &params(1), template(&[10_000])).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn test_min_confs_floor() {
        let w = wallet(&[40_000]);
        let mut p = params(1);
        p.min_confs = 7;
        assert!(matches!(
            fund(&w, &p, template(&[10_000])),
            Err(WalletError::InsufficientFunds { .. })
        ));
    }

    #[tokio::test]
    async fn test_template_inputs_count_toward_total() {
        let w = wallet(&[40_000]);
        let mut t = template(&[10_000]);
        t.unsigned_tx.input.push(TxIn {
            previous_output: outpoint(200),
            ..Default::default()
        });
        t.inputs.push(psbt::Input {
            witness_utxo: Some(TxOut {
                value: Amount::from_sat(20_000),
                script_pubkey: ScriptBuf::new(),
            }),
            ..Default::default()
        });

        let funded = fund(&w, &params(1), t).unwrap();
        assert_eq!(funded.psbt.unsigned_tx.input.len(), 1);
        assert!(funded.leased.is_empty());
        assert_eq!(input_total(&funded), output_total(&funded) + funded.fee.to_sat());
    }

    #[tokio::test]
    async fn test_mismatched_template_rejected() {
        let w = wallet(&[40_000]);
        let mut t = template(&[10_000]);
        t.outputs.clear();
        assert!(matches!(
            fund(&w, &params(1), t),
            Err(WalletError::InvalidTemplate(_))
        ));
    }
}
