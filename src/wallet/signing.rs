//! P2WPKH input signing and finalization over a PSBT.
//!
//! Signing never fails the whole packet. Each input ends up in exactly one
//! of the signed, skipped or failed lists of the returned [`SigningReport`],
//! so a caller holding only some of the keys can sign its share and pass the
//! packet on.

use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::psbt::{self, Psbt};
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{CompressedPublicKey, PrivateKey, PublicKey, ScriptBuf, Transaction, TxOut, Witness};
use tracing::{debug, warn};

use crate::wallet::store::KeyRing;
use crate::wallet::types::{SigningReport, WalletError, WalletResult};

/// Sign every P2WPKH input whose key `keys` holds and write its witness.
///
/// Inputs whose script `keys` has no key for are skipped whatever their
/// type. A held key on a non-P2WPKH script fails that input only.
pub fn sign_inputs(psbt: &mut Psbt, keys: &dyn KeyRing) -> WalletResult<SigningReport> {
    let secp = Secp256k1::new();
    let mut report = SigningReport::default();
    let mut cache = SighashCache::new(&psbt.unsigned_tx);

    for (index, input) in psbt.inputs.iter_mut().enumerate() {
        if input.final_script_witness.is_some() {
            report.skipped.push(index);
            continue;
        }
        let Some(prevout) = input.witness_utxo.clone() else {
            report.skipped.push(index);
            continue;
        };
        let Some(key) = keys.private_key_for_script(&prevout.script_pubkey) else {
            report.skipped.push(index);
            continue;
        };
        if !prevout.script_pubkey.is_p2wpkh() {
            report.failed.push((index, WalletError::UnsupportedScript { index }));
            continue;
        }

        match sign_p2wpkh(&secp, &mut cache, index, &prevout, &key) {
            Ok((public, signature)) => {
                input.partial_sigs.insert(public, signature);
                report.signed.push(index);
            }
            Err(err) => {
                warn!(index, error = %err, "Failed to sign input");
                report.failed.push((index, err));
            }
        }
    }

    for &index in &report.signed {
        match finalize_input(psbt, index) {
            Ok(()) => report.finalized.push(index),
            Err(err) => warn!(index, error = %err, "Signed input not finalized"),
        }
    }

    debug!(
        signed = report.signed.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Signed inputs"
    );
    Ok(report)
}

fn sign_p2wpkh(
    secp: &Secp256k1<All>,
    cache: &mut SighashCache<&Transaction>,
    index: usize,
    prevout: &TxOut,
    key: &PrivateKey,
) -> WalletResult<(PublicKey, ecdsa::Signature)> {
    let public = key.public_key(secp);
    let compressed = CompressedPublicKey::from_private_key(secp, key)
        .map_err(|e| WalletError::Signing(e.to_string()))?;
    if ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash()) != prevout.script_pubkey {
        return Err(WalletError::Signing(format!(
            "input {index}: key does not match script"
        )));
    }

    let sighash = cache
        .p2wpkh_signature_hash(
            index,
            &prevout.script_pubkey,
            prevout.value,
            EcdsaSighashType::All,
        )
        .map_err(|e| WalletError::Signing(format!("sighash computation failed: {e}")))?;

    let msg = Message::from_digest(sighash.to_byte_array());
    let signature = secp.sign_ecdsa(&msg, &key.inner);

    Ok((
        public,
        ecdsa::Signature {
            signature,
            sighash_type: EcdsaSighashType::All,
        },
    ))
}

/// Move the single partial signature of a P2WPKH input into its witness.
pub fn finalize_input(psbt: &mut Psbt, index: usize) -> WalletResult<()> {
    let input = psbt
        .inputs
        .get_mut(index)
        .ok_or_else(|| WalletError::Finalize {
            index,
            reason: "no such input".into(),
        })?;

    if input.final_script_witness.is_some() {
        return Ok(());
    }
    let prevout = input
        .witness_utxo
        .as_ref()
        .ok_or(WalletError::MissingPrevout { index })?;
    if !prevout.script_pubkey.is_p2wpkh() {
        return Err(WalletError::UnsupportedScript { index });
    }

    let (public, signature) = match input.partial_sigs.len() {
        1 => input
            .partial_sigs
            .iter()
            .next()
            .map(|(pk, sig)| (*pk, *sig))
            .ok_or_else(|| WalletError::Finalize {
                index,
                reason: "missing signature".into(),
            })?,
        n => {
            return Err(WalletError::Finalize {
                index,
                reason: format!("expected one signature, found {n}"),
            })
        }
    };

    // DER signature with sighash byte, then the compressed key.
    let mut sig_bytes = signature.signature.serialize_der().to_vec();
    sig_bytes.push(signature.sighash_type as u8);
    let mut witness = Witness::new();
    witness.push(&sig_bytes);
    witness.push(public.inner.serialize());

    *input = psbt::Input {
        witness_utxo: input.witness_utxo.take(),
        non_witness_utxo: input.non_witness_utxo.take(),
        final_script_witness: Some(witness),
        unknown: std::mem::take(&mut input.unknown),
        proprietary: std::mem::take(&mut input.proprietary),
        ..Default::default()
    };
    Ok(())
}

/// Finalize every input that can be. Returns the finalized indices and
/// the failures.
pub fn finalize_inputs(psbt: &mut Psbt) -> (Vec<usize>, Vec<(usize, WalletError)>) {
    let mut finalized = Vec::new();
    let mut failed = Vec::new();
    for index in 0..psbt.inputs.len() {
        match finalize_input(psbt, index) {
            Ok(()) => finalized.push(index),
            Err(err) => failed.push((index, err)),
        }
    }
    (finalized, failed)
}
