//! Contracts for the wallet's key material and unspent-output listing.
//!
//! The persistent store and key derivation live outside this crate. The
//! in-memory implementations here back tests and simple embeddings.

use std::collections::HashMap;
use std::sync::RwLock;

use bitcoin::secp256k1::{rand, Secp256k1, SecretKey};
use bitcoin::{CompressedPublicKey, Network, OutPoint, PrivateKey, Script, ScriptBuf, TxOut};

use crate::wallet::types::{Utxo, WalletError, WalletResult};

/// Source of the wallet's spendable outputs.
pub trait WalletStore: Send + Sync {
    /// Unspent outputs with at least `min_confs` confirmations, in the
    /// store's listing order.
    fn list_unspent(&self, min_confs: u32) -> WalletResult<Vec<Utxo>>;
}

/// Source of signing keys and fresh change scripts.
pub trait KeyRing: Send + Sync {
    /// Private key controlling `script`, if held.
    fn private_key_for_script(&self, script: &Script) -> Option<PrivateKey>;

    /// A new P2WPKH change script.
    fn derive_change_script(&self) -> WalletResult<ScriptBuf>;
}

/// `WalletStore` over a vector.
#[derive(Debug, Default)]
pub struct MemoryStore {
    utxos: RwLock<Vec<Utxo>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_utxo(&self, outpoint: OutPoint, txout: TxOut, confirmations: u32) {
        self.utxos
            .write()
            .expect("utxo store lock poisoned")
            .push(Utxo {
                outpoint,
                txout,
                confirmations,
            });
    }

    /// Forget a spent output. Returns `false` if it was unknown.
    pub fn remove_utxo(&self, outpoint: &OutPoint) -> bool {
        let mut utxos = self.utxos.write().expect("utxo store lock poisoned");
        let before = utxos.len();
        utxos.retain(|u| u.outpoint != *outpoint);
        utxos.len() != before
    }
}

impl WalletStore for MemoryStore {
    fn list_unspent(&self, min_confs: u32) -> WalletResult<Vec<Utxo>> {
        let utxos = self
            .utxos
            .read()
            .map_err(|e| WalletError::Store(e.to_string()))?;
        Ok(utxos
            .iter()
            .filter(|u| u.confirmations >= min_confs)
            .cloned()
            .collect())
    }
}

/// `KeyRing` holding randomly generated P2WPKH keys.
#[derive(Debug)]
pub struct MemoryKeyRing {
    network: Network,
    keys: RwLock<HashMap<ScriptBuf, PrivateKey>>,
}

impl MemoryKeyRing {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Generate a key and return its P2WPKH script.
    pub fn new_script(&self) -> WalletResult<ScriptBuf> {
        let secp = Secp256k1::new();
        let secret = SecretKey::new(&mut rand::thread_rng());
        let private = PrivateKey::new(secret, self.network);
        let public = CompressedPublicKey::from_private_key(&secp, &private)
            .map_err(|e| WalletError::Signing(e.to_string()))?;
        let script = ScriptBuf::new_p2wpkh(&public.wpubkey_hash());

        self.keys
            .write()
            .map_err(|e| WalletError::Store(e.to_string()))?
            .insert(script.clone(), private);
        Ok(script)
    }

    pub fn len(&self) -> usize {
        self.keys.read().expect("key ring lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyRing for MemoryKeyRing {
    fn private_key_for_script(&self, script: &Script) -> Option<PrivateKey> {
        self.keys.read().ok()?.get(script).copied()
    }

    fn derive_change_script(&self) -> WalletResult<ScriptBuf> {
        self.new_script()
    }
}
