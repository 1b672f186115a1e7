//! Wallet facade consumed by the asset-transfer protocol.
//!
//! Ties the unspent-output store, key ring and lease table to the chain
//! bridge for fee context. Funding and signing are synchronous; only fee
//! lookups touch the network.

use std::sync::Arc;

use bitcoin::psbt::Psbt;
use bitcoin::{Address, Amount, FeeRate, OutPoint, Transaction};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::chain::{ChainBridge, ChainSource};
use crate::config::WalletConfig;
use crate::wallet::funding::{self, FundingParams};
use crate::wallet::leases::LeaseManager;
use crate::wallet::signing;
use crate::wallet::store::{KeyRing, WalletStore};
use crate::wallet::types::{FundedTransaction, SigningReport, Utxo, WalletError, WalletResult};

/// Confirmation target that maps onto the service's minimum fee tier.
const MIN_RELAY_CONF_TARGET: u32 = 1_008;

pub struct WalletAnchor<S> {
    store: Arc<dyn WalletStore>,
    keys: Arc<dyn KeyRing>,
    leases: LeaseManager,
    bridge: Arc<ChainBridge<S>>,
    config: WalletConfig,
}

impl<S: ChainSource> WalletAnchor<S> {
    pub fn new(
        store: Arc<dyn WalletStore>,
        keys: Arc<dyn KeyRing>,
        bridge: Arc<ChainBridge<S>>,
        config: WalletConfig,
    ) -> Self {
        Self {
            store,
            keys,
            leases: LeaseManager::new(),
            bridge,
            config,
        }
    }

    pub fn bridge(&self) -> &Arc<ChainBridge<S>> {
        &self.bridge
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    pub fn network(&self) -> bitcoin::Network {
        self.config.network.to_bitcoin_network()
    }

    /// Change output of `funded` rendered as an address on the wallet's
    /// network.
    pub fn change_address(&self, funded: &FundedTransaction) -> Option<Address> {
        let output = funded.psbt.unsigned_tx.output.get(funded.change_index?)?;
        Address::from_script(&output.script_pubkey, self.network()).ok()
    }

    /// Add inputs and change to `template` so it pays `fee_rate`.
    ///
    /// Selected outputs stay leased for the configured duration, or until
    /// `unlock_input`.
    pub fn fund_transaction(
        &self,
        template: Psbt,
        min_confs: u32,
        fee_rate: FeeRate,
        change_index: Option<usize>,
    ) -> WalletResult<FundedTransaction> {
        let params = FundingParams {
            min_confs,
            fee_rate,
            change_index,
            lease_duration: self.config.lease_duration(),
            dust_threshold: Amount::from_sat(self.config.dust_threshold_sat),
        };
        let funded = funding::fund_transaction(
            self.store.as_ref(),
            self.keys.as_ref(),
            &self.leases,
            &params,
            template,
        )?;

        if let Some(address) = self.change_address(&funded) {
            info!(%address, "Change output");
        }
        Ok(funded)
    }

    /// Sign every input the key ring controls and write its witness.
    pub fn sign_transaction(&self, psbt: &mut Psbt) -> WalletResult<SigningReport> {
        signing::sign_inputs(psbt, self.keys.as_ref())
    }

    /// Sign, then finalize every input that can be, including ones
    /// carrying signatures made elsewhere. Inputs that fail to finalize are
    /// left as they are.
    pub fn sign_and_finalize(&self, psbt: &mut Psbt) -> WalletResult<SigningReport> {
        let mut report = self.sign_transaction(psbt)?;
        let (finalized, failed) = signing::finalize_inputs(psbt);
        for (index, err) in &failed {
            warn!(index, error = %err, "Input not finalized");
        }
        report.finalized = finalized;
        Ok(report)
    }

    /// Network transaction from a fully finalized packet.
    pub fn extract_transaction(&self, psbt: Psbt) -> WalletResult<Transaction> {
        if let Some(index) = psbt
            .inputs
            .iter()
            .position(|i| i.final_script_witness.is_none() && i.final_script_sig.is_none())
        {
            return Err(WalletError::Finalize {
                index,
                reason: "input not finalized".into(),
            });
        }
        Ok(psbt.extract_tx_unchecked_fee_rate())
    }

    /// Release a lease taken by `fund_transaction`.
    pub fn unlock_input(&self, outpoint: &OutPoint) -> WalletResult<()> {
        self.leases.release(outpoint)?;
        info!(%outpoint, "Unlocked input");
        Ok(())
    }

    /// Unspent outputs at the configured confirmation floor, leased ones
    /// included.
    pub fn list_unspent(&self) -> WalletResult<Vec<Utxo>> {
        self.store.list_unspent(self.config.min_confs)
    }

    /// Unexpired leases with their expiry.
    pub fn list_leases(&self) -> Vec<(OutPoint, Instant)> {
        self.leases.leased_outpoints()
    }

    pub fn sweep_leases(&self) -> usize {
        self.leases.sweep_expired()
    }

    /// Fee rate for confirmation within `conf_target` blocks.
    pub async fn estimate_fee(&self, conf_target: u32) -> WalletResult<FeeRate> {
        Ok(self.bridge.estimate_fee(conf_target).await?)
    }

    /// Cheapest fee rate the service recommends.
    pub async fn min_relay_fee(&self) -> WalletResult<FeeRate> {
        self.estimate_fee(MIN_RELAY_CONF_TARGET).await
    }
}
