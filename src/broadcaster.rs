//! Broadcaster: signs and sends approved withdrawals from the hot wallet
//!
//! Polls `pending_broadcast` rows in small batches. The hot wallet key is
//! derived at the standard BIP-44 path rather than reusing the master key,
//! so the signing key for outbound transfers is distinct from every deposit
//! key. RPC failures leave the row for the next tick; signing failures are
//! permanent and move the row to `failed`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::address::eth;
use crate::chain::tx::{parse_eth_address, TRANSFER_GAS_LIMIT};
use crate::chain::{eth_to_wei, ChainClient, LegacyTransaction, SignedTransaction};
use crate::crypto::ExtendedKey;
use crate::error::{Error, Result};
use crate::model::{Chain, Withdrawal};
use crate::store::Store;

/// BIP-44 path of the ETH hot wallet signing key
pub const HOT_WALLET_PATH: &str = "m/44'/60'/0'/0/0";

const SIMULATED_GAS_PRICE: u128 = 20_000_000_000;

#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    pub interval: Duration,
    pub batch_size: usize,
    pub chain_id: u64,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            batch_size: 10,
            chain_id: 1,
        }
    }
}

pub struct Broadcaster {
    store: Arc<Store>,
    chain: Option<Arc<dyn ChainClient>>,
    hot_key: ExtendedKey,
    hot_address: String,
    config: BroadcasterConfig,
}

impl Broadcaster {
    pub fn new(
        store: Arc<Store>,
        chain: Option<Arc<dyn ChainClient>>,
        master_key: &ExtendedKey,
        config: BroadcasterConfig,
    ) -> Result<Self> {
        if !master_key.is_private() {
            return Err(Error::PrivateKeyRequired);
        }
        let hot_key = master_key.derive_path(HOT_WALLET_PATH)?;
        let hot_address = eth::pubkey_to_address(&hot_key.public_key_uncompressed());
        Ok(Self {
            store,
            chain,
            hot_key,
            hot_address,
            config,
        })
    }

    /// Address outbound withdrawals are paid from
    pub fn hot_address(&self) -> &str {
        &self.hot_address
    }

    /// Poll until shutdown fires
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            hot_wallet = %self.hot_address,
            simulated = self.chain.is_none(),
            "starting withdrawal broadcaster"
        );
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.config.interval) => {
                    self.process_pending().await;
                }
            }
        }
        info!("withdrawal broadcaster stopped");
        Ok(())
    }

    /// Handle one batch of approved withdrawals
    pub async fn process_pending(&self) {
        let batch = self.store.pending_broadcast(self.config.batch_size).await;
        for withdrawal in batch {
            self.broadcast_one(&withdrawal).await;
        }
    }

    async fn broadcast_one(&self, withdrawal: &Withdrawal) {
        if withdrawal.chain != Chain::Eth {
            warn!(
                withdrawal_id = withdrawal.id,
                chain = %withdrawal.chain,
                "broadcaster only handles ETH, leaving row"
            );
            return;
        }

        // Transient chain-state failures leave the row for the next tick
        let (nonce, gas_price) = match self.chain_state().await {
            Ok(state) => state,
            Err(e) => {
                warn!(withdrawal_id = withdrawal.id, "chain state unavailable: {}", e);
                return;
            }
        };

        // Signing failures are permanent
        let signed = match self.sign_withdrawal(withdrawal, nonce, gas_price) {
            Ok(signed) => signed,
            Err(e) => {
                error!(withdrawal_id = withdrawal.id, "signing failed, marking failed: {}", e);
                if let Err(e) = self.store.fail_withdrawal(withdrawal.id).await {
                    error!(withdrawal_id = withdrawal.id, "could not mark failed: {}", e);
                }
                return;
            }
        };

        if let Some(client) = &self.chain {
            if let Err(e) = client.send_raw_transaction(&signed.raw_tx).await {
                warn!(withdrawal_id = withdrawal.id, "broadcast failed, will retry: {}", e);
                return;
            }
        } else {
            info!(
                withdrawal_id = withdrawal.id,
                tx_hash = %signed.tx_hash,
                "simulated mode, skipping broadcast"
            );
        }

        match self
            .store
            .complete_withdrawal(withdrawal.id, signed.tx_hash.clone())
            .await
        {
            Ok(()) => {
                info!(
                    withdrawal_id = withdrawal.id,
                    tx_hash = %signed.tx_hash,
                    to = %withdrawal.to_address,
                    amount = %withdrawal.amount,
                    "withdrawal broadcast"
                );
            }
            Err(e) => {
                // The tx is on chain; redelivery is idempotent at the node
                error!(withdrawal_id = withdrawal.id, "status update failed: {}", e);
            }
        }
    }

    fn sign_withdrawal(
        &self,
        withdrawal: &Withdrawal,
        nonce: u64,
        gas_price: u128,
    ) -> Result<SignedTransaction> {
        let tx = LegacyTransaction {
            nonce,
            to: parse_eth_address(&withdrawal.to_address)?,
            value: eth_to_wei(&withdrawal.amount)?,
            gas_limit: TRANSFER_GAS_LIMIT,
            gas_price,
            data: Vec::new(),
        };
        tx.sign(self.hot_key.signing_key()?, self.config.chain_id)
    }

    async fn chain_state(&self) -> Result<(u64, u128)> {
        match &self.chain {
            Some(client) => {
                let nonce = client.pending_nonce(&self.hot_address).await?;
                let gas_price = client.gas_price().await?;
                Ok((nonce, gas_price))
            }
            None => Ok((0, SIMULATED_GAS_PRICE)),
        }
    }
}
