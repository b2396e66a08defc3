//! Sweeper: drains confirmed deposits into the hot wallet
//!
//! Consumes `wallet_events_deposit`, derives the depositing address's key on
//! demand at the same BIP-44 account the address service derives addresses
//! from, and broadcasts a transfer of the full balance less gas. Three layers keep a deposit from being swept twice:
//! the per-deposit distributed lock, the collection-exists re-check after
//! acquiring it, and the store's uniqueness on `(deposit_id, tx_hash)`.
//! The sweep transaction itself is deterministic in chain state, so a retry
//! after a crash re-broadcasts the same bytes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::address::{eth, ETH_ACCOUNT_PATH};
use crate::bus::{Consumer, Handler, Message};
use crate::chain::{eth_to_wei, ChainClient, LegacyTransaction};
use crate::crypto::ExtendedKey;
use crate::error::{Error, Result};
use crate::lock::DistributedLock;
use crate::model::{Chain, Deposit, DepositEvent, TOPIC_DEPOSIT};
use crate::store::{NewCollection, Store};

/// Default gas price used when no RPC endpoint is configured: 20 gwei
const SIMULATED_GAS_PRICE: u128 = 20_000_000_000;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// EIP-55 address of the hot wallet receiving swept funds
    pub hot_wallet: String,
    /// EIP-155 chain id to sign with
    pub chain_id: u64,
    /// TTL of the per-deposit lock
    pub lock_ttl: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            hot_wallet: String::new(),
            chain_id: 1,
            lock_ttl: Duration::from_secs(600),
        }
    }
}

pub struct Sweeper {
    store: Arc<Store>,
    consumer: Arc<dyn Consumer>,
    lock: Arc<dyn DistributedLock>,
    /// `None` runs in simulated mode: balances come from the event and
    /// broadcasts are logged instead of sent.
    chain: Option<Arc<dyn ChainClient>>,
    /// ETH account xprv; deposit keys are `0/index` below it, mirroring the
    /// account xpub the address service derives from
    account_key: ExtendedKey,
    hot_wallet_bytes: [u8; 20],
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(
        store: Arc<Store>,
        consumer: Arc<dyn Consumer>,
        lock: Arc<dyn DistributedLock>,
        chain: Option<Arc<dyn ChainClient>>,
        master_key: ExtendedKey,
        config: SweeperConfig,
    ) -> Result<Self> {
        if !master_key.is_private() {
            return Err(Error::PrivateKeyRequired);
        }
        let account_key = master_key.derive_path(ETH_ACCOUNT_PATH)?;
        let hot_wallet_bytes = crate::chain::tx::parse_eth_address(&config.hot_wallet)?;
        Ok(Self {
            store,
            consumer,
            lock,
            chain,
            account_key,
            hot_wallet_bytes,
            config,
        })
    }

    /// Subscribe and process deposit events until shutdown fires
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            hot_wallet = %self.config.hot_wallet,
            simulated = self.chain.is_none(),
            "starting sweeper"
        );
        let sweeper = self.clone();
        let handler: Handler = Arc::new(move |message: Message| {
            let sweeper = sweeper.clone();
            Box::pin(async move { sweeper.handle_deposit(message).await })
        });
        self.consumer
            .subscribe(TOPIC_DEPOSIT, handler, shutdown)
            .await
    }

    async fn handle_deposit(&self, message: Message) -> Result<()> {
        // Malformed payloads are acknowledged and dropped, never retried
        let event: DepositEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(id = %message.id, "dropping malformed deposit event: {}", e);
                return Ok(());
            }
        };
        if event.chain != "ETH" {
            debug!(chain = %event.chain, "skipping non-ETH deposit");
            return Ok(());
        }

        info!(
            user_id = event.user_id,
            amount = %event.amount,
            tx_hash = %event.tx_hash,
            "deposit event received"
        );

        let lock_key = format!("sweeper:deposit:{}", event.tx_hash);
        match self.lock.acquire(&lock_key, self.config.lock_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                info!(tx_hash = %event.tx_hash, "another worker holds the sweep lock, skipping");
                return Ok(());
            }
            // Lock system failure: fail the message so it retries
            Err(e) => return Err(e),
        }

        let result = self.sweep(&event).await;
        if let Err(e) = self.lock.release(&lock_key).await {
            warn!(tx_hash = %event.tx_hash, "lock release failed (TTL will expire it): {}", e);
        }

        match result {
            Ok(()) => Ok(()),
            // Another worker finished between lock expiry and our re-check
            Err(e) if e.is_conflict() => {
                debug!(tx_hash = %event.tx_hash, "sweep already recorded: {}", e);
                Ok(())
            }
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                error!(tx_hash = %event.tx_hash, "dropping unsweepable deposit: {}", e);
                Ok(())
            }
        }
    }

    async fn sweep(&self, event: &DepositEvent) -> Result<()> {
        let Some(deposit) = self.store.deposit_by_tx(&event.tx_hash).await else {
            // The outbox wrote deposit and event in one transaction, so this
            // only happens if someone replays a foreign event.
            return Err(Error::DepositNotFound(event.tx_hash.clone()));
        };

        // Re-check under the lock: a previous holder may have finished
        if self.store.collection_for_deposit(deposit.id).await.is_some() {
            debug!(deposit_id = deposit.id, "deposit already swept");
            return Ok(());
        }

        let Some(address) = self
            .store
            .address_by_user_chain(event.user_id, Chain::Eth)
            .await
        else {
            return Err(Error::AddressNotFound {
                user_id: event.user_id,
                chain: "ETH".into(),
            });
        };

        // External chain / index below the same account as the address
        let child = self
            .account_key
            .derive_index(0)?
            .derive_index(address.path_index)?;
        let derived_address = eth::pubkey_to_address(&child.public_key_uncompressed());
        if derived_address != address.address {
            return Err(Error::Derivation(format!(
                "derived key {} does not control deposit address {}",
                derived_address, address.address
            )));
        }
        let signing_key = child.signing_key()?;

        let (balance, nonce, gas_price) = self.chain_state(&address.address, &deposit).await?;

        let gas_limit = crate::chain::tx::TRANSFER_GAS_LIMIT;
        let gas_fee = gas_limit as u128 * gas_price;
        if balance <= gas_fee {
            info!(
                deposit_id = deposit.id,
                balance,
                gas_fee,
                "balance does not cover gas, waiting for more funds"
            );
            return Ok(());
        }
        let sweep_amount = balance - gas_fee;

        let tx = LegacyTransaction {
            nonce,
            to: self.hot_wallet_bytes,
            value: sweep_amount,
            gas_limit,
            gas_price,
            data: Vec::new(),
        };
        let signed = tx.sign(signing_key, self.config.chain_id)?;
        info!(
            deposit_id = deposit.id,
            tx_hash = %signed.tx_hash,
            amount = sweep_amount,
            "sweep transaction signed"
        );

        match &self.chain {
            Some(client) => {
                // Broadcast failure leaves no Collection row; the message
                // retries under the lock TTL and re-signs the same bytes.
                client.send_raw_transaction(&signed.raw_tx).await?;
                info!(tx_hash = %signed.tx_hash, "sweep broadcast");
            }
            None => {
                info!(tx_hash = %signed.tx_hash, "simulated mode, skipping broadcast");
            }
        }

        self.store
            .insert_collection(NewCollection {
                deposit_id: deposit.id,
                tx_hash: signed.tx_hash,
                from_address: address.address,
                to_address: self.config.hot_wallet.clone(),
                amount: sweep_amount,
                gas_fee,
            })
            .await?;
        Ok(())
    }

    /// Balance, nonce, and gas price: from the node when available,
    /// otherwise deterministic simulated values derived from the deposit.
    async fn chain_state(&self, address: &str, deposit: &Deposit) -> Result<(u128, u64, u128)> {
        match &self.chain {
            Some(client) => {
                let balance = client.balance(address).await?;
                let nonce = client.pending_nonce(address).await?;
                let gas_price = client.gas_price().await?;
                Ok((balance, nonce, gas_price))
            }
            None => {
                let balance = eth_to_wei(&deposit.amount)?;
                Ok((balance, 0, SIMULATED_GAS_PRICE))
            }
        }
    }
}
