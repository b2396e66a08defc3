//! Deposit address derivation
//!
//! Watch-only by construction: the service is handed account-level xpubs and
//! refuses private keys. Index allocation goes through the shared cache
//! counter, but the store's `(chain, path_index)` uniqueness is what
//! actually guarantees no index is handed out twice; on a conflict the
//! service reloads and retries with a fresh index.

pub mod btc;
pub mod eth;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::{hd_index_key, Cache};
use crate::crypto::ExtendedKey;
use crate::error::{Error, Result};
use crate::model::{Address, Chain, Network};
use crate::store::Store;

/// BIP-44 account level of BTC deposit keys
pub const BTC_ACCOUNT_PATH: &str = "m/44'/0'/0'";

/// BIP-44 account level of ETH deposit keys.
/// Deposit addresses and the sweeper's signing keys both derive `0/index`
/// below this account, off the xpub and xprv respectively.
pub const ETH_ACCOUNT_PATH: &str = "m/44'/60'/0'";

/// Retry bound for index allocation races
const MAX_ALLOCATION_ATTEMPTS: usize = 1024;

pub struct AddressService {
    store: Arc<Store>,
    cache: Arc<dyn Cache>,
    /// Account-level xpub per chain (`m/44'/coin'/0'`)
    account_keys: HashMap<Chain, ExtendedKey>,
    network: Network,
}

impl AddressService {
    /// Build the service from watch-only account keys.
    ///
    /// Rejects any private key: this process must never be able to sign.
    pub fn new(
        store: Arc<Store>,
        cache: Arc<dyn Cache>,
        account_keys: HashMap<Chain, ExtendedKey>,
        network: Network,
    ) -> Result<Self> {
        for (chain, key) in &account_keys {
            if key.is_private() {
                return Err(Error::Config(format!(
                    "address service for {} must hold an xpub, not an xprv",
                    chain
                )));
            }
        }
        Ok(Self {
            store,
            cache,
            account_keys,
            network,
        })
    }

    /// Return the deposit address for `(user_id, chain)`, deriving and
    /// persisting a new one on first request.
    pub async fn get_or_create(&self, user_id: u64, chain: Chain) -> Result<Address> {
        if let Some(existing) = self.store.address_by_user_chain(user_id, chain).await {
            return Ok(existing);
        }

        let account_key = self
            .account_keys
            .get(&chain)
            .ok_or_else(|| Error::UnsupportedChain(chain.to_string()))?;
        let counter_key = hd_index_key(&chain.to_string());

        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let index = self.cache.incr(&counter_key).await? as u32;
            let address = self.derive_address(account_key, chain, index)?;

            match self
                .store
                .insert_address(user_id, chain, address, index)
                .await
            {
                Ok(record) => {
                    info!(
                        user_id,
                        %chain,
                        address = %record.address,
                        path_index = record.path_index,
                        "assigned deposit address"
                    );
                    return Ok(record);
                }
                Err(Error::AddressExists { .. }) => {
                    // Concurrent request for the same user won the race
                    debug!(user_id, %chain, "address created concurrently, reloading");
                    if let Some(existing) = self.store.address_by_user_chain(user_id, chain).await
                    {
                        return Ok(existing);
                    }
                }
                Err(Error::PathIndexTaken { .. }) => {
                    // Counter lagged the store (e.g. cache restart); advance and retry
                    debug!(%chain, index, "path index taken, retrying with next index");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Store(format!(
            "could not allocate a path index on {} after {} attempts",
            chain, MAX_ALLOCATION_ATTEMPTS
        )))
    }

    /// External chain / index: `0/i` below the account key
    fn derive_address(&self, account: &ExtendedKey, chain: Chain, index: u32) -> Result<String> {
        let child = account.derive_index(0)?.derive_index(index)?;
        Ok(match chain {
            Chain::Btc => btc::pubkey_to_address(&child.public_key_compressed(), self.network),
            Chain::Eth => eth::pubkey_to_address(&child.public_key_uncompressed()),
        })
    }
}
