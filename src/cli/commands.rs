//! CLI command implementations
//!
//! `start` wires the full pipeline (observer, relay, sweeper, broadcaster)
//! onto one runtime; the remaining commands form the offline signing tool
//! that shares the keystore format and derivation contract with the server.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dialoguer::{Confirm, Password};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::address::{btc, eth, AddressService, BTC_ACCOUNT_PATH, ETH_ACCOUNT_PATH};
use crate::broadcaster::{Broadcaster, BroadcasterConfig, HOT_WALLET_PATH};
use crate::bus::InMemoryBus;
use crate::cache::MemoryCache;
use crate::chain::{
    BlockSource, ChainClient, EthRpcClient, SignedTransaction, SimulatedSource,
    UnsignedTransaction,
};
use crate::config::Config;
use crate::crypto::{shamir, ExtendedKey, Mnemonic, WordCount};
use crate::keystore::Keystore;
use crate::lock::MemoryLock;
use crate::model::Chain;
use crate::observer::{Observer, ObserverConfig};
use crate::relay::{Relay, RelayConfig};
use crate::store::Store;
use crate::sweeper::{Sweeper, SweeperConfig};

/// BTC path printed by `new`
const DEFAULT_BTC_PATH: &str = "m/44'/0'/0'/0/0";

/// Run the wallet backend until ctrl-c
pub async fn start(config: &Config, simulate: bool) -> Result<()> {
    let master_key = load_master_key(config)?;

    // Capability implementations; production swaps these at the edge
    let store = Arc::new(Store::new());
    let cache = Arc::new(MemoryCache::new());
    let bus = Arc::new(InMemoryBus::default());
    let lock = Arc::new(MemoryLock::new());

    // Watch-only account keys for address derivation; the sweeper derives
    // its signing keys below the same accounts
    let mut account_keys = HashMap::new();
    account_keys.insert(Chain::Btc, master_key.derive_path(BTC_ACCOUNT_PATH)?.neuter());
    account_keys.insert(Chain::Eth, master_key.derive_path(ETH_ACCOUNT_PATH)?.neuter());
    let address_service = Arc::new(AddressService::new(
        store.clone(),
        cache.clone(),
        account_keys,
        config.wallet.network,
    )?);

    let simulated = simulate || config.wallet.rpc_url.is_empty();
    let chain: Option<Arc<dyn ChainClient>> = if simulated {
        warn!("no RPC endpoint; running in simulated mode");
        None
    } else {
        info!(rpc_url = %config.wallet.rpc_url, "connecting to ETH RPC");
        Some(Arc::new(EthRpcClient::new(config.wallet.rpc_url.clone())))
    };

    let hot_wallet = if config.wallet.hot_wallet.is_empty() {
        let hot_key = master_key.derive_path(HOT_WALLET_PATH)?;
        eth::pubkey_to_address(&hot_key.public_key_uncompressed())
    } else {
        config.wallet.hot_wallet.clone()
    };
    info!(hot_wallet = %hot_wallet, "hot wallet configured");

    let source: Arc<dyn BlockSource> = if simulated {
        // Fabricated blocks pay a demo user so the full pipeline exercises
        let demo = address_service.get_or_create(1, Chain::Eth).await?;
        info!(address = %demo.address, "simulated deposits will target the demo user");
        Arc::new(SimulatedSource::demo(demo.address))
    } else {
        Arc::new(EthRpcClient::new(config.wallet.rpc_url.clone()))
    };

    let observer = Observer::new(
        store.clone(),
        source,
        ObserverConfig {
            start_height: config.observer.start_height,
            worker_count: config.observer.worker_count,
            poll_interval: Duration::from_millis(config.observer.poll_interval_ms),
        },
    );
    let relay = Relay::new(
        store.clone(),
        bus.clone(),
        RelayConfig {
            interval: Duration::from_millis(config.relay.interval_ms),
            batch_size: config.relay.batch_size,
        },
    );
    let sweeper = Arc::new(Sweeper::new(
        store.clone(),
        bus.clone(),
        lock,
        chain.clone(),
        master_key.clone(),
        SweeperConfig {
            hot_wallet: hot_wallet.clone(),
            chain_id: config.wallet.chain_id,
            lock_ttl: Duration::from_secs(config.sweeper.lock_ttl_secs),
        },
    )?);
    let broadcaster = Broadcaster::new(
        store.clone(),
        chain,
        &master_key,
        BroadcasterConfig {
            interval: Duration::from_secs(config.broadcaster.interval_secs),
            batch_size: config.broadcaster.batch_size,
            chain_id: config.wallet.chain_id,
        },
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();
    {
        let shutdown = shutdown_rx.clone();
        tasks.push((
            "observer",
            tokio::spawn(async move { observer.run(shutdown).await }),
        ));
    }
    {
        let shutdown = shutdown_rx.clone();
        tasks.push((
            "relay",
            tokio::spawn(async move { relay.run(shutdown).await }),
        ));
    }
    {
        let shutdown = shutdown_rx.clone();
        tasks.push((
            "sweeper",
            tokio::spawn(async move { sweeper.run(shutdown).await }),
        ));
    }
    {
        let shutdown = shutdown_rx;
        tasks.push((
            "broadcaster",
            tokio::spawn(async move { broadcaster.run(shutdown).await }),
        ));
    }

    info!("wallet backend started; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown_tx.send(true).ok();

    for (name, mut task) in tasks {
        match tokio::time::timeout(Duration::from_secs(5), &mut task).await {
            Ok(Ok(Ok(()))) => info!("{} stopped", name),
            Ok(Ok(Err(e))) => error!("{} exited with error: {}", name, e),
            Ok(Err(e)) => error!("{} panicked: {}", name, e),
            Err(_) => {
                warn!("{} did not stop within grace period, aborting", name);
                task.abort();
            }
        }
    }
    Ok(())
}

/// Load the master xprv from the keystore, falling back to WALLET_MNEMONIC
fn load_master_key(config: &Config) -> Result<ExtendedKey> {
    let keystore_path = Path::new(&config.wallet.keystore_path);
    let mnemonic = if keystore_path.exists() {
        let password = std::env::var("WALLET_PASSWORD")
            .context("WALLET_PASSWORD must be set to unlock the keystore")?;
        let keystore = Keystore::load(keystore_path)?;
        let phrase = keystore.decrypt_mnemonic(&password)?;
        info!(path = %keystore_path.display(), "keystore unlocked");
        Mnemonic::parse(&phrase)?
    } else if let Ok(phrase) = std::env::var("WALLET_MNEMONIC") {
        warn!("no keystore found; using WALLET_MNEMONIC (development only)");
        Mnemonic::parse(&phrase)?
    } else {
        bail!(
            "no keystore at {} and WALLET_MNEMONIC is not set; run `walletd init` first",
            config.wallet.keystore_path
        );
    };

    let seed = mnemonic.to_seed("");
    Ok(ExtendedKey::master_from_seed(&seed[..])?)
}

/// Initialize a new encrypted wallet file
pub fn init(output: &str) -> Result<()> {
    if Path::new(output).exists() {
        bail!("{} already exists; delete it or choose another path", output);
    }

    println!("Initializing a new wallet. Choose a strong password.");
    let password = Password::new()
        .with_prompt("Password")
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()?;
    if password.len() < 6 {
        bail!("password must be at least 6 characters");
    }

    let mnemonic = Mnemonic::generate(WordCount::Twelve);
    let keystore = Keystore::encrypt_mnemonic(mnemonic.phrase(), &password)?;
    keystore.save(Path::new(output))?;

    println!("\nWallet initialized.");
    println!("File: {}", output);
    println!("Id:   {}", keystore.id);
    println!("\nWARNING: losing the password means losing the wallet.");

    let show = Confirm::new()
        .with_prompt("Display the mnemonic now for backup?")
        .default(false)
        .interact()?;
    if show {
        println!("\n---------------------------------------------------");
        println!("Write these words down and store them offline:");
        println!("{}", mnemonic.phrase());
        println!("---------------------------------------------------");
    }
    Ok(())
}

/// Generate a fresh 24-word wallet and print its first addresses
pub fn new_wallet() -> Result<()> {
    let mnemonic = Mnemonic::generate(WordCount::TwentyFour);
    let seed = mnemonic.to_seed("");
    let master = ExtendedKey::master_from_seed(&seed[..])?;

    let btc_key = master.derive_path(DEFAULT_BTC_PATH)?;
    let eth_key = master.derive_path(HOT_WALLET_PATH)?;

    println!("Mnemonic (24 words):");
    println!("  {}", mnemonic.phrase());
    println!();
    println!("BTC {}: {}", DEFAULT_BTC_PATH, btc::pubkey_to_address(
        &btc_key.public_key_compressed(),
        crate::model::Network::Mainnet,
    ));
    println!("ETH {}: {}", HOT_WALLET_PATH, eth::pubkey_to_address(
        &eth_key.public_key_uncompressed(),
    ));
    Ok(())
}

/// Construct an unsigned transaction file for offline signing
#[allow(clippy::too_many_arguments)]
pub fn build_tx(
    from: &str,
    to: &str,
    amount: &str,
    nonce: u64,
    path: &str,
    chain_id: u64,
    output: &str,
) -> Result<()> {
    let unsigned = UnsignedTransaction {
        chain: "ETH".into(),
        from: from.into(),
        to: to.into(),
        amount: amount.into(),
        nonce,
        gas_limit: crate::chain::tx::TRANSFER_GAS_LIMIT,
        gas_price: "20000000000".into(),
        data: String::new(),
        derivation_path: path.into(),
        chain_id,
    };
    // Fail early on malformed inputs instead of at signing time
    unsigned.to_legacy()?;

    std::fs::write(output, serde_json::to_string_pretty(&unsigned)?)?;
    println!("Unsigned transaction written to {}", output);
    Ok(())
}

/// Sign an unsigned transaction file with a keystore
pub fn sign(input: &str, keystore_path: &str, output: &str) -> Result<()> {
    let data = std::fs::read_to_string(input)
        .with_context(|| format!("cannot read {}", input))?;
    let unsigned: UnsignedTransaction = serde_json::from_str(&data)?;

    println!("================ Transaction to sign ================");
    println!("Chain:    {} (id {})", unsigned.chain, unsigned.chain_id);
    println!("From:     {}", unsigned.from);
    println!("To:       {}", unsigned.to);
    println!("Amount:   {} wei", unsigned.amount);
    println!("Nonce:    {}", unsigned.nonce);
    println!("GasPrice: {} wei", unsigned.gas_price);
    println!("Path:     {}", unsigned.derivation_path);
    println!("=====================================================");

    if unsigned.chain != "ETH" {
        bail!("only ETH signing is supported");
    }

    let keystore = Keystore::load(Path::new(keystore_path))?;
    let password = Password::new()
        .with_prompt("Keystore password")
        .interact()?;
    let phrase = keystore.decrypt_mnemonic(&password)?;
    let mnemonic = Mnemonic::parse(&phrase)?;
    let seed = mnemonic.to_seed("");
    let master = ExtendedKey::master_from_seed(&seed[..])?;

    let key = master.derive_path(&unsigned.derivation_path)?;
    let signed = unsigned.to_legacy()?.sign(key.signing_key()?, unsigned.chain_id)?;

    std::fs::write(output, serde_json::to_string_pretty(&signed)?)?;
    println!("\nSigned. TxHash: {}", signed.tx_hash);
    println!("Written to {}", output);
    Ok(())
}

/// Broadcast a signed transaction file
pub async fn broadcast(input: &str, rpc_url: &str) -> Result<()> {
    let data = std::fs::read_to_string(input)
        .with_context(|| format!("cannot read {}", input))?;
    let signed: SignedTransaction = serde_json::from_str(&data)?;

    let client = EthRpcClient::new(rpc_url);
    let tx_hash = client.send_raw_transaction(&signed.raw_tx).await?;
    println!("Broadcast accepted. TxHash: {}", tx_hash);
    Ok(())
}

/// Split a hex secret into Shamir shares
pub fn mpc_split(secret: &str, parts: u8, threshold: u8) -> Result<()> {
    let bytes = hex::decode(secret.trim_start_matches("0x"))
        .context("secret must be a hex string")?;
    let shares = shamir::split(&bytes, parts, threshold)?;

    println!("{}-of-{} shares:", threshold, parts);
    for (i, share) in shares.iter().enumerate() {
        println!("  [{}] {}", i + 1, hex::encode(share));
    }
    Ok(())
}

/// Recover a secret from comma-separated hex shares
pub fn mpc_recover(shares: &str) -> Result<()> {
    let decoded = shares
        .split(',')
        .map(|s| hex::decode(s.trim().trim_start_matches("0x")))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("shares must be comma-separated hex strings")?;

    let secret = shamir::combine(&decoded)?;
    println!("Recovered secret: {}", hex::encode(secret));
    Ok(())
}
