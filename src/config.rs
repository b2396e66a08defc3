//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::model::Network;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub observer: ObserverConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub broadcaster: BroadcasterConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_env")]
    pub env: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: default_env(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Path of the encrypted keystore holding the master mnemonic
    #[serde(default = "default_keystore_path")]
    pub keystore_path: String,

    /// Hot wallet address receiving swept funds. Empty derives it from the
    /// master key at the standard BIP-44 path.
    #[serde(default)]
    pub hot_wallet: String,

    /// Ethereum JSON-RPC endpoint. Empty runs in simulated mode.
    #[serde(default)]
    pub rpc_url: String,

    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    #[serde(default = "default_network")]
    pub network: Network,

    /// Admin approvals required before a withdrawal broadcasts
    #[serde(default = "default_required_approvals")]
    pub required_approvals: u32,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keystore_path: default_keystore_path(),
            hot_wallet: String::new(),
            rpc_url: String::new(),
            chain_id: default_chain_id(),
            network: default_network(),
            required_approvals: default_required_approvals(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObserverConfig {
    #[serde(default)]
    pub start_height: u64,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            start_height: 0,
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_relay_batch_size")]
    pub batch_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_relay_interval_ms(),
            batch_size: default_relay_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcasterConfig {
    #[serde(default = "default_broadcaster_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_broadcaster_batch_size")]
    pub batch_size: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_broadcaster_interval_secs(),
            batch_size: default_broadcaster_batch_size(),
        }
    }
}

impl Config {
    /// Load from an optional file plus `WALLET__`-prefixed environment
    /// overrides (e.g. `WALLET__WALLET__RPC_URL`).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("WALLET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.wallet.required_approvals == 0 {
            anyhow::bail!("wallet.required_approvals must be at least 1");
        }
        if self.wallet.chain_id == 0 {
            anyhow::bail!("wallet.chain_id must be non-zero");
        }
        if self.observer.worker_count == 0 {
            anyhow::bail!("observer.worker_count must be at least 1");
        }
        if self.relay.batch_size == 0 || self.broadcaster.batch_size == 0 {
            anyhow::bail!("batch sizes must be at least 1");
        }
        Ok(())
    }
}

fn default_env() -> String {
    "development".to_string()
}

fn default_keystore_path() -> String {
    "wallet.json".to_string()
}

fn default_chain_id() -> u64 {
    1
}

fn default_network() -> Network {
    Network::Mainnet
}

fn default_required_approvals() -> u32 {
    2
}

fn default_worker_count() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_relay_interval_ms() -> u64 {
    500
}

fn default_relay_batch_size() -> usize {
    50
}

fn default_lock_ttl_secs() -> u64 {
    600
}

fn default_broadcaster_interval_secs() -> u64 {
    10
}

fn default_broadcaster_batch_size() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_missing() {
        let config = Config::load("definitely-not-a-real-config.toml").unwrap();
        assert_eq!(config.wallet.required_approvals, 2);
        assert_eq!(config.relay.interval_ms, 500);
        assert_eq!(config.broadcaster.batch_size, 10);
        assert_eq!(config.sweeper.lock_ttl_secs, 600);
        assert!(config.wallet.rpc_url.is_empty());
    }

    #[test]
    fn test_validation_rejects_zero_approvals() {
        let mut config = Config::load("definitely-not-a-real-config.toml").unwrap();
        config.wallet.required_approvals = 0;
        assert!(config.validate().is_err());
    }
}
