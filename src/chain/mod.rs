//! Chain access: RPC client, block source, and transaction signing

pub mod tx;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Error, Result};

pub use tx::{
    eth_to_wei, wei_to_eth, LegacyTransaction, SignedTransaction, UnsignedTransaction,
};

/// A scanned block, reduced to what the observer needs
#[derive(Debug, Clone)]
pub struct Block {
    pub height: u64,
    pub hash: String,
    pub transactions: Vec<BlockTx>,
}

/// A value transfer inside a block
#[derive(Debug, Clone)]
pub struct BlockTx {
    pub hash: String,
    pub from: String,
    pub to: String,
    /// Chain-native decimal string (ETH, not wei)
    pub value: String,
}

/// Chain state queries and broadcast, as the sweeper/broadcaster need them
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;
    /// Balance in wei
    async fn balance(&self, address: &str) -> Result<u128>;
    async fn pending_nonce(&self, address: &str) -> Result<u64>;
    /// Suggested gas price in wei
    async fn gas_price(&self) -> Result<u128>;
    /// Broadcast a 0x-prefixed raw transaction, returning the tx hash
    async fn send_raw_transaction(&self, raw_tx: &str) -> Result<String>;
}

/// Source of blocks for the observer
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Fetch the block at `height`; `Ok(None)` when not yet produced
    async fn fetch_block(&self, height: u64) -> Result<Option<Block>>;
}

/// JSON-RPC client for an Ethereum node
pub struct EthRpcClient {
    http: reqwest::Client,
    url: String,
    request_id: AtomicU64,
}

impl EthRpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            request_id: AtomicU64::new(0),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        let response: Value = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(err) = response.get("error") {
            if !err.is_null() {
                return Err(Error::Rpc(format!("{}: {}", method, err)));
            }
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| Error::Rpc(format!("{}: missing result", method)))
    }
}

#[async_trait]
impl ChainClient for EthRpcClient {
    async fn chain_id(&self) -> Result<u64> {
        let result = self.call("eth_chainId", json!([])).await?;
        parse_hex_u64(&result)
    }

    async fn balance(&self, address: &str) -> Result<u128> {
        let result = self
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        parse_hex_u128(&result)
    }

    async fn pending_nonce(&self, address: &str) -> Result<u64> {
        let result = self
            .call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        parse_hex_u64(&result)
    }

    async fn gas_price(&self) -> Result<u128> {
        let result = self.call("eth_gasPrice", json!([])).await?;
        parse_hex_u128(&result)
    }

    async fn send_raw_transaction(&self, raw_tx: &str) -> Result<String> {
        let result = self
            .call("eth_sendRawTransaction", json!([raw_tx]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Rpc("eth_sendRawTransaction: non-string result".into()))
    }
}

#[async_trait]
impl BlockSource for EthRpcClient {
    async fn fetch_block(&self, height: u64) -> Result<Option<Block>> {
        let tag = format!("0x{:x}", height);
        let result = self
            .call("eth_getBlockByNumber", json!([tag, true]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }

        let hash = result
            .get("hash")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut transactions = Vec::new();
        if let Some(txs) = result.get("transactions").and_then(Value::as_array) {
            for tx in txs {
                // Contract creations have no `to`; nothing to match against
                let Some(to) = tx.get("to").and_then(Value::as_str) else {
                    continue;
                };
                let value_wei = tx
                    .get("value")
                    .map(parse_hex_u128)
                    .transpose()?
                    .unwrap_or(0);
                transactions.push(BlockTx {
                    hash: tx
                        .get("hash")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    from: tx
                        .get("from")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    to: to.to_string(),
                    value: wei_to_eth(value_wei),
                });
            }
        }

        Ok(Some(Block {
            height,
            hash,
            transactions,
        }))
    }
}

fn parse_hex_u64(value: &Value) -> Result<u64> {
    let s = value
        .as_str()
        .ok_or_else(|| Error::Rpc("expected hex string".into()))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| Error::Rpc(format!("bad hex quantity '{}': {}", s, e)))
}

fn parse_hex_u128(value: &Value) -> Result<u128> {
    let s = value
        .as_str()
        .ok_or_else(|| Error::Rpc("expected hex string".into()))?;
    u128::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| Error::Rpc(format!("bad hex quantity '{}': {}", s, e)))
}

/// Block source for development and tests.
///
/// Scripted mode serves exactly the blocks it was given; demo mode fabricates
/// a deposit to a target address every fifth block, the way a faucet would.
pub struct SimulatedSource {
    scripted: Option<HashMap<u64, Block>>,
    demo_target: Option<String>,
}

impl SimulatedSource {
    /// Serve exactly these blocks, keyed by height
    pub fn scripted(blocks: Vec<Block>) -> Self {
        Self {
            scripted: Some(blocks.into_iter().map(|b| (b.height, b)).collect()),
            demo_target: None,
        }
    }

    /// Fabricate blocks forever, paying `target` 0.5 ETH every fifth block
    pub fn demo(target: impl Into<String>) -> Self {
        Self {
            scripted: None,
            demo_target: Some(target.into()),
        }
    }
}

#[async_trait]
impl BlockSource for SimulatedSource {
    async fn fetch_block(&self, height: u64) -> Result<Option<Block>> {
        if let Some(scripted) = &self.scripted {
            return Ok(scripted.get(&height).cloned());
        }

        let target = self.demo_target.as_deref().unwrap_or_default();
        let mut transactions = vec![BlockTx {
            hash: format!("0xsim{}noise", height),
            from: "0x0000000000000000000000000000000000000001".into(),
            to: "0x0000000000000000000000000000000000000002".into(),
            value: "100".into(),
        }];
        if height % 5 == 0 && !target.is_empty() {
            transactions.push(BlockTx {
                hash: format!("0xsim{}deposit", height),
                from: "0x0000000000000000000000000000000000000001".into(),
                to: target.to_string(),
                value: "0.5".into(),
            });
        }
        debug!(height, "fabricated simulated block");
        Ok(Some(Block {
            height,
            hash: format!("0xsimblock{}", height),
            transactions,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_quantities() {
        assert_eq!(parse_hex_u64(&json!("0x10")).unwrap(), 16);
        assert_eq!(
            parse_hex_u128(&json!("0xde0b6b3a7640000")).unwrap(),
            1_000_000_000_000_000_000
        );
        assert!(parse_hex_u64(&json!("nope")).is_err());
        assert!(parse_hex_u64(&json!(12)).is_err());
    }

    #[tokio::test]
    async fn test_scripted_source() {
        let source = SimulatedSource::scripted(vec![Block {
            height: 7,
            hash: "0xb7".into(),
            transactions: vec![],
        }]);
        assert!(source.fetch_block(7).await.unwrap().is_some());
        assert!(source.fetch_block(8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_demo_source_pays_target_every_fifth_block() {
        let source = SimulatedSource::demo("0xtarget");
        let block = source.fetch_block(10).await.unwrap().unwrap();
        assert!(block.transactions.iter().any(|t| t.to == "0xtarget"));
        let block = source.fetch_block(11).await.unwrap().unwrap();
        assert!(!block.transactions.iter().any(|t| t.to == "0xtarget"));
    }
}
