//! Domain entities and event payloads
//!
//! In production these rows live in the relational store owned by the edge;
//! the core only depends on their shapes and uniqueness keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Outbox topic for confirmed deposits
pub const TOPIC_DEPOSIT: &str = "wallet_events_deposit";

/// Outbox topic for created withdrawals
pub const TOPIC_WITHDRAWAL: &str = "wallet_events_withdrawal";

/// Bitcoin network selection (address version bytes, xprv/xpub prefixes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

/// Supported chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "ETH")]
    Eth,
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::Btc => f.write_str("BTC"),
            Chain::Eth => f.write_str("ETH"),
        }
    }
}

impl FromStr for Chain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BTC" => Ok(Chain::Btc),
            "ETH" => Ok(Chain::Eth),
            other => Err(Error::UnsupportedChain(other.to_string())),
        }
    }
}

/// A per-user deposit address derived from the watch-only account xpub.
///
/// Unique on `(chain, address)` and `(chain, path_index)`; one address per
/// `(user_id, chain)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: u64,
    pub user_id: u64,
    pub chain: Chain,
    pub address: String,
    pub path_index: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    Confirmed,
}

/// An observed on-chain deposit. Unique on `tx_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    pub id: u64,
    pub user_id: u64,
    pub address_id: u64,
    pub tx_hash: String,
    /// Chain-native amount as a decimal string (ETH, not wei)
    pub amount: String,
    pub block_height: u64,
    pub status: DepositStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

/// Transactional-outbox row, inserted in the same store transaction as the
/// business row that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: u64,
    pub topic: String,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Pending,
    Confirmed,
    Failed,
}

/// A sweep of one deposit into the hot wallet. Unique on `deposit_id` and
/// on the sweep `tx_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: u64,
    pub deposit_id: u64,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    /// Swept amount in wei (balance minus gas)
    pub amount: u128,
    /// Gas fee in wei
    pub gas_fee: u128,
    pub status: CollectionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    PendingReview,
    PendingBroadcast,
    Completed,
    Rejected,
    Failed,
}

/// A user withdrawal moving through the M-of-N review state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: u64,
    pub user_id: u64,
    pub to_address: String,
    /// Chain-native amount as a decimal string
    pub amount: String,
    pub chain: Chain,
    pub status: WithdrawalStatus,
    pub required_approvals: u32,
    pub current_approvals: u32,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
}

/// One admin's verdict on one withdrawal. Unique on
/// `(withdrawal_id, admin_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalReview {
    pub id: u64,
    pub withdrawal_id: u64,
    pub admin_id: u64,
    pub action: ReviewAction,
    pub remark: String,
    pub created_at: DateTime<Utc>,
}

/// Payload of `wallet_events_deposit`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositEvent {
    pub user_id: u64,
    pub amount: String,
    pub tx_hash: String,
    pub chain: String,
}

/// Payload of `wallet_events_withdrawal`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalCreatedEvent {
    pub withdrawal_id: u64,
    pub user_id: u64,
    pub to_address: String,
    pub amount: String,
    pub chain: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_roundtrip() {
        assert_eq!("BTC".parse::<Chain>().unwrap(), Chain::Btc);
        assert_eq!("eth".parse::<Chain>().unwrap(), Chain::Eth);
        assert!("DOGE".parse::<Chain>().is_err());
        assert_eq!(Chain::Eth.to_string(), "ETH");
    }

    #[test]
    fn test_deposit_event_json_shape() {
        let event = DepositEvent {
            user_id: 7,
            amount: "0.5".into(),
            tx_hash: "0xabc".into(),
            chain: "ETH".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "user_id": 7,
                "amount": "0.5",
                "tx_hash": "0xabc",
                "chain": "ETH"
            })
        );
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&OutboxStatus::Pending).unwrap(),
            "\"PENDING\""
        );
        assert_eq!(
            serde_json::to_string(&WithdrawalStatus::PendingReview).unwrap(),
            "\"pending_review\""
        );
        assert_eq!(
            serde_json::to_string(&DepositStatus::Confirmed).unwrap(),
            "\"confirmed\""
        );
    }
}
