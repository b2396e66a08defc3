//! In-memory transactional store
//!
//! The production deployment fronts a relational database; this store is the
//! capability the core codes against. Every multi-row operation (deposit +
//! outbox event, withdrawal + outbox event, review + counter update) runs
//! under a single write lock, which is what a database transaction with a
//! row lock gives the SQL implementation. Uniqueness keys mirror the
//! database indexes: `Deposit.tx_hash`, `Collection.{deposit_id,tx_hash}`,
//! `Address.(chain,address)` / `(chain,path_index)` / `(user_id,chain)`,
//! and `WithdrawalReview.(withdrawal_id,admin_id)`.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::{
    Address, Chain, Collection, CollectionStatus, Deposit, DepositEvent, DepositStatus,
    OutboxMessage, OutboxStatus, ReviewAction, Withdrawal, WithdrawalCreatedEvent,
    WithdrawalReview, WithdrawalStatus, TOPIC_DEPOSIT, TOPIC_WITHDRAWAL,
};

/// Fields of a deposit about to be recorded
#[derive(Debug, Clone)]
pub struct NewDeposit {
    pub user_id: u64,
    pub address_id: u64,
    pub tx_hash: String,
    pub amount: String,
    pub block_height: u64,
}

/// Fields of a sweep about to be recorded
#[derive(Debug, Clone)]
pub struct NewCollection {
    pub deposit_id: u64,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: u128,
    pub gas_fee: u128,
}

#[derive(Default)]
struct Inner {
    addresses: HashMap<u64, Address>,
    addr_by_user_chain: HashMap<(u64, Chain), u64>,
    addr_by_chain_addr: HashMap<(Chain, String), u64>,
    addr_by_chain_index: HashMap<(Chain, u32), u64>,

    deposits: HashMap<u64, Deposit>,
    deposit_by_tx: HashMap<String, u64>,

    outbox: BTreeMap<u64, OutboxMessage>,

    collections: HashMap<u64, Collection>,
    collection_by_tx: HashMap<String, u64>,
    collection_by_deposit: HashMap<u64, u64>,

    withdrawals: BTreeMap<u64, Withdrawal>,
    reviews: Vec<WithdrawalReview>,
    review_index: HashSet<(u64, u64)>,

    next_address_id: u64,
    next_deposit_id: u64,
    next_outbox_id: u64,
    next_collection_id: u64,
    next_withdrawal_id: u64,
    next_review_id: u64,
}

impl Inner {
    fn push_outbox(&mut self, topic: &str, payload: Vec<u8>) {
        self.next_outbox_id += 1;
        let now = Utc::now();
        let msg = OutboxMessage {
            id: self.next_outbox_id,
            topic: topic.to_string(),
            payload,
            status: OutboxStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.outbox.insert(msg.id, msg);
    }
}

/// Shared store handle
#[derive(Default)]
pub struct Store {
    inner: RwLock<Inner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- addresses -----

    /// Insert a deposit address, enforcing all three uniqueness keys.
    ///
    /// Checks run before any mutation, so a conflict leaves the store
    /// untouched and the caller can retry with fresh state.
    pub async fn insert_address(
        &self,
        user_id: u64,
        chain: Chain,
        address: String,
        path_index: u32,
    ) -> Result<Address> {
        let mut inner = self.inner.write().await;

        if inner.addr_by_user_chain.contains_key(&(user_id, chain)) {
            return Err(Error::AddressExists {
                user_id,
                chain: chain.to_string(),
            });
        }
        if inner.addr_by_chain_index.contains_key(&(chain, path_index)) {
            return Err(Error::PathIndexTaken {
                chain: chain.to_string(),
                index: path_index,
            });
        }
        if inner.addr_by_chain_addr.contains_key(&(chain, address.clone())) {
            return Err(Error::Store(format!(
                "address {} already present on {}",
                address, chain
            )));
        }

        inner.next_address_id += 1;
        let record = Address {
            id: inner.next_address_id,
            user_id,
            chain,
            address: address.clone(),
            path_index,
            created_at: Utc::now(),
        };
        inner.addr_by_user_chain.insert((user_id, chain), record.id);
        inner.addr_by_chain_addr.insert((chain, address), record.id);
        inner
            .addr_by_chain_index
            .insert((chain, path_index), record.id);
        inner.addresses.insert(record.id, record.clone());
        Ok(record)
    }

    pub async fn address_by_user_chain(&self, user_id: u64, chain: Chain) -> Option<Address> {
        let inner = self.inner.read().await;
        let id = inner.addr_by_user_chain.get(&(user_id, chain))?;
        inner.addresses.get(id).cloned()
    }

    pub async fn address_by_chain_address(&self, chain: Chain, address: &str) -> Option<Address> {
        let inner = self.inner.read().await;
        let id = inner.addr_by_chain_addr.get(&(chain, address.to_string()))?;
        inner.addresses.get(id).cloned()
    }

    pub async fn max_path_index(&self, chain: Chain) -> Option<u32> {
        let inner = self.inner.read().await;
        inner
            .addr_by_chain_index
            .keys()
            .filter(|(c, _)| *c == chain)
            .map(|(_, i)| *i)
            .max()
    }

    // ----- deposits & outbox -----

    /// Record a deposit and its outbox event in one transaction.
    ///
    /// Returns `Ok(None)` when the tx hash is already known, which makes
    /// block replay a no-op.
    pub async fn record_deposit(&self, new: NewDeposit) -> Result<Option<Deposit>> {
        let mut inner = self.inner.write().await;

        if inner.deposit_by_tx.contains_key(&new.tx_hash) {
            return Ok(None);
        }
        let chain = inner
            .addresses
            .get(&new.address_id)
            .map(|a| a.chain)
            .ok_or_else(|| Error::Store(format!("unknown address id {}", new.address_id)))?;

        inner.next_deposit_id += 1;
        let deposit = Deposit {
            id: inner.next_deposit_id,
            user_id: new.user_id,
            address_id: new.address_id,
            tx_hash: new.tx_hash.clone(),
            amount: new.amount.clone(),
            block_height: new.block_height,
            status: DepositStatus::Confirmed,
            created_at: Utc::now(),
        };
        inner.deposit_by_tx.insert(new.tx_hash.clone(), deposit.id);
        inner.deposits.insert(deposit.id, deposit.clone());

        let event = DepositEvent {
            user_id: new.user_id,
            amount: new.amount,
            tx_hash: new.tx_hash,
            chain: chain.to_string(),
        };
        let payload = serde_json::to_vec(&event)?;
        inner.push_outbox(TOPIC_DEPOSIT, payload);

        Ok(Some(deposit))
    }

    pub async fn deposit_by_tx(&self, tx_hash: &str) -> Option<Deposit> {
        let inner = self.inner.read().await;
        let id = inner.deposit_by_tx.get(tx_hash)?;
        inner.deposits.get(id).cloned()
    }

    pub async fn deposit_count(&self) -> usize {
        self.inner.read().await.deposits.len()
    }

    /// Pending outbox rows in id order, up to `limit`
    pub async fn pending_outbox(&self, limit: usize) -> Vec<OutboxMessage> {
        let inner = self.inner.read().await;
        inner
            .outbox
            .values()
            .filter(|m| m.status == OutboxStatus::Pending)
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn mark_outbox_sent(&self, id: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let msg = inner
            .outbox
            .get_mut(&id)
            .ok_or_else(|| Error::Store(format!("unknown outbox id {}", id)))?;
        msg.status = OutboxStatus::Sent;
        msg.updated_at = Utc::now();
        Ok(())
    }

    // ----- collections -----

    pub async fn collection_for_deposit(&self, deposit_id: u64) -> Option<Collection> {
        let inner = self.inner.read().await;
        let id = inner.collection_by_deposit.get(&deposit_id)?;
        inner.collections.get(id).cloned()
    }

    pub async fn collection_count(&self) -> usize {
        self.inner.read().await.collections.len()
    }

    /// Record a sweep. Unique on the deposit and on the sweep tx hash.
    pub async fn insert_collection(&self, new: NewCollection) -> Result<Collection> {
        let mut inner = self.inner.write().await;

        if inner.collection_by_deposit.contains_key(&new.deposit_id) {
            return Err(Error::DuplicateCollection(new.deposit_id));
        }
        if inner.collection_by_tx.contains_key(&new.tx_hash) {
            return Err(Error::DuplicateCollection(new.deposit_id));
        }

        inner.next_collection_id += 1;
        let record = Collection {
            id: inner.next_collection_id,
            deposit_id: new.deposit_id,
            tx_hash: new.tx_hash.clone(),
            from_address: new.from_address,
            to_address: new.to_address,
            amount: new.amount,
            gas_fee: new.gas_fee,
            status: CollectionStatus::Pending,
            created_at: Utc::now(),
        };
        inner
            .collection_by_deposit
            .insert(new.deposit_id, record.id);
        inner.collection_by_tx.insert(new.tx_hash, record.id);
        inner.collections.insert(record.id, record.clone());
        Ok(record)
    }

    // ----- withdrawals -----

    /// Create a withdrawal in `pending_review` and its outbox event in one
    /// transaction.
    pub async fn create_withdrawal(
        &self,
        user_id: u64,
        to_address: String,
        amount: String,
        chain: Chain,
        required_approvals: u32,
    ) -> Result<Withdrawal> {
        let mut inner = self.inner.write().await;

        inner.next_withdrawal_id += 1;
        let now = Utc::now();
        let withdrawal = Withdrawal {
            id: inner.next_withdrawal_id,
            user_id,
            to_address: to_address.clone(),
            amount: amount.clone(),
            chain,
            status: WithdrawalStatus::PendingReview,
            required_approvals,
            current_approvals: 0,
            tx_hash: None,
            created_at: now,
            updated_at: now,
        };
        inner.withdrawals.insert(withdrawal.id, withdrawal.clone());

        let event = WithdrawalCreatedEvent {
            withdrawal_id: withdrawal.id,
            user_id,
            to_address,
            amount,
            chain: chain.to_string(),
        };
        let payload = serde_json::to_vec(&event)?;
        inner.push_outbox(TOPIC_WITHDRAWAL, payload);

        Ok(withdrawal)
    }

    pub async fn withdrawal(&self, id: u64) -> Option<Withdrawal> {
        self.inner.read().await.withdrawals.get(&id).cloned()
    }

    /// Apply one admin review atomically.
    ///
    /// The write lock plays the part of the row-level `SELECT ... FOR
    /// UPDATE`: status check, duplicate-review check, review insert, and
    /// counter/status update are one indivisible step.
    pub async fn review_withdrawal(
        &self,
        withdrawal_id: u64,
        admin_id: u64,
        action: ReviewAction,
        remark: String,
    ) -> Result<Withdrawal> {
        let mut inner = self.inner.write().await;

        {
            let withdrawal = inner
                .withdrawals
                .get(&withdrawal_id)
                .ok_or(Error::WithdrawalNotFound(withdrawal_id))?;
            if withdrawal.status != WithdrawalStatus::PendingReview {
                return Err(Error::InvalidState {
                    id: withdrawal_id,
                    expected: "pending_review".into(),
                });
            }
        }
        if inner.review_index.contains(&(withdrawal_id, admin_id)) {
            return Err(Error::DuplicateReview {
                withdrawal_id,
                admin_id,
            });
        }

        inner.next_review_id += 1;
        let review = WithdrawalReview {
            id: inner.next_review_id,
            withdrawal_id,
            admin_id,
            action,
            remark,
            created_at: Utc::now(),
        };
        inner.review_index.insert((withdrawal_id, admin_id));
        inner.reviews.push(review);

        let withdrawal = inner
            .withdrawals
            .get_mut(&withdrawal_id)
            .expect("checked above");
        match action {
            ReviewAction::Approve => {
                withdrawal.current_approvals += 1;
                if withdrawal.current_approvals >= withdrawal.required_approvals {
                    withdrawal.status = WithdrawalStatus::PendingBroadcast;
                }
            }
            ReviewAction::Reject => {
                withdrawal.status = WithdrawalStatus::Rejected;
            }
        }
        withdrawal.updated_at = Utc::now();
        Ok(withdrawal.clone())
    }

    pub async fn reviews_for(&self, withdrawal_id: u64) -> Vec<WithdrawalReview> {
        self.inner
            .read()
            .await
            .reviews
            .iter()
            .filter(|r| r.withdrawal_id == withdrawal_id)
            .cloned()
            .collect()
    }

    /// Withdrawals awaiting broadcast, oldest first, up to `limit`
    pub async fn pending_broadcast(&self, limit: usize) -> Vec<Withdrawal> {
        let inner = self.inner.read().await;
        inner
            .withdrawals
            .values()
            .filter(|w| w.status == WithdrawalStatus::PendingBroadcast)
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn complete_withdrawal(&self, id: u64, tx_hash: String) -> Result<()> {
        let mut inner = self.inner.write().await;
        let withdrawal = inner
            .withdrawals
            .get_mut(&id)
            .ok_or(Error::WithdrawalNotFound(id))?;
        if withdrawal.status != WithdrawalStatus::PendingBroadcast {
            return Err(Error::InvalidState {
                id,
                expected: "pending_broadcast".into(),
            });
        }
        withdrawal.status = WithdrawalStatus::Completed;
        withdrawal.tx_hash = Some(tx_hash);
        withdrawal.updated_at = Utc::now();
        Ok(())
    }

    pub async fn fail_withdrawal(&self, id: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let withdrawal = inner
            .withdrawals
            .get_mut(&id)
            .ok_or(Error::WithdrawalNotFound(id))?;
        if withdrawal.status != WithdrawalStatus::PendingBroadcast {
            return Err(Error::InvalidState {
                id,
                expected: "pending_broadcast".into(),
            });
        }
        withdrawal.status = WithdrawalStatus::Failed;
        withdrawal.updated_at = Utc::now();
        Ok(())
    }
}
