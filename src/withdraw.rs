//! Withdrawal creation and the M-of-N review workflow
//!
//! A withdrawal starts in `pending_review` and needs `required_approvals`
//! distinct admin approvals before it becomes `pending_broadcast`; any
//! single rejection terminates it. The store serializes each review the way
//! a row-level lock would, and `(withdrawal_id, admin_id)` uniqueness
//! guarantees an admin's verdict counts once.

use std::sync::Arc;

use tracing::info;

use crate::address::btc;
use crate::chain::tx::parse_eth_address;
use crate::error::{Error, Result};
use crate::model::{Chain, ReviewAction, Withdrawal};
use crate::store::Store;

pub struct WithdrawService {
    store: Arc<Store>,
    required_approvals: u32,
}

impl WithdrawService {
    pub fn new(store: Arc<Store>, required_approvals: u32) -> Self {
        Self {
            store,
            required_approvals,
        }
    }

    /// Create a withdrawal request in `pending_review`.
    ///
    /// The row and its `wallet_events_withdrawal` outbox event are written
    /// in one store transaction.
    pub async fn create(
        &self,
        user_id: u64,
        to_address: String,
        amount: String,
        chain: Chain,
    ) -> Result<Withdrawal> {
        let wei = crate::chain::eth_to_wei(&amount)?;
        if wei == 0 {
            return Err(Error::InvalidAmount(amount));
        }
        match chain {
            Chain::Eth => {
                parse_eth_address(&to_address)?;
            }
            Chain::Btc => {
                btc::decode_address(&to_address)?;
            }
        }

        let withdrawal = self
            .store
            .create_withdrawal(user_id, to_address, amount, chain, self.required_approvals)
            .await?;
        info!(
            withdrawal_id = withdrawal.id,
            user_id,
            amount = %withdrawal.amount,
            required_approvals = withdrawal.required_approvals,
            "withdrawal created, awaiting review"
        );
        Ok(withdrawal)
    }

    /// Record one admin's verdict
    pub async fn review(
        &self,
        withdrawal_id: u64,
        admin_id: u64,
        action: ReviewAction,
        remark: String,
    ) -> Result<Withdrawal> {
        let withdrawal = self
            .store
            .review_withdrawal(withdrawal_id, admin_id, action, remark)
            .await?;
        info!(
            withdrawal_id,
            admin_id,
            ?action,
            status = ?withdrawal.status,
            approvals = withdrawal.current_approvals,
            "withdrawal reviewed"
        );
        Ok(withdrawal)
    }
}
