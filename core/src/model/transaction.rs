//! Transaction model.
//!
//! A payment obligation between two agents. Amounts are integer cents; the
//! remaining amount decreases with partial settlement and reaches zero
//! exactly when the transaction is settled. The overdue flag is orthogonal
//! to the queue status: a transaction can be overdue while still sitting in
//! either queue.

use crate::money::Cents;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Queue/lifecycle status of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// Created this tick, not yet seen by the sender's policy.
    Arrived,
    /// Waiting in the sender's internal queue for a policy decision.
    InQueue1,
    /// Released to the shared RTGS queue, awaiting liquidity.
    InQueue2,
    /// Some, but not all, of the amount has settled.
    PartiallySettled { first_settlement_tick: u64 },
    /// Fully settled.
    Settled { tick: u64 },
    /// Dropped by policy or expiry.
    Dropped { tick: u64 },
}

#[derive(Debug, Error, PartialEq)]
pub enum TransactionError {
    #[error("settlement amount must be positive")]
    InvalidAmount,

    #[error("settlement amount {amount} exceeds remaining {remaining}")]
    AmountExceedsRemaining { amount: Cents, remaining: Cents },

    #[error("transaction already fully settled")]
    AlreadySettled,

    #[error("cannot settle dropped transaction")]
    Dropped,
}

/// A payment between two agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    id: String,
    sender_id: String,
    receiver_id: String,
    amount: Cents,
    remaining_amount: Cents,
    arrival_tick: u64,
    deadline_tick: u64,
    /// 0..=10; banded Low 0-3 / Normal 4-7 / Urgent 8-10.
    priority: u8,
    divisible: bool,
    /// Set on children produced by a policy split.
    parent_tx_id: Option<String>,
    status: TxStatus,
    /// Tick at which the transaction first went past its deadline.
    overdue_since: Option<u64>,
}

impl Transaction {
    /// Create a new transaction with default priority 5.
    ///
    /// # Panics
    /// Panics if `amount <= 0` or `deadline_tick < arrival_tick`. The
    /// arrival generator and config validation uphold both.
    pub fn new(
        id: String,
        sender_id: String,
        receiver_id: String,
        amount: Cents,
        arrival_tick: u64,
        deadline_tick: u64,
    ) -> Self {
        assert!(amount > 0, "amount must be positive");
        assert!(
            deadline_tick >= arrival_tick,
            "deadline must not precede arrival"
        );
        Self {
            id,
            sender_id,
            receiver_id,
            amount,
            remaining_amount: amount,
            arrival_tick,
            deadline_tick,
            priority: 5,
            divisible: false,
            parent_tx_id: None,
            status: TxStatus::Arrived,
            overdue_since: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(10);
        self
    }

    pub fn divisible(mut self) -> Self {
        self.divisible = true;
        self
    }

    pub fn with_parent(mut self, parent_tx_id: String) -> Self {
        self.parent_tx_id = Some(parent_tx_id);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn receiver_id(&self) -> &str {
        &self.receiver_id
    }

    pub fn amount(&self) -> Cents {
        self.amount
    }

    pub fn remaining_amount(&self) -> Cents {
        self.remaining_amount
    }

    pub fn settled_amount(&self) -> Cents {
        self.amount - self.remaining_amount
    }

    pub fn arrival_tick(&self) -> u64 {
        self.arrival_tick
    }

    pub fn deadline_tick(&self) -> u64 {
        self.deadline_tick
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn is_divisible(&self) -> bool {
        self.divisible
    }

    pub fn parent_tx_id(&self) -> Option<&str> {
        self.parent_tx_id.as_deref()
    }

    pub fn status(&self) -> &TxStatus {
        &self.status
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority.min(10);
    }

    /// Move between queue states. Settlement states are reached through
    /// [`Transaction::settle`], never through this setter.
    pub fn set_queue_status(&mut self, status: TxStatus) {
        debug_assert!(matches!(
            status,
            TxStatus::Arrived | TxStatus::InQueue1 | TxStatus::InQueue2
        ));
        self.status = status;
    }

    pub fn is_fully_settled(&self) -> bool {
        self.remaining_amount == 0
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self.status, TxStatus::Dropped { .. })
    }

    /// Live = still carries an unsettled remainder and has not been dropped.
    pub fn is_live(&self) -> bool {
        !self.is_fully_settled() && !self.is_dropped()
    }

    pub fn is_past_deadline(&self, current_tick: u64) -> bool {
        current_tick > self.deadline_tick
    }

    pub fn is_overdue(&self) -> bool {
        self.overdue_since.is_some()
    }

    pub fn overdue_since(&self) -> Option<u64> {
        self.overdue_since
    }

    /// Tag the transaction overdue. Returns true on the first transition so
    /// the caller can charge the deadline penalty exactly once.
    pub fn mark_overdue(&mut self, tick: u64) -> bool {
        if self.overdue_since.is_some() {
            return false;
        }
        self.overdue_since = Some(tick);
        true
    }

    /// Settle `amount` of the remainder at `tick`.
    ///
    /// Partial settlement is legal for any transaction: the liquidity-saving
    /// passes may split a marginal payment while netting. The `divisible`
    /// flag only gates the policy-level `Split` action.
    pub fn settle(&mut self, amount: Cents, tick: u64) -> Result<(), TransactionError> {
        if amount <= 0 {
            return Err(TransactionError::InvalidAmount);
        }
        if self.remaining_amount == 0 {
            return Err(TransactionError::AlreadySettled);
        }
        if self.is_dropped() {
            return Err(TransactionError::Dropped);
        }
        if amount > self.remaining_amount {
            return Err(TransactionError::AmountExceedsRemaining {
                amount,
                remaining: self.remaining_amount,
            });
        }

        self.remaining_amount -= amount;
        if self.remaining_amount == 0 {
            self.status = TxStatus::Settled { tick };
        } else if !matches!(self.status, TxStatus::PartiallySettled { .. }) {
            self.status = TxStatus::PartiallySettled {
                first_settlement_tick: tick,
            };
        }
        Ok(())
    }

    pub fn drop_at(&mut self, tick: u64) {
        self.status = TxStatus::Dropped { tick };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(amount: Cents) -> Transaction {
        Transaction::new(
            "tx_00000001".to_string(),
            "BANK_A".to_string(),
            "BANK_B".to_string(),
            amount,
            0,
            10,
        )
    }

    #[test]
    fn test_priority_capped() {
        assert_eq!(tx(100).with_priority(200).priority(), 10);
    }

    #[test]
    fn test_deadline_equal_arrival_allowed() {
        let t = Transaction::new(
            "tx_x".into(),
            "A".into(),
            "B".into(),
            100,
            5,
            5,
        );
        assert!(!t.is_past_deadline(5));
        assert!(t.is_past_deadline(6));
    }

    #[test]
    fn test_full_settlement() {
        let mut t = tx(500);
        t.settle(500, 3).unwrap();
        assert!(t.is_fully_settled());
        assert_eq!(t.status(), &TxStatus::Settled { tick: 3 });
    }

    #[test]
    fn test_partial_settlement_tracks_first_tick() {
        let mut t = tx(500);
        t.settle(200, 3).unwrap();
        assert_eq!(
            t.status(),
            &TxStatus::PartiallySettled {
                first_settlement_tick: 3
            }
        );
        t.settle(100, 4).unwrap();
        assert_eq!(
            t.status(),
            &TxStatus::PartiallySettled {
                first_settlement_tick: 3
            }
        );
        assert_eq!(t.remaining_amount(), 200);
    }

    #[test]
    fn test_settle_rejects_excess() {
        let mut t = tx(500);
        assert_eq!(
            t.settle(600, 1),
            Err(TransactionError::AmountExceedsRemaining {
                amount: 600,
                remaining: 500
            })
        );
    }

    #[test]
    fn test_settle_rejects_dropped() {
        let mut t = tx(500);
        t.drop_at(2);
        assert_eq!(t.settle(500, 3), Err(TransactionError::Dropped));
    }

    #[test]
    fn test_mark_overdue_once() {
        let mut t = tx(500);
        assert!(t.mark_overdue(11));
        assert!(!t.mark_overdue(12));
        assert_eq!(t.overdue_since(), Some(11));
    }
}
