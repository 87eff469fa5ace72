//! Agent (bank) model.
//!
//! An agent holds a settlement balance at the central bank plus the levers
//! that determine how far it can draw on intraday liquidity: an unsecured
//! daylight cap and posted collateral (haircut-adjusted). Each agent also
//! owns its internal queue (Queue 1), daily counterparty limits, the state
//! registers driven by its bank-level policy tree, and an optional per-tick
//! release budget.

use crate::money::Cents;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AgentError {
    #[error("insufficient liquidity: required {required}, available {available}")]
    InsufficientLiquidity { required: Cents, available: Cents },

    #[error("collateral post of {requested} exceeds remaining capacity {capacity}")]
    CollateralCapacityExceeded { requested: Cents, capacity: Cents },
}

/// A bank participating in the payment system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    id: String,

    /// Settlement account balance; negative while in overdraft.
    balance: Cents,

    /// Daylight overdraft allowance not backed by collateral.
    unsecured_cap: Cents,

    /// Collateral posted with the central bank.
    posted_collateral: Cents,

    /// Haircut applied to posted collateral, in [0, 1].
    collateral_haircut: f64,

    /// Upper bound on postable collateral.
    max_collateral_capacity: Cents,

    /// Liquidity earmarked from the agent's wider pool; carries the
    /// opportunity cost each tick.
    allocated_liquidity: Cents,

    /// Queue 1: transaction ids awaiting a policy decision, in queue order.
    queue1: Vec<String>,

    /// Max daily outflow per counterparty.
    bilateral_limits: BTreeMap<String, Cents>,

    /// Max total daily outflow across all counterparties.
    multilateral_limit: Option<Cents>,

    /// Outflow sent per counterparty today; reset at the day boundary.
    daily_outflow_to: BTreeMap<String, Cents>,
    daily_outflow_total: Cents,

    /// User-defined registers written by the bank tree, readable from any
    /// of the agent's trees as `reg:<name>` fields.
    state_registers: BTreeMap<String, f64>,

    /// Per-tick cap on released value, set by the bank tree. None = no cap.
    release_budget: Option<Cents>,
}

impl Agent {
    pub fn new(id: String, balance: Cents, unsecured_cap: Cents) -> Self {
        assert!(unsecured_cap >= 0, "unsecured_cap must be non-negative");
        Self {
            id,
            balance,
            unsecured_cap,
            posted_collateral: 0,
            collateral_haircut: 0.0,
            max_collateral_capacity: 0,
            allocated_liquidity: 0,
            queue1: Vec::new(),
            bilateral_limits: BTreeMap::new(),
            multilateral_limit: None,
            daily_outflow_to: BTreeMap::new(),
            daily_outflow_total: 0,
            state_registers: BTreeMap::new(),
            release_budget: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn balance(&self) -> Cents {
        self.balance
    }

    pub fn unsecured_cap(&self) -> Cents {
        self.unsecured_cap
    }

    pub fn set_unsecured_cap(&mut self, cap: Cents) {
        self.unsecured_cap = cap.max(0);
    }

    pub fn posted_collateral(&self) -> Cents {
        self.posted_collateral
    }

    pub fn collateral_haircut(&self) -> f64 {
        self.collateral_haircut
    }

    pub fn set_collateral_haircut(&mut self, haircut: f64) {
        self.collateral_haircut = haircut.clamp(0.0, 1.0);
    }

    pub fn max_collateral_capacity(&self) -> Cents {
        self.max_collateral_capacity
    }

    pub fn set_max_collateral_capacity(&mut self, capacity: Cents) {
        self.max_collateral_capacity = capacity.max(0);
    }

    pub fn set_posted_collateral(&mut self, collateral: Cents) {
        self.posted_collateral = collateral.max(0);
        self.max_collateral_capacity = self.max_collateral_capacity.max(self.posted_collateral);
    }

    pub fn remaining_collateral_capacity(&self) -> Cents {
        (self.max_collateral_capacity - self.posted_collateral).max(0)
    }

    pub fn allocated_liquidity(&self) -> Cents {
        self.allocated_liquidity
    }

    pub fn set_allocated_liquidity(&mut self, amount: Cents) {
        self.allocated_liquidity = amount.max(0);
    }

    /// Haircut-adjusted credit headroom provided by posted collateral.
    pub fn collateral_headroom(&self) -> Cents {
        let headroom = self.posted_collateral as f64 * (1.0 - self.collateral_haircut);
        headroom as Cents
    }

    /// Liquidity usable for outgoing payments right now:
    /// `balance + unsecured_cap + collateral_headroom`.
    pub fn available_liquidity(&self) -> Cents {
        self.balance
            .saturating_add(self.unsecured_cap)
            .saturating_add(self.collateral_headroom())
    }

    /// How far the balance may legally go negative.
    pub fn overdraft_limit(&self) -> Cents {
        self.unsecured_cap.saturating_add(self.collateral_headroom())
    }

    pub fn can_pay(&self, amount: Cents) -> bool {
        amount <= self.available_liquidity()
    }

    pub fn is_in_overdraft(&self) -> bool {
        self.balance < 0
    }

    /// Magnitude of the current overdraft, zero when in credit.
    pub fn overdraft_amount(&self) -> Cents {
        if self.balance < 0 {
            -self.balance
        } else {
            0
        }
    }

    /// Debit the settlement account, respecting the overdraft limit.
    pub fn debit(&mut self, amount: Cents) -> Result<(), AgentError> {
        debug_assert!(amount >= 0);
        if !self.can_pay(amount) {
            return Err(AgentError::InsufficientLiquidity {
                required: amount,
                available: self.available_liquidity(),
            });
        }
        self.balance -= amount;
        Ok(())
    }

    pub fn credit(&mut self, amount: Cents) {
        debug_assert!(amount >= 0);
        self.balance += amount;
    }

    /// Signed balance adjustment without a liquidity check. The LSM passes
    /// verify net feasibility for the whole batch before applying legs.
    pub fn adjust_balance(&mut self, delta: Cents) {
        self.balance = self.balance.saturating_add(delta);
    }

    // ------------------------------------------------------------------
    // Collateral operations
    // ------------------------------------------------------------------

    /// Post additional collateral, bounded by the configured capacity.
    pub fn post_collateral(&mut self, amount: Cents) -> Result<(), AgentError> {
        debug_assert!(amount >= 0);
        if amount > self.remaining_collateral_capacity() {
            return Err(AgentError::CollateralCapacityExceeded {
                requested: amount,
                capacity: self.remaining_collateral_capacity(),
            });
        }
        self.posted_collateral += amount;
        Ok(())
    }

    /// Withdraw collateral, clamped so the withdrawal never pulls
    /// `available_liquidity` below zero (the headroom may already be
    /// backing an overdraft). Returns the amount actually withdrawn.
    pub fn withdraw_collateral(&mut self, amount: Cents) -> Cents {
        debug_assert!(amount >= 0);
        let requested = amount.min(self.posted_collateral);

        // Collateral that must stay posted to keep the overdraft covered.
        let shortfall = -(self.balance.saturating_add(self.unsecured_cap));
        let keep_fraction = 1.0 - self.collateral_haircut;
        let mut floor = if shortfall <= 0 || keep_fraction <= 0.0 {
            0
        } else {
            (shortfall as f64 / keep_fraction).ceil() as Cents
        };
        // Truncation in the headroom computation can leave the estimate one
        // cent short; nudge up until the retained headroom covers it.
        while floor < self.posted_collateral
            && shortfall > 0
            && ((floor as f64 * keep_fraction) as Cents) < shortfall
        {
            floor += 1;
        }

        let withdrawn = requested.min((self.posted_collateral - floor).max(0));
        self.posted_collateral -= withdrawn;
        withdrawn
    }

    // ------------------------------------------------------------------
    // Queue 1
    // ------------------------------------------------------------------

    pub fn queue1(&self) -> &[String] {
        &self.queue1
    }

    pub fn queue1_len(&self) -> usize {
        self.queue1.len()
    }

    pub fn enqueue1(&mut self, tx_id: String) {
        self.queue1.push(tx_id);
    }

    pub fn remove_from_queue1(&mut self, tx_id: &str) {
        self.queue1.retain(|id| id != tx_id);
    }

    pub fn set_queue1(&mut self, ids: Vec<String>) {
        self.queue1 = ids;
    }

    // ------------------------------------------------------------------
    // Daily limits
    // ------------------------------------------------------------------

    pub fn set_bilateral_limits(&mut self, limits: BTreeMap<String, Cents>) {
        self.bilateral_limits = limits;
    }

    pub fn bilateral_limits(&self) -> &BTreeMap<String, Cents> {
        &self.bilateral_limits
    }

    pub fn set_multilateral_limit(&mut self, limit: Option<Cents>) {
        self.multilateral_limit = limit;
    }

    pub fn daily_outflow_to(&self, counterparty: &str) -> Cents {
        self.daily_outflow_to.get(counterparty).copied().unwrap_or(0)
    }

    pub fn daily_outflow_total(&self) -> Cents {
        self.daily_outflow_total
    }

    /// Would sending `amount` to `counterparty` breach a daily limit?
    pub fn would_breach_limits(&self, counterparty: &str, amount: Cents) -> bool {
        if let Some(&limit) = self.bilateral_limits.get(counterparty) {
            if self.daily_outflow_to(counterparty) + amount > limit {
                return true;
            }
        }
        if let Some(limit) = self.multilateral_limit {
            if self.daily_outflow_total + amount > limit {
                return true;
            }
        }
        false
    }

    pub fn record_outflow(&mut self, counterparty: &str, amount: Cents) {
        *self
            .daily_outflow_to
            .entry(counterparty.to_string())
            .or_insert(0) += amount;
        self.daily_outflow_total += amount;
    }

    pub fn reset_daily_outflows(&mut self) {
        self.daily_outflow_to.clear();
        self.daily_outflow_total = 0;
    }

    // ------------------------------------------------------------------
    // State registers & release budget (bank tree)
    // ------------------------------------------------------------------

    pub fn state_registers(&self) -> &BTreeMap<String, f64> {
        &self.state_registers
    }

    pub fn state_register(&self, key: &str) -> f64 {
        self.state_registers.get(key).copied().unwrap_or(0.0)
    }

    pub fn set_state_register(&mut self, key: String, value: f64) {
        self.state_registers.insert(key, value);
    }

    pub fn add_state_register(&mut self, key: String, delta: f64) {
        let next = self.state_register(&key) + delta;
        self.state_registers.insert(key, next);
    }

    pub fn release_budget(&self) -> Option<Cents> {
        self.release_budget
    }

    pub fn set_release_budget(&mut self, budget: Cents) {
        self.release_budget = Some(budget.max(0));
    }

    pub fn clear_release_budget(&mut self) {
        self.release_budget = None;
    }

    /// Consume budget for a release. Returns false (and charges nothing)
    /// when the remaining budget cannot cover the amount.
    pub fn charge_release_budget(&mut self, amount: Cents) -> bool {
        match self.release_budget {
            None => true,
            Some(remaining) if amount <= remaining => {
                self.release_budget = Some(remaining - amount);
                true
            }
            Some(_) => false,
        }
    }
}
