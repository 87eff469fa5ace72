//! Cost rates and per-tick accrual.
//!
//! All costs are computed in integer cents through 128-bit intermediates
//! (see `money`). Per-tick breakdowns roll up into monotone per-agent
//! totals; the daily-outflow counters are the only thing reset at the day
//! boundary, never cost totals.

use crate::model::world::World;
use crate::money::{bps_cost, scaled_cost, Cents};
use serde::{Deserialize, Serialize};

/// Priority band for a 0..=10 priority level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PriorityBand {
    Low,
    Normal,
    Urgent,
}

/// Band boundaries: Urgent 8-10, Normal 4-7, Low 0-3.
pub fn priority_band(priority: u8) -> PriorityBand {
    match priority {
        8..=10 => PriorityBand::Urgent,
        4..=7 => PriorityBand::Normal,
        _ => PriorityBand::Low,
    }
}

impl PriorityBand {
    /// Inclusive priority range of the band, used by banded arrival specs.
    pub fn range(self) -> (u8, u8) {
        match self {
            PriorityBand::Urgent => (8, 10),
            PriorityBand::Normal => (4, 7),
            PriorityBand::Low => (0, 3),
        }
    }
}

/// Delay-cost multipliers per priority band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityDelayMultipliers {
    pub urgent_multiplier: f64,
    pub normal_multiplier: f64,
    pub low_multiplier: f64,
}

impl Default for PriorityDelayMultipliers {
    fn default() -> Self {
        Self {
            urgent_multiplier: 1.0,
            normal_multiplier: 1.0,
            low_multiplier: 1.0,
        }
    }
}

impl PriorityDelayMultipliers {
    pub fn for_priority(&self, priority: u8) -> f64 {
        match priority_band(priority) {
            PriorityBand::Urgent => self.urgent_multiplier,
            PriorityBand::Normal => self.normal_multiplier,
            PriorityBand::Low => self.low_multiplier,
        }
    }
}

/// Cost rate configuration. Monetary fields are cents; bps fields are basis
/// points per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostRates {
    /// Overdraft cost on `|min(balance, 0)|`.
    pub overdraft_bps_per_tick: f64,

    /// Delay cost per tick per cent of queued remainder.
    pub delay_cost_per_tick_per_cent: f64,

    /// Opportunity cost of posted collateral.
    pub collateral_cost_per_tick_bps: f64,

    /// Opportunity cost of allocated liquidity.
    pub liquidity_cost_per_tick_bps: f64,

    /// Charged per unsettled transaction at the day boundary.
    pub eod_penalty_per_transaction: Cents,

    /// Charged once when a transaction goes overdue.
    pub deadline_penalty: Cents,

    /// Charged as `split_friction_cost × (parts − 1)` at split time.
    pub split_friction_cost: Cents,

    /// Delay-cost multiplier applied while a transaction is overdue.
    pub overdue_delay_multiplier: f64,

    /// Optional per-band delay multipliers.
    pub priority_delay_multipliers: Option<PriorityDelayMultipliers>,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            overdraft_bps_per_tick: 0.001,
            delay_cost_per_tick_per_cent: 0.0001,
            collateral_cost_per_tick_bps: 0.0002,
            liquidity_cost_per_tick_bps: 0.0,
            eod_penalty_per_transaction: 10_000,
            deadline_penalty: 50_000,
            split_friction_cost: 1_000,
            overdue_delay_multiplier: 5.0,
            priority_delay_multipliers: None,
        }
    }
}

/// Costs accrued by one agent in one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub liquidity_cost: Cents,
    pub delay_cost: Cents,
    pub collateral_cost: Cents,
    pub liquidity_opp_cost: Cents,
    pub penalty_cost: Cents,
    pub split_friction_cost: Cents,
}

impl CostBreakdown {
    pub fn total(&self) -> Cents {
        self.liquidity_cost
            + self.delay_cost
            + self.collateral_cost
            + self.liquidity_opp_cost
            + self.penalty_cost
            + self.split_friction_cost
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Monotone lifetime totals per agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostTotals {
    pub liquidity_cost: Cents,
    pub delay_cost: Cents,
    pub collateral_cost: Cents,
    pub liquidity_opp_cost: Cents,
    pub penalty_cost: Cents,
    pub split_friction_cost: Cents,

    /// Most negative balance observed.
    pub peak_overdraft: Cents,
}

impl CostTotals {
    pub fn add(&mut self, breakdown: &CostBreakdown) {
        self.liquidity_cost += breakdown.liquidity_cost;
        self.delay_cost += breakdown.delay_cost;
        self.collateral_cost += breakdown.collateral_cost;
        self.liquidity_opp_cost += breakdown.liquidity_opp_cost;
        self.penalty_cost += breakdown.penalty_cost;
        self.split_friction_cost += breakdown.split_friction_cost;
    }

    pub fn observe_balance(&mut self, balance: Cents) {
        if balance < self.peak_overdraft {
            self.peak_overdraft = balance;
        }
    }

    pub fn total(&self) -> Cents {
        self.liquidity_cost
            + self.delay_cost
            + self.collateral_cost
            + self.liquidity_opp_cost
            + self.penalty_cost
            + self.split_friction_cost
    }
}

/// Per-tick running costs for one agent: overdraft, delay on both queues,
/// collateral carry, and the liquidity opportunity cost.
///
/// One-time charges (deadline and EOD penalties, split friction) are added
/// to the breakdown by the engine at the point they occur.
pub fn accrue_running_costs(world: &World, agent_id: &str, rates: &CostRates) -> CostBreakdown {
    let mut breakdown = CostBreakdown::default();
    let Some(agent) = world.agent(agent_id) else {
        return breakdown;
    };

    breakdown.liquidity_cost = bps_cost(agent.overdraft_amount(), rates.overdraft_bps_per_tick);
    breakdown.collateral_cost =
        bps_cost(agent.posted_collateral(), rates.collateral_cost_per_tick_bps);
    breakdown.liquidity_opp_cost =
        bps_cost(agent.allocated_liquidity(), rates.liquidity_cost_per_tick_bps);

    // Delay on Queue 1 plus the agent's own Queue 2 entries.
    let mut delay = 0i64;
    for tx_id in agent.queue1() {
        if let Some(tx) = world.transaction(tx_id) {
            delay += delay_cost_one_tick(tx.remaining_amount(), tx.priority(), tx.is_overdue(), rates);
        }
    }
    for entry in world.queue2() {
        if let Some(tx) = world.transaction(&entry.tx_id) {
            if tx.sender_id() == agent_id {
                delay +=
                    delay_cost_one_tick(tx.remaining_amount(), tx.priority(), tx.is_overdue(), rates);
            }
        }
    }
    breakdown.delay_cost = delay;

    breakdown
}

/// Delay cost of one queued remainder for a single tick.
pub fn delay_cost_one_tick(remaining: Cents, priority: u8, overdue: bool, rates: &CostRates) -> Cents {
    let band_mult = rates
        .priority_delay_multipliers
        .as_ref()
        .map(|m| m.for_priority(priority))
        .unwrap_or(1.0);
    let overdue_mult = if overdue {
        rates.overdue_delay_multiplier
    } else {
        1.0
    };
    scaled_cost(
        remaining,
        rates.delay_cost_per_tick_per_cent,
        band_mult * overdue_mult,
    )
}
