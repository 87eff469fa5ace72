//! Scheduled scenario events.
//!
//! Interventions injected at the start of a tick, before arrival
//! generation: liquidity transfers, collateral adjustments, rate changes,
//! custom transactions, and arrival-shape changes. Events at the same tick
//! run in configuration order. All executions are logged so replay sees
//! the same world the live run did.

use crate::money::Cents;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ScenarioError {
    #[error("scenario event references unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("scenario transfer amount must be positive, got {0}")]
    NonPositiveAmount(Cents),

    #[error("collateral adjustment would make agent '{agent}' collateral negative")]
    NegativeCollateral { agent: String },

    #[error("agent '{0}' has no arrival configuration to modify")]
    NoArrivalConfig(String),

    #[error("custom transaction is invalid: {0}")]
    InvalidTransaction(String),

    #[error("arrival rate factor must be finite and non-negative, got {0}")]
    InvalidFactor(f64),

    #[error("deadline window max below min: ({0}, {1})")]
    InvalidWindow(u64, u64),
}

/// When a scheduled event fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    OneTime { tick: u64 },
    Repeating { start_tick: u64, interval_ticks: u64 },
}

impl Schedule {
    pub fn fires_at(&self, tick: u64) -> bool {
        match self {
            Schedule::OneTime { tick: at } => tick == *at,
            Schedule::Repeating {
                start_tick,
                interval_ticks,
            } => {
                *interval_ticks > 0
                    && tick >= *start_tick
                    && (tick - start_tick) % interval_ticks == 0
            }
        }
    }
}

/// Specification of an injected transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomTxSpec {
    pub sender_id: String,
    pub receiver_id: String,
    pub amount: Cents,
    /// Deadline offset in ticks from the injection tick.
    pub deadline_offset: u64,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub divisible: bool,
}

fn default_priority() -> u8 {
    5
}

/// The intervention itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioPayload {
    /// Move funds between agents without a transaction record.
    DirectTransfer {
        from_agent: String,
        to_agent: String,
        amount: Cents,
    },

    /// Inject a specific transaction into the sender's Queue 1.
    CustomTransactionArrival { tx: CustomTxSpec },

    /// Adjust posted collateral by a signed delta.
    CollateralAdjustment { agent: String, delta: Cents },

    /// Scale every agent's arrival rate by `factor` (relative to base).
    GlobalArrivalRateChange { factor: f64 },

    /// Scale one agent's arrival rate by `factor` (relative to base).
    AgentArrivalRateChange { agent: String, factor: f64 },

    /// Replace one agent's counterparty weights.
    CounterpartyWeightChange {
        agent: String,
        weights: BTreeMap<String, f64>,
    },

    /// Replace one agent's deadline window.
    DeadlineWindowChange { agent: String, new_range: (u64, u64) },
}

impl ScenarioPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ScenarioPayload::DirectTransfer { .. } => "direct_transfer",
            ScenarioPayload::CustomTransactionArrival { .. } => "custom_transaction_arrival",
            ScenarioPayload::CollateralAdjustment { .. } => "collateral_adjustment",
            ScenarioPayload::GlobalArrivalRateChange { .. } => "global_arrival_rate_change",
            ScenarioPayload::AgentArrivalRateChange { .. } => "agent_arrival_rate_change",
            ScenarioPayload::CounterpartyWeightChange { .. } => "counterparty_weight_change",
            ScenarioPayload::DeadlineWindowChange { .. } => "deadline_window_change",
        }
    }

    /// Agent this payload targets, for event attribution.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            ScenarioPayload::DirectTransfer { from_agent, .. } => Some(from_agent),
            ScenarioPayload::CustomTransactionArrival { tx } => Some(&tx.sender_id),
            ScenarioPayload::CollateralAdjustment { agent, .. }
            | ScenarioPayload::AgentArrivalRateChange { agent, .. }
            | ScenarioPayload::CounterpartyWeightChange { agent, .. }
            | ScenarioPayload::DeadlineWindowChange { agent, .. } => Some(agent),
            ScenarioPayload::GlobalArrivalRateChange { .. } => None,
        }
    }
}

/// A payload bound to a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub schedule: Schedule,
    pub payload: ScenarioPayload,
}

/// Ordered view of the configured events for one tick.
#[derive(Debug, Clone, Default)]
pub struct ScenarioSchedule {
    events: Vec<ScheduledEvent>,
}

impl ScenarioSchedule {
    pub fn new(events: Vec<ScheduledEvent>) -> Self {
        Self { events }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[ScheduledEvent] {
        &self.events
    }

    /// Payloads firing at `tick`, in configuration order.
    pub fn firing_at(&self, tick: u64) -> Vec<&ScenarioPayload> {
        self.events
            .iter()
            .filter(|e| e.schedule.fires_at(tick))
            .map(|e| &e.payload)
            .collect()
    }
}
