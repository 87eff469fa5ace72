//! Simulation configuration and validation.
//!
//! `SimConfig` is the complete contract between the outer layer and the
//! core. Construction of an engine validates everything up front; a failed
//! validation leaves no partial state behind.

use crate::arrivals::{AmountDist, ArrivalProfile, ArrivalSpec};
use crate::costs::CostRates;
use crate::money::Cents;
use crate::policy::ast::PolicyDoc;
use crate::policy::compile::DEFAULT_MAX_TREE_DEPTH;
use crate::scenario::ScheduledEvent;
use crate::settlement::lsm::LsmConfig;
use crate::settlement::rtgs::EscalationConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("at least one agent is required")]
    NoAgents,

    #[error("duplicate agent id '{0}'")]
    DuplicateAgentId(String),

    #[error("agent id must not be empty")]
    EmptyAgentId,

    #[error("{field} must be positive")]
    NonPositive { field: &'static str },

    #[error("agent '{agent}': {message}")]
    InvalidAgent { agent: String, message: String },

    #[error("agent '{agent}' references unknown counterparty '{counterparty}'")]
    UnknownCounterparty { agent: String, counterparty: String },

    #[error("arrival configuration requires at least two agents")]
    ArrivalsNeedCounterparty,

    #[error("eod_rush_threshold must be within [0, 1], got {0}")]
    InvalidEodRushThreshold(f64),

    #[error("lsm.max_cycle_length must be at least 3, got {0}")]
    CycleLengthTooSmall(usize),

    #[error("invalid distribution for agent '{agent}': {message}")]
    InvalidDistribution { agent: String, message: String },
}

/// Queue-1 ordering discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue1Ordering {
    Fifo,
    /// Priority descending, deadline ascending, arrival order tiebreak.
    PriorityDeadline,
}

impl Default for Queue1Ordering {
    fn default() -> Self {
        Queue1Ordering::Fifo
    }
}

/// Daily outflow limits for one agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLimits {
    pub bilateral_limits: BTreeMap<String, Cents>,
    pub multilateral_limit: Option<Cents>,
}

/// Per-agent configuration.
///
/// Unknown keys are rejected; in particular the deprecated `credit_limit`
/// field fails deserialization. `unsecured_cap` is the only daylight
/// overdraft knob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSpec {
    pub id: String,

    pub opening_balance: Cents,

    #[serde(default)]
    pub unsecured_cap: Cents,

    /// Policy document; defaults to release-always when omitted.
    #[serde(default)]
    pub policy: Option<PolicyDoc>,

    #[serde(default)]
    pub arrivals: Option<ArrivalSpec>,

    #[serde(default)]
    pub posted_collateral: Cents,

    #[serde(default)]
    pub collateral_haircut: f64,

    /// Cap on postable collateral; defaults to the opening posted amount.
    #[serde(default)]
    pub max_collateral_capacity: Option<Cents>,

    #[serde(default)]
    pub limits: AgentLimits,

    /// Wider liquidity pool the agent draws its allocation from.
    #[serde(default)]
    pub liquidity_pool: Option<Cents>,

    /// Fraction of the pool allocated to settlement, in [0, 1].
    #[serde(default)]
    pub liquidity_allocation_fraction: Option<f64>,
}

/// Complete simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub ticks_per_day: u32,
    pub num_days: u32,
    pub rng_seed: u64,

    /// Day fraction after which the `is_eod_rush` context flag turns on.
    #[serde(default = "default_eod_rush_threshold")]
    pub eod_rush_threshold: f64,

    pub agents: Vec<AgentSpec>,

    #[serde(default)]
    pub cost_rates: CostRates,

    #[serde(default)]
    pub lsm: LsmConfig,

    #[serde(default)]
    pub queue1_ordering: Queue1Ordering,

    #[serde(default)]
    pub priority_mode: bool,

    #[serde(default)]
    pub priority_escalation: EscalationConfig,

    /// Re-run the release scan after the LSM passes so freed liquidity is
    /// reusable within the tick.
    #[serde(default)]
    pub algorithm_sequencing: bool,

    #[serde(default)]
    pub entry_disposition_offsetting: bool,

    /// Inbound credits land at end of tick instead of immediately.
    #[serde(default)]
    pub deferred_crediting: bool,

    /// Cap generated deadlines at the end of the arrival day.
    #[serde(default)]
    pub deadline_cap_at_eod: bool,

    #[serde(default)]
    pub scenario_events: Option<Vec<ScheduledEvent>>,

    /// Stable simulation id; derived from the seed when omitted.
    #[serde(default)]
    pub sim_id: Option<String>,

    /// Upper bound on policy tree depth.
    #[serde(default = "default_max_tree_depth")]
    pub max_tree_depth: usize,
}

fn default_eod_rush_threshold() -> f64 {
    0.8
}

fn default_max_tree_depth() -> usize {
    DEFAULT_MAX_TREE_DEPTH
}

impl SimConfig {
    /// Structural validation; policy compilation happens separately so the
    /// error can carry the policy taxonomy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticks_per_day == 0 {
            return Err(ConfigError::NonPositive {
                field: "ticks_per_day",
            });
        }
        if self.num_days == 0 {
            return Err(ConfigError::NonPositive { field: "num_days" });
        }
        if !(0.0..=1.0).contains(&self.eod_rush_threshold) {
            return Err(ConfigError::InvalidEodRushThreshold(self.eod_rush_threshold));
        }
        if self.agents.is_empty() {
            return Err(ConfigError::NoAgents);
        }
        if self.lsm.enable_cycles && self.lsm.max_cycle_length < 3 {
            return Err(ConfigError::CycleLengthTooSmall(self.lsm.max_cycle_length));
        }

        let mut ids = BTreeSet::new();
        for agent in &self.agents {
            if agent.id.is_empty() {
                return Err(ConfigError::EmptyAgentId);
            }
            if !ids.insert(agent.id.clone()) {
                return Err(ConfigError::DuplicateAgentId(agent.id.clone()));
            }
        }

        let has_arrivals = self.agents.iter().any(|a| a.arrivals.is_some());
        if has_arrivals && self.agents.len() < 2 {
            return Err(ConfigError::ArrivalsNeedCounterparty);
        }

        for agent in &self.agents {
            validate_agent(agent, &ids)?;
        }

        if let Some(events) = &self.scenario_events {
            for event in events {
                validate_scenario_refs(event, &ids)?;
            }
        }

        Ok(())
    }

    pub fn episode_ticks(&self) -> u64 {
        self.ticks_per_day as u64 * self.num_days as u64
    }
}

fn validate_agent(agent: &AgentSpec, ids: &BTreeSet<String>) -> Result<(), ConfigError> {
    let invalid = |message: String| ConfigError::InvalidAgent {
        agent: agent.id.clone(),
        message,
    };

    if agent.unsecured_cap < 0 {
        return Err(invalid("unsecured_cap must be non-negative".to_string()));
    }
    if agent.posted_collateral < 0 {
        return Err(invalid("posted_collateral must be non-negative".to_string()));
    }
    if !(0.0..=1.0).contains(&agent.collateral_haircut) {
        return Err(invalid(format!(
            "collateral_haircut must be within [0, 1], got {}",
            agent.collateral_haircut
        )));
    }
    if let Some(capacity) = agent.max_collateral_capacity {
        if capacity < agent.posted_collateral {
            return Err(invalid(
                "max_collateral_capacity below posted_collateral".to_string(),
            ));
        }
    }
    if let Some(pool) = agent.liquidity_pool {
        if pool < 0 {
            return Err(invalid("liquidity_pool must be non-negative".to_string()));
        }
    }
    if let Some(fraction) = agent.liquidity_allocation_fraction {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(invalid(format!(
                "liquidity_allocation_fraction must be within [0, 1], got {fraction}"
            )));
        }
    }
    for counterparty in agent.limits.bilateral_limits.keys() {
        if !ids.contains(counterparty) {
            return Err(ConfigError::UnknownCounterparty {
                agent: agent.id.clone(),
                counterparty: counterparty.clone(),
            });
        }
    }
    if let Some(limit) = agent.limits.multilateral_limit {
        if limit < 0 {
            return Err(invalid("multilateral_limit must be non-negative".to_string()));
        }
    }
    if let Some(arrivals) = &agent.arrivals {
        let profiles: Vec<&ArrivalProfile> = match arrivals {
            ArrivalSpec::Single(p) => vec![p],
            ArrivalSpec::Bands { urgent, normal, low } => {
                [urgent, normal, low].into_iter().flatten().collect()
            }
        };
        for profile in profiles {
            validate_profile(agent, profile, ids)?;
        }
    }
    Ok(())
}

fn validate_profile(
    agent: &AgentSpec,
    profile: &ArrivalProfile,
    ids: &BTreeSet<String>,
) -> Result<(), ConfigError> {
    let invalid_dist = |message: String| ConfigError::InvalidDistribution {
        agent: agent.id.clone(),
        message,
    };

    if !profile.rate_per_tick.is_finite() || profile.rate_per_tick < 0.0 {
        return Err(invalid_dist(format!(
            "rate_per_tick must be finite and non-negative, got {}",
            profile.rate_per_tick
        )));
    }
    match &profile.amount {
        AmountDist::Uniform { min, max } => {
            if *min < 1 || max < min {
                return Err(invalid_dist(format!(
                    "uniform amount needs 1 <= min <= max, got [{min}, {max}]"
                )));
            }
        }
        AmountDist::Normal { mean, std_dev } => {
            if *mean < 1 || *std_dev < 0 {
                return Err(invalid_dist(format!(
                    "normal amount needs mean >= 1 and std_dev >= 0, got ({mean}, {std_dev})"
                )));
            }
        }
        AmountDist::LogNormal { mu, sigma } => {
            if !mu.is_finite() || !sigma.is_finite() || *sigma < 0.0 {
                return Err(invalid_dist(format!(
                    "log-normal parameters must be finite with sigma >= 0, got ({mu}, {sigma})"
                )));
            }
        }
        AmountDist::Exponential { lambda } => {
            if !lambda.is_finite() || *lambda <= 0.0 {
                return Err(invalid_dist(format!(
                    "exponential lambda must be finite and positive, got {lambda}"
                )));
            }
        }
    }
    if profile.deadline_window.1 < profile.deadline_window.0 {
        return Err(invalid_dist(format!(
            "deadline window max below min: {:?}",
            profile.deadline_window
        )));
    }
    for counterparty in profile.counterparty_weights.keys() {
        if !ids.contains(counterparty) {
            return Err(ConfigError::UnknownCounterparty {
                agent: agent.id.clone(),
                counterparty: counterparty.clone(),
            });
        }
    }
    Ok(())
}

fn validate_scenario_refs(
    event: &ScheduledEvent,
    ids: &BTreeSet<String>,
) -> Result<(), ConfigError> {
    use crate::scenario::ScenarioPayload;

    let check = |agent: &str| -> Result<(), ConfigError> {
        if ids.contains(agent) {
            Ok(())
        } else {
            Err(ConfigError::UnknownCounterparty {
                agent: "<scenario>".to_string(),
                counterparty: agent.to_string(),
            })
        }
    };
    match &event.payload {
        ScenarioPayload::DirectTransfer {
            from_agent,
            to_agent,
            ..
        } => {
            check(from_agent)?;
            check(to_agent)
        }
        ScenarioPayload::CustomTransactionArrival { tx } => {
            check(&tx.sender_id)?;
            check(&tx.receiver_id)
        }
        ScenarioPayload::CollateralAdjustment { agent, .. }
        | ScenarioPayload::AgentArrivalRateChange { agent, .. }
        | ScenarioPayload::DeadlineWindowChange { agent, .. } => check(agent),
        ScenarioPayload::CounterpartyWeightChange { agent, weights } => {
            check(agent)?;
            for counterparty in weights.keys() {
                check(counterparty)?;
            }
            Ok(())
        }
        ScenarioPayload::GlobalArrivalRateChange { .. } => Ok(()),
    }
}
