//! Evaluation context: compiled symbol table and dense value frame.
//!
//! Field names are resolved once, at policy load, to dense indices; the
//! interpreter reads values by array lookup. Unknown fields therefore fail
//! at load, not mid-simulation. Transaction-scoped fields are visible only
//! to the payment tree; referencing one from a bank or collateral tree is a
//! load error, and the frame guards the same boundary at runtime.
//!
//! User-defined state registers are addressed as `reg:<name>` and resolved
//! dynamically against the agent's register map (unset registers read 0).

use crate::costs::{delay_cost_one_tick, CostRates};
use crate::model::agent::Agent;
use crate::model::transaction::Transaction;
use crate::model::world::World;
use crate::policy::ast::TreeKind;
use std::collections::BTreeMap;
use thiserror::Error;

/// Which entity a field describes; gates visibility per tree kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldScope {
    Transaction,
    Agent,
    System,
}

/// All built-in context fields. Discriminants are the frame indices; the
/// order must match `FIELD_TABLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinField {
    // Transaction
    Amount,
    RemainingAmount,
    SettledAmount,
    ArrivalTick,
    DeadlineTick,
    Priority,
    IsDivisible,
    IsSplitChild,
    TicksToDeadline,
    QueueAge,
    IsPastDeadline,
    IsOverdue,
    OverdueDuration,
    CostDelayThisTxOneTick,
    // Agent
    Balance,
    UnsecuredCap,
    AvailableLiquidity,
    OverdraftAmount,
    IsInOverdraft,
    PostedCollateral,
    CollateralHeadroom,
    MaxCollateralCapacity,
    RemainingCollateralCapacity,
    CollateralUtilization,
    AllocatedLiquidity,
    Queue1Size,
    Queue1Value,
    Headroom,
    Queue2OwnCount,
    Queue2OwnValue,
    Queue2NetPosition,
    ReleaseBudgetRemaining,
    DailyOutflowTotal,
    // System
    CurrentTick,
    CurrentDay,
    TickInDay,
    TicksPerDay,
    TicksRemainingInDay,
    DayProgress,
    IsEodRush,
    Queue2Size,
    Queue2Value,
    TotalAgents,
    CostOverdraftBpsPerTick,
    CostDelayPerTickPerCent,
    CostCollateralBpsPerTick,
    CostSplitFriction,
    CostDeadlinePenalty,
    CostEodPenalty,
}

/// Name → field → scope, in frame-index order.
pub const FIELD_TABLE: &[(&str, BuiltinField, FieldScope)] = &[
    ("amount", BuiltinField::Amount, FieldScope::Transaction),
    ("remaining_amount", BuiltinField::RemainingAmount, FieldScope::Transaction),
    ("settled_amount", BuiltinField::SettledAmount, FieldScope::Transaction),
    ("arrival_tick", BuiltinField::ArrivalTick, FieldScope::Transaction),
    ("deadline_tick", BuiltinField::DeadlineTick, FieldScope::Transaction),
    ("priority", BuiltinField::Priority, FieldScope::Transaction),
    ("is_divisible", BuiltinField::IsDivisible, FieldScope::Transaction),
    ("is_split_child", BuiltinField::IsSplitChild, FieldScope::Transaction),
    ("ticks_to_deadline", BuiltinField::TicksToDeadline, FieldScope::Transaction),
    ("queue_age", BuiltinField::QueueAge, FieldScope::Transaction),
    ("is_past_deadline", BuiltinField::IsPastDeadline, FieldScope::Transaction),
    ("is_overdue", BuiltinField::IsOverdue, FieldScope::Transaction),
    ("overdue_duration", BuiltinField::OverdueDuration, FieldScope::Transaction),
    ("cost_delay_this_tx_one_tick", BuiltinField::CostDelayThisTxOneTick, FieldScope::Transaction),
    ("balance", BuiltinField::Balance, FieldScope::Agent),
    ("unsecured_cap", BuiltinField::UnsecuredCap, FieldScope::Agent),
    ("available_liquidity", BuiltinField::AvailableLiquidity, FieldScope::Agent),
    ("overdraft_amount", BuiltinField::OverdraftAmount, FieldScope::Agent),
    ("is_in_overdraft", BuiltinField::IsInOverdraft, FieldScope::Agent),
    ("posted_collateral", BuiltinField::PostedCollateral, FieldScope::Agent),
    ("collateral_headroom", BuiltinField::CollateralHeadroom, FieldScope::Agent),
    ("max_collateral_capacity", BuiltinField::MaxCollateralCapacity, FieldScope::Agent),
    ("remaining_collateral_capacity", BuiltinField::RemainingCollateralCapacity, FieldScope::Agent),
    ("collateral_utilization", BuiltinField::CollateralUtilization, FieldScope::Agent),
    ("allocated_liquidity", BuiltinField::AllocatedLiquidity, FieldScope::Agent),
    ("queue1_size", BuiltinField::Queue1Size, FieldScope::Agent),
    ("queue1_value", BuiltinField::Queue1Value, FieldScope::Agent),
    ("headroom", BuiltinField::Headroom, FieldScope::Agent),
    ("queue2_own_count", BuiltinField::Queue2OwnCount, FieldScope::Agent),
    ("queue2_own_value", BuiltinField::Queue2OwnValue, FieldScope::Agent),
    ("queue2_net_position", BuiltinField::Queue2NetPosition, FieldScope::Agent),
    ("release_budget_remaining", BuiltinField::ReleaseBudgetRemaining, FieldScope::Agent),
    ("daily_outflow_total", BuiltinField::DailyOutflowTotal, FieldScope::Agent),
    ("current_tick", BuiltinField::CurrentTick, FieldScope::System),
    ("current_day", BuiltinField::CurrentDay, FieldScope::System),
    ("tick_in_day", BuiltinField::TickInDay, FieldScope::System),
    ("ticks_per_day", BuiltinField::TicksPerDay, FieldScope::System),
    ("ticks_remaining_in_day", BuiltinField::TicksRemainingInDay, FieldScope::System),
    ("day_progress", BuiltinField::DayProgress, FieldScope::System),
    ("is_eod_rush", BuiltinField::IsEodRush, FieldScope::System),
    ("queue2_size", BuiltinField::Queue2Size, FieldScope::System),
    ("queue2_value", BuiltinField::Queue2Value, FieldScope::System),
    ("total_agents", BuiltinField::TotalAgents, FieldScope::System),
    ("cost_overdraft_bps_per_tick", BuiltinField::CostOverdraftBpsPerTick, FieldScope::System),
    ("cost_delay_per_tick_per_cent", BuiltinField::CostDelayPerTickPerCent, FieldScope::System),
    ("cost_collateral_bps_per_tick", BuiltinField::CostCollateralBpsPerTick, FieldScope::System),
    ("cost_split_friction", BuiltinField::CostSplitFriction, FieldScope::System),
    ("cost_deadline_penalty", BuiltinField::CostDeadlinePenalty, FieldScope::System),
    ("cost_eod_penalty", BuiltinField::CostEodPenalty, FieldScope::System),
];

pub const NUM_FIELDS: usize = FIELD_TABLE.len();

/// Prefix addressing a user state register instead of a built-in field.
pub const REGISTER_PREFIX: &str = "reg:";

/// A resolved field reference, produced at policy load.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRef {
    Builtin(BuiltinField),
    Register(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum FieldError {
    #[error("unknown field '{0}'")]
    Unknown(String),

    #[error("field '{field}' is not available in {tree}")]
    OutOfScope { field: String, tree: &'static str },
}

/// Resolve a field name for use inside a tree of the given kind.
pub fn resolve_field(name: &str, kind: TreeKind) -> Result<FieldRef, FieldError> {
    if let Some(register) = name.strip_prefix(REGISTER_PREFIX) {
        return Ok(FieldRef::Register(register.to_string()));
    }
    let entry = FIELD_TABLE
        .iter()
        .find(|(field_name, _, _)| *field_name == name)
        .ok_or_else(|| FieldError::Unknown(name.to_string()))?;
    if entry.2 == FieldScope::Transaction && kind != TreeKind::Payment {
        return Err(FieldError::OutOfScope {
            field: name.to_string(),
            tree: kind.name(),
        });
    }
    Ok(FieldRef::Builtin(entry.1))
}

pub fn field_name(field: BuiltinField) -> &'static str {
    FIELD_TABLE[field as usize].0
}

/// System-level inputs to a frame, constant across one tick.
#[derive(Debug, Clone, Copy)]
pub struct SystemView {
    pub tick: u64,
    pub ticks_per_day: u64,
    pub eod_rush_threshold: f64,
}

impl SystemView {
    pub fn day(&self) -> u64 {
        self.tick / self.ticks_per_day
    }

    pub fn tick_in_day(&self) -> u64 {
        self.tick % self.ticks_per_day
    }
}

/// Dense value frame for one evaluation.
#[derive(Debug)]
pub struct EvalFrame<'a> {
    values: [f64; NUM_FIELDS],
    has_tx: bool,
    registers: &'a BTreeMap<String, f64>,
}

impl<'a> EvalFrame<'a> {
    /// Build the agent-level frame (bank and collateral trees).
    pub fn for_agent(
        world: &World,
        agent: &'a Agent,
        sys: SystemView,
        rates: &CostRates,
    ) -> Self {
        let mut values = [0.0f64; NUM_FIELDS];
        fill_agent_fields(&mut values, world, agent);
        fill_system_fields(&mut values, world, sys, rates);
        Self {
            values,
            has_tx: false,
            registers: agent.state_registers(),
        }
    }

    /// Build the transaction-level frame (payment tree).
    pub fn for_transaction(
        world: &World,
        agent: &'a Agent,
        tx: &Transaction,
        sys: SystemView,
        rates: &CostRates,
    ) -> Self {
        let mut frame = Self::for_agent(world, agent, sys, rates);
        frame.has_tx = true;
        let v = &mut frame.values;

        v[BuiltinField::Amount as usize] = tx.amount() as f64;
        v[BuiltinField::RemainingAmount as usize] = tx.remaining_amount() as f64;
        v[BuiltinField::SettledAmount as usize] = tx.settled_amount() as f64;
        v[BuiltinField::ArrivalTick as usize] = tx.arrival_tick() as f64;
        v[BuiltinField::DeadlineTick as usize] = tx.deadline_tick() as f64;
        v[BuiltinField::Priority as usize] = tx.priority() as f64;
        v[BuiltinField::IsDivisible as usize] = bool_field(tx.is_divisible());
        v[BuiltinField::IsSplitChild as usize] = bool_field(tx.parent_tx_id().is_some());
        v[BuiltinField::TicksToDeadline as usize] =
            tx.deadline_tick() as f64 - sys.tick as f64;
        v[BuiltinField::QueueAge as usize] = sys.tick.saturating_sub(tx.arrival_tick()) as f64;
        v[BuiltinField::IsPastDeadline as usize] = bool_field(tx.is_past_deadline(sys.tick));
        v[BuiltinField::IsOverdue as usize] = bool_field(tx.is_overdue());
        v[BuiltinField::OverdueDuration as usize] = tx
            .overdue_since()
            .map(|since| sys.tick.saturating_sub(since))
            .unwrap_or(0) as f64;
        v[BuiltinField::CostDelayThisTxOneTick as usize] =
            delay_cost_one_tick(tx.remaining_amount(), tx.priority(), tx.is_overdue(), rates)
                as f64;

        frame
    }

    pub fn get(&self, field: &FieldRef) -> Result<f64, FieldError> {
        match field {
            FieldRef::Builtin(builtin) => {
                let idx = *builtin as usize;
                if !self.has_tx && FIELD_TABLE[idx].2 == FieldScope::Transaction {
                    return Err(FieldError::OutOfScope {
                        field: FIELD_TABLE[idx].0.to_string(),
                        tree: "an agent-level tree",
                    });
                }
                Ok(self.values[idx])
            }
            FieldRef::Register(name) => {
                Ok(self.registers.get(name).copied().unwrap_or(0.0))
            }
        }
    }
}

fn bool_field(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn fill_agent_fields(v: &mut [f64; NUM_FIELDS], world: &World, agent: &Agent) {
    let queue1_value = world.queue1_value(agent.id()) as f64;
    let available = agent.available_liquidity() as f64;

    v[BuiltinField::Balance as usize] = agent.balance() as f64;
    v[BuiltinField::UnsecuredCap as usize] = agent.unsecured_cap() as f64;
    v[BuiltinField::AvailableLiquidity as usize] = available;
    v[BuiltinField::OverdraftAmount as usize] = agent.overdraft_amount() as f64;
    v[BuiltinField::IsInOverdraft as usize] = bool_field(agent.is_in_overdraft());
    v[BuiltinField::PostedCollateral as usize] = agent.posted_collateral() as f64;
    v[BuiltinField::CollateralHeadroom as usize] = agent.collateral_headroom() as f64;
    v[BuiltinField::MaxCollateralCapacity as usize] = agent.max_collateral_capacity() as f64;
    v[BuiltinField::RemainingCollateralCapacity as usize] =
        agent.remaining_collateral_capacity() as f64;
    v[BuiltinField::CollateralUtilization as usize] = if agent.max_collateral_capacity() > 0 {
        agent.posted_collateral() as f64 / agent.max_collateral_capacity() as f64
    } else {
        0.0
    };
    v[BuiltinField::AllocatedLiquidity as usize] = agent.allocated_liquidity() as f64;
    v[BuiltinField::Queue1Size as usize] = agent.queue1_len() as f64;
    v[BuiltinField::Queue1Value as usize] = queue1_value;
    v[BuiltinField::Headroom as usize] = available - queue1_value;
    v[BuiltinField::Queue2OwnCount as usize] =
        world.queue2_count_for_sender(agent.id()) as f64;
    v[BuiltinField::Queue2OwnValue as usize] =
        world.queue2_value_for_sender(agent.id()) as f64;
    v[BuiltinField::Queue2NetPosition as usize] =
        world.queue2_net_position(agent.id()) as f64;
    v[BuiltinField::ReleaseBudgetRemaining as usize] = agent
        .release_budget()
        .map(|b| b as f64)
        .unwrap_or(f64::INFINITY);
    v[BuiltinField::DailyOutflowTotal as usize] = agent.daily_outflow_total() as f64;
}

fn fill_system_fields(
    v: &mut [f64; NUM_FIELDS],
    world: &World,
    sys: SystemView,
    rates: &CostRates,
) {
    let tick_in_day = sys.tick_in_day();
    let day_progress = tick_in_day as f64 / sys.ticks_per_day as f64;

    v[BuiltinField::CurrentTick as usize] = sys.tick as f64;
    v[BuiltinField::CurrentDay as usize] = sys.day() as f64;
    v[BuiltinField::TickInDay as usize] = tick_in_day as f64;
    v[BuiltinField::TicksPerDay as usize] = sys.ticks_per_day as f64;
    v[BuiltinField::TicksRemainingInDay as usize] =
        (sys.ticks_per_day - tick_in_day) as f64;
    v[BuiltinField::DayProgress as usize] = day_progress;
    v[BuiltinField::IsEodRush as usize] = bool_field(day_progress >= sys.eod_rush_threshold);
    v[BuiltinField::Queue2Size as usize] = world.queue2_len() as f64;
    v[BuiltinField::Queue2Value as usize] = world.queue2_value() as f64;
    v[BuiltinField::TotalAgents as usize] = world.num_agents() as f64;
    v[BuiltinField::CostOverdraftBpsPerTick as usize] = rates.overdraft_bps_per_tick;
    v[BuiltinField::CostDelayPerTickPerCent as usize] = rates.delay_cost_per_tick_per_cent;
    v[BuiltinField::CostCollateralBpsPerTick as usize] = rates.collateral_cost_per_tick_bps;
    v[BuiltinField::CostSplitFriction as usize] = rates.split_friction_cost as f64;
    v[BuiltinField::CostDeadlinePenalty as usize] = rates.deadline_penalty as f64;
    v[BuiltinField::CostEodPenalty as usize] = rates.eod_penalty_per_transaction as f64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::agent::Agent;

    #[test]
    fn test_field_table_matches_enum_order() {
        for (idx, (name, field, _)) in FIELD_TABLE.iter().enumerate() {
            assert_eq!(
                *field as usize, idx,
                "field '{name}' out of order in FIELD_TABLE"
            );
        }
        let mut names: Vec<&str> = FIELD_TABLE.iter().map(|(n, _, _)| *n).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), NUM_FIELDS, "duplicate field names");
    }

    #[test]
    fn test_resolve_rejects_unknown() {
        assert_eq!(
            resolve_field("no_such_field", TreeKind::Payment),
            Err(FieldError::Unknown("no_such_field".to_string()))
        );
    }

    #[test]
    fn test_resolve_scopes_tx_fields_to_payment_tree() {
        assert!(resolve_field("amount", TreeKind::Payment).is_ok());
        assert!(matches!(
            resolve_field("amount", TreeKind::Bank),
            Err(FieldError::OutOfScope { .. })
        ));
        assert!(resolve_field("balance", TreeKind::Bank).is_ok());
    }

    #[test]
    fn test_register_fields_resolve_everywhere() {
        for kind in [
            TreeKind::Payment,
            TreeKind::Bank,
            TreeKind::StrategicCollateral,
            TreeKind::EndOfTickCollateral,
        ] {
            assert_eq!(
                resolve_field("reg:counter", kind),
                Ok(FieldRef::Register("counter".to_string()))
            );
        }
    }

    #[test]
    fn test_agent_frame_blocks_tx_fields() {
        let world = World::new(vec![Agent::new("A".to_string(), 500, 0)]);
        let agent = world.agent("A").unwrap();
        let sys = SystemView {
            tick: 0,
            ticks_per_day: 100,
            eod_rush_threshold: 0.8,
        };
        let frame = EvalFrame::for_agent(&world, agent, sys, &CostRates::default());
        assert_eq!(
            frame.get(&FieldRef::Builtin(BuiltinField::Balance)).unwrap(),
            500.0
        );
        assert!(frame
            .get(&FieldRef::Builtin(BuiltinField::Amount))
            .is_err());
    }

    #[test]
    fn test_unset_register_reads_zero() {
        let world = World::new(vec![Agent::new("A".to_string(), 0, 0)]);
        let agent = world.agent("A").unwrap();
        let sys = SystemView {
            tick: 0,
            ticks_per_day: 100,
            eod_rush_threshold: 0.8,
        };
        let frame = EvalFrame::for_agent(&world, agent, sys, &CostRates::default());
        assert_eq!(
            frame.get(&FieldRef::Register("unset".to_string())).unwrap(),
            0.0
        );
    }
}
