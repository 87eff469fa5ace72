//! SimCash core: deterministic RTGS settlement simulator.
//!
//! A tick-driven state machine that generates payment arrivals from seeded
//! stochastic processes, routes them through per-agent decision-tree
//! policies, settles them through an RTGS engine with liquidity-saving
//! mechanisms (bilateral offsetting and multilateral cycle settlement),
//! accrues costs in integer cents, and emits a totally-ordered event stream
//! sufficient for byte-identical replay.
//!
//! # Architecture
//!
//! - **money / time**: integer-cent arithmetic and the tick/day clock
//! - **rng**: seeded xorshift64* with SHA-256 sub-stream derivation
//! - **model**: transactions, agents, world state, events
//! - **arrivals**: Poisson arrival generation per agent
//! - **policy**: JSON decision-tree DSL, compiled and interpreted
//! - **settlement**: RTGS, entry-disposition offsetting, LSM, deferred credits
//! - **costs**: per-tick cost accrual
//! - **scenario**: scheduled interventions
//! - **engine**: the orchestrating tick loop and query surface
//!
//! # Critical invariants
//!
//! 1. Every monetary value is an `i64` number of cents.
//! 2. Same seed and configuration → byte-identical event stream.
//! 3. No iteration over hash-ordered structures; all maps are sorted.

pub mod arrivals;
pub mod config;
pub mod costs;
pub mod engine;
pub mod model;
pub mod money;
pub mod policy;
pub mod rng;
pub mod scenario;
pub mod settlement;
pub mod time;

pub use arrivals::{AmountDist, ArrivalProfile, ArrivalSpec, PriorityDist};
pub use config::{AgentLimits, AgentSpec, ConfigError, Queue1Ordering, SimConfig};
pub use costs::{
    priority_band, CostBreakdown, CostRates, CostTotals, PriorityBand, PriorityDelayMultipliers,
};
pub use engine::{
    replay_balances, DayStats, Engine, RunOutcome, SimError, TickSummary,
};
pub use model::{
    Agent, AgentError, Event, EventKind, EventLog, EventRecord, Transaction, TransactionError,
    TxStatus, World,
};
pub use money::Cents;
pub use policy::{PolicyDoc, PolicyError};
pub use rng::{substream_seed, SeededRng};
pub use scenario::{Schedule, ScenarioPayload, ScheduledEvent};
pub use settlement::lsm::LsmConfig;
pub use settlement::rtgs::EscalationConfig;
pub use time::SimClock;
