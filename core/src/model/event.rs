//! Event model and log.
//!
//! Every observable state change is recorded as a typed event, totally
//! ordered by `(tick, intra_tick_seq)`. The log is append-only and is the
//! canonical replay source: any field a display layer needs is carried in
//! the event payload, and the JSON-line wire record round-trips losslessly.

use crate::costs::CostBreakdown;
use crate::money::Cents;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typed event payload.
///
/// Serialized adjacently tagged so the wire record exposes the `event_type`
/// discriminator next to a structured `details` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "details")]
pub enum EventKind {
    /// New transaction entered the sender's Queue 1.
    Arrival {
        tx_id: String,
        sender_id: String,
        receiver_id: String,
        amount: Cents,
        deadline_tick: u64,
        priority: u8,
        divisible: bool,
    },

    /// Payment tree released a transaction toward settlement.
    PolicySubmit { agent_id: String, tx_id: String },

    /// Payment tree held a transaction in Queue 1.
    PolicyHold {
        agent_id: String,
        tx_id: String,
        reason: String,
    },

    /// Payment tree dropped a transaction.
    PolicyDrop {
        agent_id: String,
        tx_id: String,
        reason: String,
    },

    /// Payment tree split a transaction into children.
    PolicySplit {
        agent_id: String,
        tx_id: String,
        parts: u32,
        child_ids: Vec<String>,
        friction_cost: Cents,
    },

    /// Payment tree changed a transaction's priority in place.
    PolicyReprioritize {
        agent_id: String,
        tx_id: String,
        old_priority: u8,
        new_priority: u8,
    },

    /// A tree evaluation failed at runtime; the decision fell back to Hold.
    PolicyEvaluationError {
        agent_id: String,
        tx_id: Option<String>,
        tree: String,
        message: String,
    },

    /// Settled immediately on release, full remaining amount.
    RtgsImmediateSettlement {
        tx_id: String,
        sender_id: String,
        receiver_id: String,
        amount: Cents,
    },

    /// Settled out of Queue 2 during a liquidity release scan.
    Queue2LiquidityRelease {
        tx_id: String,
        sender_id: String,
        receiver_id: String,
        amount: Cents,
    },

    /// Offset against an opposing entry at Queue 2 entry time.
    EntryDispositionOffset {
        entering_tx_id: String,
        opposing_tx_id: String,
        sender_id: String,
        receiver_id: String,
        amount: Cents,
    },

    /// Bilateral LSM pass netted the flows between one pair of agents.
    LsmBilateralOffset {
        agent_a: String,
        agent_b: String,
        amount_a_to_b: Cents,
        amount_b_to_a: Cents,
        /// The mutually cancelled portion: min of the two gross flows.
        matched_amount: Cents,
        settled_tx_ids: Vec<String>,
    },

    /// Multilateral LSM pass settled a full cycle atomically.
    LsmCycleSettlement {
        /// Cycle members in cycle order, first repeated last.
        agents: Vec<String>,
        tx_ids: Vec<String>,
        total_value: Cents,
        /// Net position per member (positive = net inflow).
        net_positions: BTreeMap<String, Cents>,
    },

    /// Transaction went past its deadline for the first time.
    TransactionWentOverdue {
        tx_id: String,
        agent_id: String,
        deadline_tick: u64,
        penalty: Cents,
    },

    /// Collateral posted by a policy tree or scenario event.
    CollateralPost {
        agent_id: String,
        amount: Cents,
        new_total: Cents,
        source: String,
    },

    /// Collateral withdrawn (amount is post-clamping).
    CollateralWithdraw {
        agent_id: String,
        amount: Cents,
        new_total: Cents,
        source: String,
    },

    /// Per-agent cost accrual for this tick.
    CostAccrual {
        agent_id: String,
        breakdown: CostBreakdown,
        total: Cents,
    },

    /// End-of-day processing.
    EndOfDay {
        day: u64,
        unsettled_count: u64,
        total_penalty: Cents,
    },

    /// A scheduled scenario event was applied.
    ScenarioEventApplied {
        kind: String,
        agent_id: Option<String>,
        details: serde_json::Value,
    },

    /// Deferred inbound credits applied at end of tick.
    DeferredCreditApplied {
        agent_id: String,
        amount: Cents,
        source_tx_ids: Vec<String>,
    },

    /// Integer arithmetic exceeded the i64 range and was saturated.
    NumericSaturation {
        agent_id: Option<String>,
        context: String,
    },
}

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::Arrival { .. } => "Arrival",
            EventKind::PolicySubmit { .. } => "PolicySubmit",
            EventKind::PolicyHold { .. } => "PolicyHold",
            EventKind::PolicyDrop { .. } => "PolicyDrop",
            EventKind::PolicySplit { .. } => "PolicySplit",
            EventKind::PolicyReprioritize { .. } => "PolicyReprioritize",
            EventKind::PolicyEvaluationError { .. } => "PolicyEvaluationError",
            EventKind::RtgsImmediateSettlement { .. } => "RtgsImmediateSettlement",
            EventKind::Queue2LiquidityRelease { .. } => "Queue2LiquidityRelease",
            EventKind::EntryDispositionOffset { .. } => "EntryDispositionOffset",
            EventKind::LsmBilateralOffset { .. } => "LsmBilateralOffset",
            EventKind::LsmCycleSettlement { .. } => "LsmCycleSettlement",
            EventKind::TransactionWentOverdue { .. } => "TransactionWentOverdue",
            EventKind::CollateralPost { .. } => "CollateralPost",
            EventKind::CollateralWithdraw { .. } => "CollateralWithdraw",
            EventKind::CostAccrual { .. } => "CostAccrual",
            EventKind::EndOfDay { .. } => "EndOfDay",
            EventKind::ScenarioEventApplied { .. } => "ScenarioEventApplied",
            EventKind::DeferredCreditApplied { .. } => "DeferredCreditApplied",
            EventKind::NumericSaturation { .. } => "NumericSaturation",
        }
    }

    /// Transaction this event is about, if any.
    pub fn tx_id(&self) -> Option<&str> {
        match self {
            EventKind::Arrival { tx_id, .. }
            | EventKind::PolicySubmit { tx_id, .. }
            | EventKind::PolicyHold { tx_id, .. }
            | EventKind::PolicyDrop { tx_id, .. }
            | EventKind::PolicySplit { tx_id, .. }
            | EventKind::PolicyReprioritize { tx_id, .. }
            | EventKind::RtgsImmediateSettlement { tx_id, .. }
            | EventKind::Queue2LiquidityRelease { tx_id, .. }
            | EventKind::TransactionWentOverdue { tx_id, .. } => Some(tx_id),
            EventKind::EntryDispositionOffset { entering_tx_id, .. } => Some(entering_tx_id),
            EventKind::PolicyEvaluationError { tx_id, .. } => tx_id.as_deref(),
            _ => None,
        }
    }

    /// Primary agent this event is about, if any.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            EventKind::Arrival { sender_id, .. }
            | EventKind::RtgsImmediateSettlement { sender_id, .. }
            | EventKind::Queue2LiquidityRelease { sender_id, .. }
            | EventKind::EntryDispositionOffset { sender_id, .. } => Some(sender_id),
            EventKind::PolicySubmit { agent_id, .. }
            | EventKind::PolicyHold { agent_id, .. }
            | EventKind::PolicyDrop { agent_id, .. }
            | EventKind::PolicySplit { agent_id, .. }
            | EventKind::PolicyReprioritize { agent_id, .. }
            | EventKind::PolicyEvaluationError { agent_id, .. }
            | EventKind::TransactionWentOverdue { agent_id, .. }
            | EventKind::CollateralPost { agent_id, .. }
            | EventKind::CollateralWithdraw { agent_id, .. }
            | EventKind::CostAccrual { agent_id, .. }
            | EventKind::DeferredCreditApplied { agent_id, .. } => Some(agent_id),
            EventKind::LsmBilateralOffset { agent_a, .. } => Some(agent_a),
            EventKind::ScenarioEventApplied { agent_id, .. }
            | EventKind::NumericSaturation { agent_id, .. } => agent_id.as_deref(),
            EventKind::LsmCycleSettlement { .. } | EventKind::EndOfDay { .. } => None,
        }
    }
}

/// One logged event: payload plus its position in the total order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub tick: u64,
    pub day: u64,
    /// Dense 0..N-1 within the tick, assigned at emission.
    pub seq: u64,
    pub kind: EventKind,
}

/// Wire-level record, one JSON line per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub sim_id: String,
    pub tick: u64,
    pub day: u64,
    pub intra_tick_seq: u64,
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// Build the wire record. The event id is deterministic:
    /// `{sim_id}:{tick}:{seq}`.
    pub fn to_record(&self, sim_id: &str) -> EventRecord {
        EventRecord {
            sim_id: sim_id.to_string(),
            tick: self.tick,
            day: self.day,
            intra_tick_seq: self.seq,
            event_id: format!("{sim_id}:{}:{}", self.tick, self.seq),
            tx_id: self.kind.tx_id().map(str::to_string),
            agent_id: self.kind.agent_id().map(str::to_string),
            kind: self.kind.clone(),
        }
    }

    pub fn to_json_line(&self, sim_id: &str) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_record(sim_id))
    }
}

impl EventRecord {
    /// Rebuild the in-memory event; inverse of [`Event::to_record`].
    pub fn to_event(&self) -> Event {
        Event {
            tick: self.tick,
            day: self.day,
            seq: self.intra_tick_seq,
            kind: self.kind.clone(),
        }
    }
}

/// Append-only event log with per-tick slicing.
///
/// Events arrive in `(tick, seq)` order by construction, so tick slices are
/// found by binary search rather than a secondary index.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        debug_assert!(self
            .events
            .last()
            .map(|prev| (prev.tick, prev.seq) < (event.tick, event.seq))
            .unwrap_or(true));
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// All events of one tick, in intra-tick order.
    pub fn events_at_tick(&self, tick: u64) -> &[Event] {
        let start = self.events.partition_point(|e| e.tick < tick);
        let end = self.events.partition_point(|e| e.tick <= tick);
        &self.events[start..end]
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.kind.event_type() == event_type)
            .collect()
    }

    pub fn events_for_tx(&self, tx_id: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.kind.tx_id() == Some(tx_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrival(tick: u64, seq: u64) -> Event {
        Event {
            tick,
            day: 0,
            seq,
            kind: EventKind::Arrival {
                tx_id: "tx_00000001".to_string(),
                sender_id: "BANK_A".to_string(),
                receiver_id: "BANK_B".to_string(),
                amount: 100_000,
                deadline_tick: 20,
                priority: 5,
                divisible: false,
            },
        }
    }

    #[test]
    fn test_record_roundtrip() {
        let event = arrival(7, 2);
        let line = event.to_json_line("sim-1").unwrap();
        let record: EventRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(record.to_event(), event);
        assert_eq!(record.event_id, "sim-1:7:2");
        assert_eq!(record.tx_id.as_deref(), Some("tx_00000001"));
        assert_eq!(record.agent_id.as_deref(), Some("BANK_A"));
    }

    #[test]
    fn test_wire_shape_has_event_type_and_details() {
        let event = arrival(0, 0);
        let line = event.to_json_line("sim-1").unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event_type"], "Arrival");
        assert_eq!(value["details"]["amount"], 100_000);
        assert_eq!(value["intra_tick_seq"], 0);
    }

    #[test]
    fn test_cycle_event_roundtrip() {
        let event = Event {
            tick: 3,
            day: 0,
            seq: 9,
            kind: EventKind::LsmCycleSettlement {
                agents: vec!["A".into(), "B".into(), "C".into(), "A".into()],
                tx_ids: vec!["tx_1".into(), "tx_2".into(), "tx_3".into()],
                total_value: 270,
                net_positions: BTreeMap::from([
                    ("A".to_string(), -10),
                    ("B".to_string(), 20),
                    ("C".to_string(), -10),
                ]),
            },
        };
        let line = event.to_json_line("s").unwrap();
        let record: EventRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(record.to_event(), event);
    }

    #[test]
    fn test_events_at_tick_slicing() {
        let mut log = EventLog::new();
        log.push(arrival(0, 0));
        log.push(arrival(0, 1));
        log.push(arrival(2, 0));
        assert_eq!(log.events_at_tick(0).len(), 2);
        assert_eq!(log.events_at_tick(1).len(), 0);
        assert_eq!(log.events_at_tick(2).len(), 1);
    }

    #[test]
    fn test_events_of_type() {
        let mut log = EventLog::new();
        log.push(arrival(0, 0));
        log.push(Event {
            tick: 0,
            day: 0,
            seq: 1,
            kind: EventKind::EndOfDay {
                day: 0,
                unsettled_count: 0,
                total_penalty: 0,
            },
        });
        assert_eq!(log.events_of_type("Arrival").len(), 1);
        assert_eq!(log.events_of_type("EndOfDay").len(), 1);
    }
}
