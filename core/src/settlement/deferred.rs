//! Deferred crediting.
//!
//! In deferred mode, inbound settlement credits accumulate during the tick
//! and land on receiver balances only at the end of it, so an incoming
//! payment can never fund an outgoing payment within the same tick. The
//! accumulator is a `BTreeMap` so application order is sorted by agent id.

use crate::model::event::EventKind;
use crate::model::world::World;
use crate::money::Cents;
use std::collections::BTreeMap;

/// Credits pending application at end of tick.
#[derive(Debug, Default)]
pub struct DeferredCredits {
    pending: BTreeMap<String, (Cents, Vec<String>)>,
}

impl DeferredCredits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, agent_id: &str, amount: Cents, tx_id: &str) {
        let entry = self
            .pending
            .entry(agent_id.to_string())
            .or_insert((0, Vec::new()));
        entry.0 = entry.0.saturating_add(amount);
        entry.1.push(tx_id.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn total_for(&self, agent_id: &str) -> Cents {
        self.pending.get(agent_id).map(|(amt, _)| *amt).unwrap_or(0)
    }

    /// Sum of all pending credits; part of the conservation invariant while
    /// credits are in flight.
    pub fn total_pending(&self) -> Cents {
        self.pending.values().map(|(amt, _)| *amt).sum()
    }

    /// Apply everything in sorted agent order and clear the accumulator.
    pub fn apply_all(&mut self, world: &mut World) -> Vec<EventKind> {
        let mut events = Vec::new();
        let pending = std::mem::take(&mut self.pending);
        for (agent_id, (amount, source_tx_ids)) in pending {
            if let Some(agent) = world.agent_mut(&agent_id) {
                agent.credit(amount);
                events.push(EventKind::DeferredCreditApplied {
                    agent_id,
                    amount,
                    source_tx_ids,
                });
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::agent::Agent;

    #[test]
    fn test_accumulate_and_apply_sorted() {
        let mut world = World::new(vec![
            Agent::new("BANK_A".to_string(), 0, 0),
            Agent::new("BANK_B".to_string(), 0, 0),
        ]);
        let mut dc = DeferredCredits::new();
        dc.accumulate("BANK_B", 300, "tx_2");
        dc.accumulate("BANK_A", 100, "tx_1");
        dc.accumulate("BANK_A", 50, "tx_3");
        assert_eq!(dc.total_for("BANK_A"), 150);
        assert_eq!(dc.total_pending(), 450);

        let events = dc.apply_all(&mut world);
        assert!(dc.is_empty());
        assert_eq!(world.agent("BANK_A").unwrap().balance(), 150);
        assert_eq!(world.agent("BANK_B").unwrap().balance(), 300);
        // Sorted agent order.
        assert!(matches!(
            &events[0],
            EventKind::DeferredCreditApplied { agent_id, .. } if agent_id == "BANK_A"
        ));
    }
}
