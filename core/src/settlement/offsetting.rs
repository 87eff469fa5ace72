//! Entry-disposition offsetting.
//!
//! When a payment enters Queue 2 (and the feature is enabled), the queue is
//! probed for the oldest opposing entry on the reverse of the same pair.
//! The two legs cancel at the minimum of their remainders; since the legs
//! are equal and opposite, no net liquidity moves and balances are
//! untouched. The residual side stays queued.

use crate::model::event::EventKind;
use crate::model::world::World;
use std::collections::BTreeSet;

/// Probe for an opposing entry and offset against it.
///
/// `entering_tx_id` must already be present in Queue 2. Returns the emitted
/// event when an offset happened.
pub fn entry_disposition_probe(
    world: &mut World,
    entering_tx_id: &str,
    tick: u64,
) -> Option<EventKind> {
    let (sender_id, receiver_id, entering_remaining) = {
        let tx = world.transaction(entering_tx_id)?;
        (
            tx.sender_id().to_string(),
            tx.receiver_id().to_string(),
            tx.remaining_amount(),
        )
    };

    // Oldest live opposing entry on the reverse pair, by entry order.
    let opposing_tx_id = world
        .queue2()
        .iter()
        .filter(|entry| entry.tx_id != entering_tx_id)
        .filter_map(|entry| world.transaction(&entry.tx_id).map(|tx| (entry, tx)))
        .find(|(_, tx)| {
            tx.is_live() && tx.sender_id() == receiver_id && tx.receiver_id() == sender_id
        })
        .map(|(entry, _)| entry.tx_id.clone())?;

    let opposing_remaining = world.transaction(&opposing_tx_id)?.remaining_amount();
    let offset = entering_remaining.min(opposing_remaining);
    if offset <= 0 {
        return None;
    }

    // Equal and opposite legs: settle both, move no money. Outflow counters
    // still advance on both sides.
    world
        .transaction_mut(entering_tx_id)
        .expect("entering tx present")
        .settle(offset, tick)
        .expect("offset bounded by remainder");
    world
        .transaction_mut(&opposing_tx_id)
        .expect("opposing tx present")
        .settle(offset, tick)
        .expect("offset bounded by remainder");
    world
        .agent_mut(&sender_id)
        .expect("sender present")
        .record_outflow(&receiver_id, offset);
    world
        .agent_mut(&receiver_id)
        .expect("receiver present")
        .record_outflow(&sender_id, offset);

    // Fully offset entries leave the queue.
    let mut drained = BTreeSet::new();
    for tx_id in [entering_tx_id, opposing_tx_id.as_str()] {
        if world
            .transaction(tx_id)
            .map(|tx| tx.is_fully_settled())
            .unwrap_or(false)
        {
            drained.insert(tx_id.to_string());
        }
    }
    world.remove_from_queue2(&drained);

    Some(EventKind::EntryDispositionOffset {
        entering_tx_id: entering_tx_id.to_string(),
        opposing_tx_id,
        sender_id,
        receiver_id,
        amount: offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::agent::Agent;
    use crate::model::transaction::Transaction;
    use crate::money::Cents;

    fn world_with_pair(amount_ab: Cents, amount_ba: Cents) -> World {
        let mut w = World::new(vec![
            Agent::new("BANK_A".to_string(), 0, 0),
            Agent::new("BANK_B".to_string(), 0, 0),
        ]);
        w.insert_transaction(Transaction::new(
            "tx_ba".to_string(),
            "BANK_B".to_string(),
            "BANK_A".to_string(),
            amount_ba,
            0,
            100,
        ));
        w.push_queue2("tx_ba", 0);
        w.insert_transaction(Transaction::new(
            "tx_ab".to_string(),
            "BANK_A".to_string(),
            "BANK_B".to_string(),
            amount_ab,
            0,
            100,
        ));
        w.push_queue2("tx_ab", 0);
        w
    }

    #[test]
    fn test_equal_amounts_clear_both() {
        let mut w = world_with_pair(500, 500);
        let event = entry_disposition_probe(&mut w, "tx_ab", 0).unwrap();
        match event {
            EventKind::EntryDispositionOffset { amount, .. } => assert_eq!(amount, 500),
            _ => panic!("wrong event"),
        }
        assert_eq!(w.queue2_len(), 0);
        assert!(w.transaction("tx_ab").unwrap().is_fully_settled());
        assert!(w.transaction("tx_ba").unwrap().is_fully_settled());
        // No balance movement.
        assert_eq!(w.agent("BANK_A").unwrap().balance(), 0);
        assert_eq!(w.agent("BANK_B").unwrap().balance(), 0);
    }

    #[test]
    fn test_residual_stays_queued() {
        let mut w = world_with_pair(800, 500);
        entry_disposition_probe(&mut w, "tx_ab", 0).unwrap();
        assert_eq!(w.queue2_len(), 1);
        assert_eq!(w.transaction("tx_ab").unwrap().remaining_amount(), 300);
        assert!(w.transaction("tx_ba").unwrap().is_fully_settled());
    }

    #[test]
    fn test_no_opposing_entry_no_offset() {
        let mut w = World::new(vec![
            Agent::new("BANK_A".to_string(), 0, 0),
            Agent::new("BANK_B".to_string(), 0, 0),
        ]);
        w.insert_transaction(Transaction::new(
            "tx_ab".to_string(),
            "BANK_A".to_string(),
            "BANK_B".to_string(),
            500,
            0,
            100,
        ));
        w.push_queue2("tx_ab", 0);
        assert!(entry_disposition_probe(&mut w, "tx_ab", 0).is_none());
        assert_eq!(w.queue2_len(), 1);
    }
}
