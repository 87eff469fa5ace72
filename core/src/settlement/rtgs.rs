//! RTGS gross settlement and the Queue-2 release scan.
//!
//! A released payment settles immediately when the sender's available
//! liquidity covers the full remainder and no daily limit would be
//! breached; otherwise it queues. The release scan retries queued payments
//! under current balances in priority-mode order.

use crate::costs::{priority_band, PriorityBand};
use crate::model::event::EventKind;
use crate::model::world::World;
use crate::money::Cents;
use crate::settlement::deferred::DeferredCredits;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error, PartialEq)]
pub enum RtgsError {
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),
}

/// Deadline-driven priority escalation for Queue-2 entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub enabled: bool,
    /// Escalation curve; only "linear" is defined.
    pub curve: String,
    /// Boost starts once `ticks_to_deadline` drops below this.
    pub start_escalating_at_ticks: u64,
    /// Maximum priority boost at the deadline.
    pub max_boost: u8,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            curve: "linear".to_string(),
            start_escalating_at_ticks: 10,
            max_boost: 3,
        }
    }
}

impl EscalationConfig {
    /// Linear boost: 0 at `start_escalating_at_ticks` from the deadline,
    /// `max_boost` at (or past) it.
    pub fn boost(&self, ticks_to_deadline: i64) -> u8 {
        if !self.enabled || self.start_escalating_at_ticks == 0 {
            return 0;
        }
        let start = self.start_escalating_at_ticks as i64;
        if ticks_to_deadline >= start {
            return 0;
        }
        let progressed = (start - ticks_to_deadline.max(0)) as f64 / start as f64;
        (self.max_boost as f64 * progressed).round() as u8
    }
}

/// Outcome of submitting a released payment.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    Settled,
    Queued,
}

/// Attempt immediate gross settlement of a released payment.
///
/// Debits the sender, credits the receiver (or the deferred accumulator),
/// and marks the transaction settled. Insufficient liquidity or a daily
/// limit breach queues the payment instead; no state changes in that case.
pub fn submit_release(
    world: &mut World,
    tx_id: &str,
    tick: u64,
    deferred: Option<&mut DeferredCredits>,
) -> Result<ReleaseOutcome, RtgsError> {
    let (sender_id, receiver_id, amount) = {
        let tx = world
            .transaction(tx_id)
            .ok_or_else(|| RtgsError::TransactionNotFound(tx_id.to_string()))?;
        (
            tx.sender_id().to_string(),
            tx.receiver_id().to_string(),
            tx.remaining_amount(),
        )
    };

    let can_settle = {
        let sender = world
            .agent(&sender_id)
            .ok_or_else(|| RtgsError::AgentNotFound(sender_id.clone()))?;
        sender.can_pay(amount) && !sender.would_breach_limits(&receiver_id, amount)
    };

    if !can_settle {
        world.push_queue2(tx_id, tick);
        return Ok(ReleaseOutcome::Queued);
    }

    settle_gross(world, tx_id, &sender_id, &receiver_id, amount, tick, deferred);
    Ok(ReleaseOutcome::Settled)
}

/// Perform the debit/credit/settle triple for a full-remainder settlement.
pub(crate) fn settle_gross(
    world: &mut World,
    tx_id: &str,
    sender_id: &str,
    receiver_id: &str,
    amount: Cents,
    tick: u64,
    deferred: Option<&mut DeferredCredits>,
) {
    {
        let sender = world.agent_mut(sender_id).expect("sender validated");
        sender
            .debit(amount)
            .expect("liquidity checked before settle_gross");
        sender.record_outflow(receiver_id, amount);
    }
    match deferred {
        Some(dc) => dc.accumulate(receiver_id, amount, tx_id),
        None => world
            .agent_mut(receiver_id)
            .expect("receiver validated")
            .credit(amount),
    }
    world
        .transaction_mut(tx_id)
        .expect("transaction validated")
        .settle(amount, tick)
        .expect("amount equals remainder");
    trace!(tx_id, sender_id, receiver_id, amount, "gross settlement");
}

/// Queue-2 scan order: with priority mode, Urgent → Normal → Low by
/// escalation-boosted priority band, FIFO by entry within a band; without
/// it, pure entry order.
pub fn queue2_scan_order(
    world: &World,
    tick: u64,
    priority_mode: bool,
    escalation: &EscalationConfig,
) -> Vec<String> {
    let mut keyed: Vec<(u8, u64, String)> = world
        .queue2()
        .iter()
        .filter_map(|entry| {
            let tx = world.transaction(&entry.tx_id)?;
            let band_rank = if priority_mode {
                let ttd = tx.deadline_tick() as i64 - tick as i64;
                let effective = tx.priority().saturating_add(escalation.boost(ttd)).min(10);
                match priority_band(effective) {
                    PriorityBand::Urgent => 0,
                    PriorityBand::Normal => 1,
                    PriorityBand::Low => 2,
                }
            } else {
                0
            };
            Some((band_rank, entry.entry_seq, entry.tx_id.clone()))
        })
        .collect();
    keyed.sort();
    keyed.into_iter().map(|(_, _, tx_id)| tx_id).collect()
}

/// Result of one release scan over Queue 2.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub settled_count: usize,
    pub settled_value: Cents,
    pub events: Vec<EventKind>,
}

/// Retry queued payments under current balances.
///
/// Settled entries leave the queue; everything else stays put in its
/// original entry order.
pub fn release_scan(
    world: &mut World,
    tick: u64,
    priority_mode: bool,
    escalation: &EscalationConfig,
    mut deferred: Option<&mut DeferredCredits>,
) -> ScanResult {
    let mut result = ScanResult::default();
    let order = queue2_scan_order(world, tick, priority_mode, escalation);
    let mut settled = std::collections::BTreeSet::new();

    for tx_id in order {
        let Some(tx) = world.transaction(&tx_id) else {
            continue;
        };
        if !tx.is_live() {
            settled.insert(tx_id);
            continue;
        }
        let sender_id = tx.sender_id().to_string();
        let receiver_id = tx.receiver_id().to_string();
        let amount = tx.remaining_amount();

        let can_settle = world
            .agent(&sender_id)
            .map(|s| s.can_pay(amount) && !s.would_breach_limits(&receiver_id, amount))
            .unwrap_or(false);
        if !can_settle {
            continue;
        }

        settle_gross(
            world,
            &tx_id,
            &sender_id,
            &receiver_id,
            amount,
            tick,
            deferred.as_deref_mut(),
        );
        result.settled_count += 1;
        result.settled_value += amount;
        result.events.push(EventKind::Queue2LiquidityRelease {
            tx_id: tx_id.clone(),
            sender_id,
            receiver_id,
            amount,
        });
        settled.insert(tx_id);
    }

    world.remove_from_queue2(&settled);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::agent::Agent;
    use crate::model::transaction::{Transaction, TxStatus};

    fn world(balance_a: Cents) -> World {
        World::new(vec![
            Agent::new("BANK_A".to_string(), balance_a, 0),
            Agent::new("BANK_B".to_string(), 0, 0),
        ])
    }

    fn add_tx(world: &mut World, id: &str, from: &str, to: &str, amount: Cents) {
        world.insert_transaction(Transaction::new(
            id.to_string(),
            from.to_string(),
            to.to_string(),
            amount,
            0,
            100,
        ));
    }

    #[test]
    fn test_submit_settles_with_liquidity() {
        let mut w = world(1_000_000);
        add_tx(&mut w, "tx_1", "BANK_A", "BANK_B", 400_000);
        let outcome = submit_release(&mut w, "tx_1", 0, None).unwrap();
        assert_eq!(outcome, ReleaseOutcome::Settled);
        assert_eq!(w.agent("BANK_A").unwrap().balance(), 600_000);
        assert_eq!(w.agent("BANK_B").unwrap().balance(), 400_000);
        assert!(w.transaction("tx_1").unwrap().is_fully_settled());
    }

    #[test]
    fn test_submit_queues_without_liquidity() {
        let mut w = world(100_000);
        add_tx(&mut w, "tx_1", "BANK_A", "BANK_B", 400_000);
        let outcome = submit_release(&mut w, "tx_1", 0, None).unwrap();
        assert_eq!(outcome, ReleaseOutcome::Queued);
        assert_eq!(w.queue2_len(), 1);
        assert_eq!(w.agent("BANK_A").unwrap().balance(), 100_000);
        assert_eq!(
            w.transaction("tx_1").unwrap().status(),
            &TxStatus::InQueue2
        );
    }

    #[test]
    fn test_submit_queues_on_bilateral_limit() {
        let mut w = world(1_000_000);
        w.agent_mut("BANK_A").unwrap().set_bilateral_limits(
            std::collections::BTreeMap::from([("BANK_B".to_string(), 300_000)]),
        );
        add_tx(&mut w, "tx_1", "BANK_A", "BANK_B", 400_000);
        assert_eq!(
            submit_release(&mut w, "tx_1", 0, None).unwrap(),
            ReleaseOutcome::Queued
        );
    }

    #[test]
    fn test_deferred_credit_not_applied_immediately() {
        let mut w = world(1_000_000);
        add_tx(&mut w, "tx_1", "BANK_A", "BANK_B", 400_000);
        let mut dc = DeferredCredits::new();
        submit_release(&mut w, "tx_1", 0, Some(&mut dc)).unwrap();
        assert_eq!(w.agent("BANK_A").unwrap().balance(), 600_000);
        assert_eq!(w.agent("BANK_B").unwrap().balance(), 0);
        assert_eq!(dc.total_for("BANK_B"), 400_000);
    }

    #[test]
    fn test_release_scan_settles_after_funding() {
        let mut w = world(0);
        add_tx(&mut w, "tx_1", "BANK_A", "BANK_B", 400_000);
        submit_release(&mut w, "tx_1", 0, None).unwrap();
        assert_eq!(w.queue2_len(), 1);

        w.agent_mut("BANK_A").unwrap().credit(500_000);
        let result = release_scan(&mut w, 1, false, &EscalationConfig::default(), None);
        assert_eq!(result.settled_count, 1);
        assert_eq!(result.settled_value, 400_000);
        assert_eq!(w.queue2_len(), 0);
        assert_eq!(result.events.len(), 1);
    }

    #[test]
    fn test_scan_order_priority_bands() {
        let mut w = world(0);
        add_tx(&mut w, "tx_low", "BANK_A", "BANK_B", 100);
        add_tx(&mut w, "tx_urgent", "BANK_A", "BANK_B", 100);
        w.transaction_mut("tx_low").unwrap().set_priority(2);
        w.transaction_mut("tx_urgent").unwrap().set_priority(9);
        w.push_queue2("tx_low", 0);
        w.push_queue2("tx_urgent", 0);

        let fifo = queue2_scan_order(&w, 0, false, &EscalationConfig::default());
        assert_eq!(fifo, vec!["tx_low", "tx_urgent"]);

        let prioritized = queue2_scan_order(&w, 0, true, &EscalationConfig::default());
        assert_eq!(prioritized, vec!["tx_urgent", "tx_low"]);
    }

    #[test]
    fn test_escalation_boosts_near_deadline() {
        let cfg = EscalationConfig {
            enabled: true,
            curve: "linear".to_string(),
            start_escalating_at_ticks: 10,
            max_boost: 4,
        };
        assert_eq!(cfg.boost(10), 0);
        assert_eq!(cfg.boost(5), 2);
        assert_eq!(cfg.boost(0), 4);
        // Past deadline stays at max.
        assert_eq!(cfg.boost(-3), 4);
    }
}
