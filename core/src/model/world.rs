//! World state: agents, transactions, and the shared RTGS queue.
//!
//! The engine exclusively owns one `World`; settlement and policy phases
//! operate through scoped borrows for the duration of a phase. All maps are
//! `BTreeMap` so that every iteration is in sorted key order; nothing in
//! the simulator may iterate a hash-ordered structure.

use crate::model::agent::Agent;
use crate::model::transaction::{Transaction, TxStatus};
use crate::money::Cents;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entry in the shared RTGS queue (Queue 2).
///
/// `entry_seq` is a world-monotone counter: within a priority band the queue
/// is FIFO by entry, and without priority mode the whole queue is FIFO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue2Entry {
    pub tx_id: String,
    pub entered_tick: u64,
    pub entry_seq: u64,
}

/// Complete mutable simulation state.
#[derive(Debug, Clone)]
pub struct World {
    agents: BTreeMap<String, Agent>,
    transactions: BTreeMap<String, Transaction>,
    queue2: Vec<Queue2Entry>,
    next_entry_seq: u64,
}

impl World {
    pub fn new(agents: Vec<Agent>) -> Self {
        let agents = agents
            .into_iter()
            .map(|a| (a.id().to_string(), a))
            .collect();
        Self {
            agents,
            transactions: BTreeMap::new(),
            queue2: Vec::new(),
            next_entry_seq: 0,
        }
    }

    // ------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn agent_mut(&mut self, id: &str) -> Option<&mut Agent> {
        self.agents.get_mut(id)
    }

    pub fn agents(&self) -> &BTreeMap<String, Agent> {
        &self.agents
    }

    /// Agent ids in sorted order, the canonical iteration order for every
    /// per-agent phase.
    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    /// Sum of all settlement balances; constant under settlement, shifted
    /// only by scenario events that inject or drain liquidity.
    pub fn total_balance(&self) -> Cents {
        self.agents.values().map(|a| a.balance()).sum()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn transaction(&self, id: &str) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    pub fn transaction_mut(&mut self, id: &str) -> Option<&mut Transaction> {
        self.transactions.get_mut(id)
    }

    pub fn transactions(&self) -> &BTreeMap<String, Transaction> {
        &self.transactions
    }

    pub fn insert_transaction(&mut self, tx: Transaction) {
        let id = tx.id().to_string();
        debug_assert!(
            !self.transactions.contains_key(&id),
            "duplicate transaction id {id}"
        );
        self.transactions.insert(id, tx);
    }

    // ------------------------------------------------------------------
    // Queue 2
    // ------------------------------------------------------------------

    pub fn queue2(&self) -> &[Queue2Entry] {
        &self.queue2
    }

    pub fn queue2_len(&self) -> usize {
        self.queue2.len()
    }

    /// Append a transaction to the RTGS queue and stamp its status.
    pub fn push_queue2(&mut self, tx_id: &str, tick: u64) {
        debug_assert!(self.transactions.contains_key(tx_id));
        debug_assert!(
            !self.queue2.iter().any(|e| e.tx_id == tx_id),
            "transaction {tx_id} already in queue 2"
        );
        self.queue2.push(Queue2Entry {
            tx_id: tx_id.to_string(),
            entered_tick: tick,
            entry_seq: self.next_entry_seq,
        });
        self.next_entry_seq += 1;
        if let Some(tx) = self.transactions.get_mut(tx_id) {
            tx.set_queue_status(TxStatus::InQueue2);
        }
    }

    /// Drop the named entries from the queue in one pass.
    pub fn remove_from_queue2(&mut self, tx_ids: &std::collections::BTreeSet<String>) {
        self.queue2.retain(|e| !tx_ids.contains(&e.tx_id));
    }

    pub fn queue2_value(&self) -> Cents {
        self.queue2
            .iter()
            .filter_map(|e| self.transactions.get(&e.tx_id))
            .map(|tx| tx.remaining_amount())
            .sum()
    }

    /// Queue-2 remainder owed by one agent.
    pub fn queue2_value_for_sender(&self, agent_id: &str) -> Cents {
        self.queue2
            .iter()
            .filter_map(|e| self.transactions.get(&e.tx_id))
            .filter(|tx| tx.sender_id() == agent_id)
            .map(|tx| tx.remaining_amount())
            .sum()
    }

    pub fn queue2_count_for_sender(&self, agent_id: &str) -> usize {
        self.queue2
            .iter()
            .filter_map(|e| self.transactions.get(&e.tx_id))
            .filter(|tx| tx.sender_id() == agent_id)
            .count()
    }

    /// Net Queue-2 position of an agent: inbound remainder minus outbound.
    pub fn queue2_net_position(&self, agent_id: &str) -> Cents {
        let mut net = 0;
        for entry in &self.queue2 {
            if let Some(tx) = self.transactions.get(&entry.tx_id) {
                if tx.receiver_id() == agent_id {
                    net += tx.remaining_amount();
                } else if tx.sender_id() == agent_id {
                    net -= tx.remaining_amount();
                }
            }
        }
        net
    }

    // ------------------------------------------------------------------
    // Aggregates
    // ------------------------------------------------------------------

    /// Total value of one agent's Queue 1.
    pub fn queue1_value(&self, agent_id: &str) -> Cents {
        self.agents
            .get(agent_id)
            .map(|agent| {
                agent
                    .queue1()
                    .iter()
                    .filter_map(|id| self.transactions.get(id))
                    .map(|tx| tx.remaining_amount())
                    .sum()
            })
            .unwrap_or(0)
    }

    pub fn total_queue1_len(&self) -> usize {
        self.agents.values().map(|a| a.queue1_len()).sum()
    }

    /// Live transactions that are neither settled nor dropped, in id order.
    pub fn unsettled_tx_ids(&self) -> Vec<String> {
        self.transactions
            .iter()
            .filter(|(_, tx)| tx.is_live())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::transaction::Transaction;

    fn world() -> World {
        World::new(vec![
            Agent::new("BANK_A".to_string(), 1_000_000, 0),
            Agent::new("BANK_B".to_string(), 2_000_000, 0),
        ])
    }

    fn tx(id: &str, from: &str, to: &str, amount: Cents) -> Transaction {
        Transaction::new(id.to_string(), from.to_string(), to.to_string(), amount, 0, 100)
    }

    #[test]
    fn test_agent_ids_sorted() {
        let w = World::new(vec![
            Agent::new("Z".to_string(), 0, 0),
            Agent::new("A".to_string(), 0, 0),
            Agent::new("M".to_string(), 0, 0),
        ]);
        assert_eq!(w.agent_ids(), vec!["A", "M", "Z"]);
    }

    #[test]
    fn test_total_balance() {
        assert_eq!(world().total_balance(), 3_000_000);
    }

    #[test]
    fn test_queue2_entry_seq_monotone() {
        let mut w = world();
        w.insert_transaction(tx("tx_1", "BANK_A", "BANK_B", 100));
        w.insert_transaction(tx("tx_2", "BANK_A", "BANK_B", 200));
        w.push_queue2("tx_1", 0);
        w.push_queue2("tx_2", 1);
        assert_eq!(w.queue2()[0].entry_seq, 0);
        assert_eq!(w.queue2()[1].entry_seq, 1);
        assert_eq!(w.queue2_value(), 300);
    }

    #[test]
    fn test_queue2_net_position() {
        let mut w = world();
        w.insert_transaction(tx("tx_1", "BANK_A", "BANK_B", 100));
        w.insert_transaction(tx("tx_2", "BANK_B", "BANK_A", 30));
        w.push_queue2("tx_1", 0);
        w.push_queue2("tx_2", 0);
        assert_eq!(w.queue2_net_position("BANK_A"), -70);
        assert_eq!(w.queue2_net_position("BANK_B"), 70);
    }

    #[test]
    fn test_push_queue2_sets_status() {
        let mut w = world();
        w.insert_transaction(tx("tx_1", "BANK_A", "BANK_B", 100));
        w.push_queue2("tx_1", 0);
        assert_eq!(w.transaction("tx_1").unwrap().status(), &TxStatus::InQueue2);
    }
}
