//! Liquidity-saving mechanisms.
//!
//! Two passes per tick over the shared queue:
//!
//! - **Bilateral** (Algorithm 2): for every pair with flow in both
//!   directions, the matched portion settles with zero net liquidity and
//!   the residual settles up to the net debtor's available liquidity,
//!   splitting the marginal payment when the budget lands inside one.
//! - **Cycles** (Algorithm 3): simple directed cycles of bounded length
//!   settle atomically when every member covers its net outflow. Only net
//!   positions touch balances.
//!
//! Pairs and cycles are processed in lexicographic agent order; all queue
//! reads are in entry order.

pub mod graph;

use crate::model::event::EventKind;
use crate::model::world::World;
use crate::money::Cents;
use crate::settlement::deferred::DeferredCredits;
use graph::{cycle_net_positions, enumerate_cycles, FlowGraph};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// LSM feature configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LsmConfig {
    pub enable_bilateral: bool,
    pub enable_cycles: bool,
    /// Longest simple cycle considered (3..).
    pub max_cycle_length: usize,
    /// Cap on cycles settled in one tick.
    pub max_cycles_per_tick: usize,
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            enable_bilateral: true,
            enable_cycles: true,
            max_cycle_length: 4,
            max_cycles_per_tick: 10,
        }
    }
}

/// Result of one bilateral pass.
#[derive(Debug, Default)]
pub struct BilateralResult {
    pub pairs_offset: usize,
    /// Gross value settled across both directions.
    pub settled_value: Cents,
    pub events: Vec<EventKind>,
}

/// Result of one cycle pass.
#[derive(Debug, Default)]
pub struct CycleResult {
    pub cycles_settled: usize,
    pub settled_value: Cents,
    pub events: Vec<EventKind>,
}

/// Bilateral offsetting over every pair with mutual obligations.
pub fn bilateral_pass(
    world: &mut World,
    tick: u64,
    mut deferred: Option<&mut DeferredCredits>,
) -> BilateralResult {
    let mut result = BilateralResult::default();

    // Pair key = unordered (lexicographic) agent pair; values keep each
    // direction's transactions in queue entry order.
    let mut pairs: BTreeMap<(String, String), (Vec<String>, Vec<String>)> = BTreeMap::new();
    for entry in world.queue2() {
        let Some(tx) = world.transaction(&entry.tx_id) else {
            continue;
        };
        if !tx.is_live() {
            continue;
        }
        let (a, b) = ordered_pair(tx.sender_id(), tx.receiver_id());
        let flows = pairs.entry((a.clone(), b.clone())).or_default();
        if tx.sender_id() == a {
            flows.0.push(entry.tx_id.clone());
        } else {
            flows.1.push(entry.tx_id.clone());
        }
    }

    for ((agent_a, agent_b), (txs_ab, txs_ba)) in pairs {
        if txs_ab.is_empty() || txs_ba.is_empty() {
            continue;
        }

        let sum_ab = remaining_sum(world, &txs_ab);
        let sum_ba = remaining_sum(world, &txs_ba);
        let matched = sum_ab.min(sum_ba);
        if matched <= 0 {
            continue;
        }

        // Residual side settles up to the net debtor's liquidity.
        let (payer, payee, residual, larger_txs, smaller_txs, larger_is_ab) = if sum_ab >= sum_ba {
            (&agent_a, &agent_b, sum_ab - sum_ba, &txs_ab, &txs_ba, true)
        } else {
            (&agent_b, &agent_a, sum_ba - sum_ab, &txs_ba, &txs_ab, false)
        };
        let available = world
            .agent(payer)
            .map(|a| a.available_liquidity().max(0))
            .unwrap_or(0);
        let extra = residual.min(available);

        let mut settled_tx_ids = Vec::new();
        let settled_small =
            settle_fifo(world, smaller_txs, matched, tick, &mut settled_tx_ids);
        let settled_large =
            settle_fifo(world, larger_txs, matched + extra, tick, &mut settled_tx_ids);
        debug_assert_eq!(settled_small, matched);
        debug_assert_eq!(settled_large, matched + extra);

        // Only the net flow moves money.
        if extra > 0 {
            world.agent_mut(payer).expect("payer present").adjust_balance(-extra);
            match deferred.as_deref_mut() {
                Some(dc) => dc.accumulate(payee, extra, "lsm_bilateral_net"),
                None => world.agent_mut(payee).expect("payee present").credit(extra),
            }
        }

        // Gross outflows count toward daily limits on both sides.
        let (out_ab, out_ba) = if larger_is_ab {
            (settled_large, settled_small)
        } else {
            (settled_small, settled_large)
        };
        world
            .agent_mut(&agent_a)
            .expect("agent present")
            .record_outflow(&agent_b, out_ab);
        world
            .agent_mut(&agent_b)
            .expect("agent present")
            .record_outflow(&agent_a, out_ba);

        let drained: BTreeSet<String> = settled_tx_ids
            .iter()
            .filter(|id| {
                world
                    .transaction(id)
                    .map(|tx| tx.is_fully_settled())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        world.remove_from_queue2(&drained);

        debug!(%agent_a, %agent_b, matched, extra, "bilateral offset settled");
        result.pairs_offset += 1;
        result.settled_value += settled_small + settled_large;
        result.events.push(EventKind::LsmBilateralOffset {
            agent_a: agent_a.clone(),
            agent_b: agent_b.clone(),
            amount_a_to_b: out_ab,
            amount_b_to_a: out_ba,
            matched_amount: matched,
            settled_tx_ids,
        });
    }

    result
}

/// Cycle settlement: repeatedly take the first feasible cycle in the
/// deterministic enumeration order, settle it atomically, and re-snapshot
/// the queue, until the per-tick cap or no feasible cycle remains.
pub fn cycle_pass(
    world: &mut World,
    tick: u64,
    config: &LsmConfig,
    _deferred: Option<&mut DeferredCredits>,
) -> CycleResult {
    let mut result = CycleResult::default();

    while result.cycles_settled < config.max_cycles_per_tick {
        let graph = FlowGraph::from_queue(world);
        let candidates = enumerate_cycles(&graph, config.max_cycle_length);
        let mut settled_one = false;

        for cycle in &candidates {
            let net = cycle_net_positions(&graph, cycle);

            // Every net debtor must cover its net outflow.
            let feasible = net.iter().all(|(agent_id, &position)| {
                position >= 0
                    || world
                        .agent(agent_id)
                        .map(|a| a.available_liquidity() >= -position)
                        .unwrap_or(false)
            });
            if !feasible {
                continue;
            }

            // Collect edge legs before mutating.
            let len = cycle.path.len();
            let mut legs: Vec<(String, String, Cents, Vec<String>)> = Vec::with_capacity(len);
            for i in 0..len {
                let from = cycle.path[i];
                let to = cycle.path[(i + 1) % len];
                let edge = graph.edge(from, to).expect("cycle edge exists");
                legs.push((
                    graph.agent_name(from).to_string(),
                    graph.agent_name(to).to_string(),
                    edge.amount,
                    edge.tx_ids.clone(),
                ));
            }

            // Settle every constituent transaction in full, FIFO per edge.
            let mut settled_tx_ids = Vec::new();
            let mut total_value = 0;
            for (from, to, amount, tx_ids) in &legs {
                let settled = settle_fifo(world, tx_ids, *amount, tick, &mut settled_tx_ids);
                debug_assert_eq!(settled, *amount);
                total_value += amount;
                world
                    .agent_mut(from)
                    .expect("agent present")
                    .record_outflow(to, *amount);
            }

            // Cycles are atomic within the tick: net positions apply
            // immediately regardless of deferred-crediting mode.
            for (agent_id, position) in &net {
                world
                    .agent_mut(agent_id)
                    .expect("agent present")
                    .adjust_balance(*position);
            }

            let drained: BTreeSet<String> = settled_tx_ids.iter().cloned().collect();
            world.remove_from_queue2(&drained);

            let agents = cycle.closed_agent_path(&graph);
            debug!(?agents, total_value, "cycle settled");
            result.cycles_settled += 1;
            result.settled_value += total_value;
            result.events.push(EventKind::LsmCycleSettlement {
                agents,
                tx_ids: settled_tx_ids,
                total_value,
                net_positions: net,
            });
            settled_one = true;
            break;
        }

        if !settled_one {
            break;
        }
    }

    result
}

fn ordered_pair(x: &str, y: &str) -> (String, String) {
    if x <= y {
        (x.to_string(), y.to_string())
    } else {
        (y.to_string(), x.to_string())
    }
}

fn remaining_sum(world: &World, tx_ids: &[String]) -> Cents {
    tx_ids
        .iter()
        .filter_map(|id| world.transaction(id))
        .map(|tx| tx.remaining_amount())
        .sum()
}

/// Settle up to `budget` across `tx_ids` in order, splitting the marginal
/// transaction. Returns the value settled.
fn settle_fifo(
    world: &mut World,
    tx_ids: &[String],
    budget: Cents,
    tick: u64,
    settled_tx_ids: &mut Vec<String>,
) -> Cents {
    let mut left = budget;
    for tx_id in tx_ids {
        if left <= 0 {
            break;
        }
        let Some(tx) = world.transaction(tx_id) else {
            continue;
        };
        let portion = tx.remaining_amount().min(left);
        if portion <= 0 {
            continue;
        }
        world
            .transaction_mut(tx_id)
            .expect("transaction present")
            .settle(portion, tick)
            .expect("portion bounded by remainder");
        settled_tx_ids.push(tx_id.clone());
        left -= portion;
    }
    budget - left
}
