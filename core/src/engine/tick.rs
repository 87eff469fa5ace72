//! The tick loop.
//!
//! Phase order per tick: scheduled scenario events → arrivals → overdue
//! sweep → strategic collateral (first tick of day) → bank tree → payment
//! policy with immediate RTGS settlement and entry-disposition probing →
//! Queue-2 release scan → LSM bilateral → LSM cycles → (optional) second
//! release scan → end-of-tick collateral → deferred credit application →
//! end-of-day penalties → cost accrual → daily-counter reset → flush.
//!
//! Every iteration over agents is in sorted id order; every queue iteration
//! is in entry order. Event sequence numbers are assigned densely in
//! emission order.

use crate::costs::accrue_running_costs;
use crate::engine::{DayStats, Engine, EventSink, SimError, TickSummary};
use crate::model::event::EventKind;
use crate::model::transaction::{Transaction, TxStatus};
use crate::money::{saturating_add_cents, Cents};
use crate::policy::ast::TreeKind;
use crate::policy::context::{EvalFrame, SystemView};
use crate::policy::eval::{
    decide_bank, decide_collateral, decide_payment, BankDecision, CollateralDecision,
    PaymentDecision,
};
use crate::scenario::{ScenarioError, ScenarioPayload};
use crate::settlement::deferred::DeferredCredits;
use crate::settlement::lsm::{bilateral_pass, cycle_pass};
use crate::settlement::offsetting::entry_disposition_probe;
use crate::settlement::rtgs::{release_scan, submit_release, ReleaseOutcome};
use crate::config::Queue1Ordering;
use std::cmp::Reverse;
use tracing::debug;

impl Engine {
    /// Advance the simulation by one tick.
    pub fn tick(&mut self) -> Result<TickSummary, SimError> {
        if self.clock.is_finished() {
            return Err(SimError::Finished);
        }
        let tick = self.clock.current_tick();
        let day = self.clock.current_day();
        let mut sink = self.new_sink();
        self.tick_charges.clear();

        let mut deferred = if self.config.deferred_crediting {
            Some(DeferredCredits::new())
        } else {
            None
        };

        let mut arrivals_count = 0usize;
        let mut settlements = 0usize;

        // Scheduled scenario events, in configuration order. A failing
        // event aborts the whole tick: state mutated by earlier events in
        // the same tick is rolled back and nothing is committed.
        let firing: Vec<ScenarioPayload> =
            self.scenario.firing_at(tick).into_iter().cloned().collect();
        if !firing.is_empty() {
            let world_snapshot = self.world.clone();
            let arrivals_snapshot = self.arrivals.clone();
            for payload in &firing {
                if let Err(source) =
                    self.apply_scenario(payload, tick, &mut sink, &mut arrivals_count)
                {
                    self.world = world_snapshot;
                    self.arrivals = arrivals_snapshot;
                    return Err(SimError::Scenario { tick, source });
                }
            }
        }

        // Arrival generation; the per-(agent, tick) sub-streams make the
        // iteration order immaterial, but it is sorted anyway.
        for agent_id in self.world.agent_ids() {
            for tx in self.arrivals.generate_for_agent(&agent_id, tick) {
                arrivals_count += 1;
                self.admit_arrival(tx, &mut sink);
            }
        }

        self.overdue_sweep(tick, &mut sink);

        if self.clock.is_first_tick_of_day() {
            self.run_collateral_trees(TreeKind::StrategicCollateral, tick, &mut sink);
        }

        self.run_bank_trees(tick, &mut sink);

        settlements += self.payment_policy_pass(tick, &mut sink, deferred.as_mut());

        // Queue-2 liquidity release scan.
        let scan = release_scan(
            &mut self.world,
            tick,
            self.config.priority_mode,
            &self.config.priority_escalation,
            deferred.as_mut(),
        );
        settlements += scan.settled_count;
        for event in scan.events {
            sink.emit(event);
        }

        let mut lsm_bilateral = 0usize;
        if self.config.lsm.enable_bilateral {
            let result = bilateral_pass(&mut self.world, tick, deferred.as_mut());
            lsm_bilateral = result.pairs_offset;
            for event in result.events {
                sink.emit(event);
            }
        }

        let mut lsm_cycle = 0usize;
        if self.config.lsm.enable_cycles {
            let result = cycle_pass(&mut self.world, tick, &self.config.lsm, deferred.as_mut());
            lsm_cycle = result.cycles_settled;
            for event in result.events {
                sink.emit(event);
            }
        }

        if self.config.algorithm_sequencing {
            let rescan = release_scan(
                &mut self.world,
                tick,
                self.config.priority_mode,
                &self.config.priority_escalation,
                deferred.as_mut(),
            );
            settlements += rescan.settled_count;
            for event in rescan.events {
                sink.emit(event);
            }
        }

        self.run_collateral_trees(TreeKind::EndOfTickCollateral, tick, &mut sink);

        if let Some(dc) = deferred.as_mut() {
            for event in dc.apply_all(&mut self.world) {
                sink.emit(event);
            }
        }

        // End-of-day penalties land in this tick's cost accrual.
        let day_stats = if self.clock.is_last_tick_of_day() {
            Some(self.end_of_day(day, &mut sink))
        } else {
            None
        };

        let cost_delta_by_agent = self.accrue_costs(&mut sink);

        if self.clock.is_last_tick_of_day() {
            for agent_id in self.world.agent_ids() {
                self.world
                    .agent_mut(&agent_id)
                    .expect("agent present")
                    .reset_daily_outflows();
            }
        }

        self.flush(sink);
        self.clock.advance();

        debug!(tick, arrivals_count, settlements, "tick complete");
        Ok(TickSummary {
            tick,
            day,
            arrivals: arrivals_count,
            settlements,
            lsm_bilateral,
            lsm_cycle,
            cost_delta_by_agent,
            day_stats,
        })
    }

    fn system_view(&self, tick: u64) -> SystemView {
        SystemView {
            tick,
            ticks_per_day: self.config.ticks_per_day as u64,
            eod_rush_threshold: self.config.eod_rush_threshold,
        }
    }

    /// Register a new transaction and queue it with its sender.
    fn admit_arrival(&mut self, tx: Transaction, sink: &mut EventSink) {
        sink.emit(EventKind::Arrival {
            tx_id: tx.id().to_string(),
            sender_id: tx.sender_id().to_string(),
            receiver_id: tx.receiver_id().to_string(),
            amount: tx.amount(),
            deadline_tick: tx.deadline_tick(),
            priority: tx.priority(),
            divisible: tx.is_divisible(),
        });
        let tx_id = tx.id().to_string();
        let sender_id = tx.sender_id().to_string();
        self.world.insert_transaction(tx);
        self.world
            .transaction_mut(&tx_id)
            .expect("just inserted")
            .set_queue_status(TxStatus::InQueue1);
        self.world
            .agent_mut(&sender_id)
            .expect("sender validated at config load")
            .enqueue1(tx_id);
    }

    /// Tag transactions past their deadline; the penalty charges once.
    fn overdue_sweep(&mut self, tick: u64, sink: &mut EventSink) {
        let penalty = self.config.cost_rates.deadline_penalty;
        for tx_id in self.world.unsettled_tx_ids() {
            let Some(tx) = self.world.transaction_mut(&tx_id) else {
                continue;
            };
            if !tx.is_past_deadline(tick) || !tx.mark_overdue(tick) {
                continue;
            }
            let sender_id = tx.sender_id().to_string();
            let deadline_tick = tx.deadline_tick();
            self.charge(&sender_id, |b| b.penalty_cost += penalty);
            sink.emit(EventKind::TransactionWentOverdue {
                tx_id,
                agent_id: sender_id,
                deadline_tick,
                penalty,
            });
        }
    }

    fn run_bank_trees(&mut self, tick: u64, sink: &mut EventSink) {
        let sys = self.system_view(tick);
        for agent_id in self.world.agent_ids() {
            // Budgets are per tick; the bank tree may set a fresh one.
            self.world
                .agent_mut(&agent_id)
                .expect("agent present")
                .clear_release_budget();

            let decision = {
                let Some(tree) = self
                    .policies
                    .get(&agent_id)
                    .and_then(|p| p.bank.as_ref())
                else {
                    continue;
                };
                let agent = self.world.agent(&agent_id).expect("agent present");
                let frame =
                    EvalFrame::for_agent(&self.world, agent, sys, &self.config.cost_rates);
                decide_bank(tree, &frame)
            };

            match decision {
                Ok(BankDecision::NoAction) => {}
                Ok(BankDecision::SetReleaseBudget { budget }) => {
                    self.world
                        .agent_mut(&agent_id)
                        .expect("agent present")
                        .set_release_budget(budget);
                }
                Ok(BankDecision::SetState { key, value }) => {
                    self.world
                        .agent_mut(&agent_id)
                        .expect("agent present")
                        .set_state_register(key, value);
                }
                Ok(BankDecision::AddState { key, delta }) => {
                    self.world
                        .agent_mut(&agent_id)
                        .expect("agent present")
                        .add_state_register(key, delta);
                }
                Err(error) => sink.emit(EventKind::PolicyEvaluationError {
                    agent_id: agent_id.clone(),
                    tx_id: None,
                    tree: TreeKind::Bank.name().to_string(),
                    message: error.to_string(),
                }),
            }
        }
    }

    fn run_collateral_trees(&mut self, kind: TreeKind, tick: u64, sink: &mut EventSink) {
        let sys = self.system_view(tick);
        let source = match kind {
            TreeKind::StrategicCollateral => "strategic",
            TreeKind::EndOfTickCollateral => "end_of_tick",
            _ => unreachable!("not a collateral tree"),
        };
        for agent_id in self.world.agent_ids() {
            let decision = {
                let policy = self.policies.get(&agent_id);
                let tree = match kind {
                    TreeKind::StrategicCollateral => {
                        policy.and_then(|p| p.strategic_collateral.as_ref())
                    }
                    _ => policy.and_then(|p| p.end_of_tick_collateral.as_ref()),
                };
                let Some(tree) = tree else {
                    continue;
                };
                let agent = self.world.agent(&agent_id).expect("agent present");
                let frame =
                    EvalFrame::for_agent(&self.world, agent, sys, &self.config.cost_rates);
                decide_collateral(tree, &frame)
            };

            match decision {
                Ok(CollateralDecision::Hold) => {}
                Ok(CollateralDecision::Post { amount }) => {
                    let agent = self.world.agent_mut(&agent_id).expect("agent present");
                    // Posts are clamped to the remaining capacity.
                    let posted = amount.min(agent.remaining_collateral_capacity());
                    if posted > 0 {
                        agent.post_collateral(posted).expect("clamped to capacity");
                        let new_total = agent.posted_collateral();
                        sink.emit(EventKind::CollateralPost {
                            agent_id: agent_id.clone(),
                            amount: posted,
                            new_total,
                            source: source.to_string(),
                        });
                    }
                }
                Ok(CollateralDecision::Withdraw { amount }) => {
                    let agent = self.world.agent_mut(&agent_id).expect("agent present");
                    let withdrawn = agent.withdraw_collateral(amount);
                    if withdrawn > 0 {
                        let new_total = agent.posted_collateral();
                        sink.emit(EventKind::CollateralWithdraw {
                            agent_id: agent_id.clone(),
                            amount: withdrawn,
                            new_total,
                            source: source.to_string(),
                        });
                    }
                }
                Err(error) => sink.emit(EventKind::PolicyEvaluationError {
                    agent_id: agent_id.clone(),
                    tx_id: None,
                    tree: kind.name().to_string(),
                    message: error.to_string(),
                }),
            }
        }
    }

    /// Queue-1 policy evaluation plus immediate RTGS settlement.
    /// Returns the number of immediate settlements.
    fn payment_policy_pass(
        &mut self,
        tick: u64,
        sink: &mut EventSink,
        mut deferred: Option<&mut DeferredCredits>,
    ) -> usize {
        let sys = self.system_view(tick);
        let mut settlements = 0usize;

        for agent_id in self.world.agent_ids() {
            let ordered = self.order_queue1(&agent_id);
            self.world
                .agent_mut(&agent_id)
                .expect("agent present")
                .set_queue1(ordered.clone());

            for tx_id in ordered {
                let decision = {
                    let Some(tx) = self.world.transaction(&tx_id) else {
                        continue;
                    };
                    if !tx.is_live() {
                        continue;
                    }
                    let agent = self.world.agent(&agent_id).expect("agent present");
                    match self.policies.get(&agent_id).and_then(|p| p.payment.as_ref()) {
                        Some(tree) => {
                            let frame = EvalFrame::for_transaction(
                                &self.world,
                                agent,
                                tx,
                                sys,
                                &self.config.cost_rates,
                            );
                            decide_payment(tree, &frame)
                        }
                        // A policy without a payment tree releases
                        // unconditionally (collateral-only policies).
                        None => Ok(PaymentDecision::Release),
                    }
                };

                match decision {
                    Ok(decision) => {
                        settlements += self.apply_payment_decision(
                            &agent_id,
                            &tx_id,
                            decision,
                            tick,
                            sink,
                            deferred.as_deref_mut(),
                        );
                    }
                    Err(error) => {
                        sink.emit(EventKind::PolicyEvaluationError {
                            agent_id: agent_id.clone(),
                            tx_id: Some(tx_id.clone()),
                            tree: TreeKind::Payment.name().to_string(),
                            message: error.to_string(),
                        });
                        sink.emit(EventKind::PolicyHold {
                            agent_id: agent_id.clone(),
                            tx_id: tx_id.clone(),
                            reason: "evaluation error".to_string(),
                        });
                    }
                }
            }
        }

        settlements
    }

    fn apply_payment_decision(
        &mut self,
        agent_id: &str,
        tx_id: &str,
        decision: PaymentDecision,
        tick: u64,
        sink: &mut EventSink,
        deferred: Option<&mut DeferredCredits>,
    ) -> usize {
        match decision {
            PaymentDecision::Hold { reason } => {
                sink.emit(EventKind::PolicyHold {
                    agent_id: agent_id.to_string(),
                    tx_id: tx_id.to_string(),
                    reason,
                });
                0
            }
            PaymentDecision::Drop { reason } => {
                self.world
                    .agent_mut(agent_id)
                    .expect("agent present")
                    .remove_from_queue1(tx_id);
                self.world
                    .transaction_mut(tx_id)
                    .expect("transaction present")
                    .drop_at(tick);
                sink.emit(EventKind::PolicyDrop {
                    agent_id: agent_id.to_string(),
                    tx_id: tx_id.to_string(),
                    reason,
                });
                0
            }
            PaymentDecision::Reprioritize { priority } => {
                let tx = self.world.transaction_mut(tx_id).expect("transaction present");
                let old_priority = tx.priority();
                tx.set_priority(priority);
                sink.emit(EventKind::PolicyReprioritize {
                    agent_id: agent_id.to_string(),
                    tx_id: tx_id.to_string(),
                    old_priority,
                    new_priority: priority,
                });
                0
            }
            PaymentDecision::Split { parts } => {
                self.apply_split(agent_id, tx_id, parts, tick, sink);
                0
            }
            PaymentDecision::Release => {
                let (sender_id, receiver_id, amount) = {
                    let tx = self.world.transaction(tx_id).expect("transaction present");
                    (
                        tx.sender_id().to_string(),
                        tx.receiver_id().to_string(),
                        tx.remaining_amount(),
                    )
                };

                // A bank-tree release budget converts the release to a hold
                // once exhausted.
                let within_budget = self
                    .world
                    .agent_mut(agent_id)
                    .expect("agent present")
                    .charge_release_budget(amount);
                if !within_budget {
                    sink.emit(EventKind::PolicyHold {
                        agent_id: agent_id.to_string(),
                        tx_id: tx_id.to_string(),
                        reason: "release budget exhausted".to_string(),
                    });
                    return 0;
                }

                self.world
                    .agent_mut(agent_id)
                    .expect("agent present")
                    .remove_from_queue1(tx_id);
                sink.emit(EventKind::PolicySubmit {
                    agent_id: agent_id.to_string(),
                    tx_id: tx_id.to_string(),
                });

                let outcome = submit_release(&mut self.world, tx_id, tick, deferred)
                    .expect("agents and transaction validated");
                match outcome {
                    ReleaseOutcome::Settled => {
                        sink.emit(EventKind::RtgsImmediateSettlement {
                            tx_id: tx_id.to_string(),
                            sender_id,
                            receiver_id,
                            amount,
                        });
                        1
                    }
                    ReleaseOutcome::Queued => {
                        if self.config.entry_disposition_offsetting {
                            if let Some(event) =
                                entry_disposition_probe(&mut self.world, tx_id, tick)
                            {
                                sink.emit(event);
                            }
                        }
                        0
                    }
                }
            }
        }
    }

    /// Split a divisible transaction into near-equal children that replace
    /// it in Queue 1; friction is charged per extra part.
    fn apply_split(
        &mut self,
        agent_id: &str,
        tx_id: &str,
        parts: u32,
        tick: u64,
        sink: &mut EventSink,
    ) {
        let (remaining, divisible, receiver_id, arrival_tick, deadline_tick, priority) = {
            let tx = self.world.transaction(tx_id).expect("transaction present");
            (
                tx.remaining_amount(),
                tx.is_divisible(),
                tx.receiver_id().to_string(),
                tx.arrival_tick(),
                tx.deadline_tick(),
                tx.priority(),
            )
        };

        if !divisible || remaining < parts as Cents {
            sink.emit(EventKind::PolicyHold {
                agent_id: agent_id.to_string(),
                tx_id: tx_id.to_string(),
                reason: "split not applicable".to_string(),
            });
            return;
        }

        let base = remaining / parts as Cents;
        let mut leftover = remaining % parts as Cents;
        let mut child_ids = Vec::with_capacity(parts as usize);
        for i in 0..parts {
            let mut amount = base;
            if leftover > 0 {
                amount += 1;
                leftover -= 1;
            }
            let child_id = format!("{tx_id}_s{i}");
            let child = Transaction::new(
                child_id.clone(),
                agent_id.to_string(),
                receiver_id.clone(),
                amount,
                arrival_tick,
                deadline_tick,
            )
            .with_priority(priority)
            .divisible()
            .with_parent(tx_id.to_string());
            self.world.insert_transaction(child);
            self.world
                .transaction_mut(&child_id)
                .expect("just inserted")
                .set_queue_status(TxStatus::InQueue1);
            child_ids.push(child_id);
        }

        // Children replace the parent at its queue position.
        {
            let agent = self.world.agent_mut(agent_id).expect("agent present");
            let mut queue = agent.queue1().to_vec();
            if let Some(pos) = queue.iter().position(|id| id == tx_id) {
                queue.splice(pos..=pos, child_ids.iter().cloned());
            } else {
                queue.extend(child_ids.iter().cloned());
            }
            agent.set_queue1(queue);
        }
        self.world
            .transaction_mut(tx_id)
            .expect("transaction present")
            .drop_at(tick);

        let friction = self.config.cost_rates.split_friction_cost * (parts as Cents - 1);
        self.charge(agent_id, |b| b.split_friction_cost += friction);
        sink.emit(EventKind::PolicySplit {
            agent_id: agent_id.to_string(),
            tx_id: tx_id.to_string(),
            parts,
            child_ids,
            friction_cost: friction,
        });
    }

    fn order_queue1(&self, agent_id: &str) -> Vec<String> {
        let agent = self.world.agent(agent_id).expect("agent present");
        let mut queue = agent.queue1().to_vec();
        if self.config.queue1_ordering == Queue1Ordering::PriorityDeadline {
            // Stable sort keeps arrival order as the final tiebreak.
            queue.sort_by_key(|tx_id| {
                self.world
                    .transaction(tx_id)
                    .map(|tx| (Reverse(tx.priority()), tx.deadline_tick()))
                    .unwrap_or((Reverse(0), u64::MAX))
            });
        }
        queue
    }

    /// End-of-day penalties and the `EndOfDay` event.
    fn end_of_day(&mut self, day: u64, sink: &mut EventSink) -> DayStats {
        let per_tx = self.config.cost_rates.eod_penalty_per_transaction;
        let mut unsettled_count = 0u64;
        let mut total_penalty: Cents = 0;

        for tx_id in self.world.unsettled_tx_ids() {
            let sender_id = self
                .world
                .transaction(&tx_id)
                .expect("transaction present")
                .sender_id()
                .to_string();
            unsettled_count += 1;
            total_penalty += per_tx;
            self.charge(&sender_id, |b| b.penalty_cost += per_tx);
        }

        sink.emit(EventKind::EndOfDay {
            day,
            unsettled_count,
            total_penalty,
        });
        DayStats {
            day,
            unsettled_count,
            eod_penalty_total: total_penalty,
        }
    }

    /// Running costs plus the tick's one-time charges, folded into totals.
    fn accrue_costs(
        &mut self,
        sink: &mut EventSink,
    ) -> std::collections::BTreeMap<String, Cents> {
        let mut deltas = std::collections::BTreeMap::new();
        for agent_id in self.world.agent_ids() {
            let mut breakdown =
                accrue_running_costs(&self.world, &agent_id, &self.config.cost_rates);
            if let Some(charges) = self.tick_charges.get(&agent_id) {
                let (penalty, saturated) =
                    saturating_add_cents(breakdown.penalty_cost, charges.penalty_cost);
                breakdown.penalty_cost = penalty;
                let (friction, saturated2) = saturating_add_cents(
                    breakdown.split_friction_cost,
                    charges.split_friction_cost,
                );
                breakdown.split_friction_cost = friction;
                if saturated || saturated2 {
                    sink.emit(EventKind::NumericSaturation {
                        agent_id: Some(agent_id.clone()),
                        context: "cost accrual".to_string(),
                    });
                }
            }

            if !breakdown.is_zero() {
                sink.emit(EventKind::CostAccrual {
                    agent_id: agent_id.clone(),
                    breakdown: breakdown.clone(),
                    total: breakdown.total(),
                });
            }
            deltas.insert(agent_id.clone(), breakdown.total());
            self.fold_costs(&agent_id, &breakdown);
        }
        deltas
    }

    // ------------------------------------------------------------------
    // Scenario application
    // ------------------------------------------------------------------

    fn apply_scenario(
        &mut self,
        payload: &ScenarioPayload,
        tick: u64,
        sink: &mut EventSink,
        arrivals_count: &mut usize,
    ) -> Result<(), ScenarioError> {
        let details = serde_json::to_value(payload).expect("payload serializes");
        let applied = EventKind::ScenarioEventApplied {
            kind: payload.kind().to_string(),
            agent_id: payload.agent_id().map(str::to_string),
            details,
        };

        match payload {
            ScenarioPayload::DirectTransfer {
                from_agent,
                to_agent,
                amount,
            } => {
                if *amount <= 0 {
                    return Err(ScenarioError::NonPositiveAmount(*amount));
                }
                if self.world.agent(from_agent).is_none() {
                    return Err(ScenarioError::UnknownAgent(from_agent.clone()));
                }
                if self.world.agent(to_agent).is_none() {
                    return Err(ScenarioError::UnknownAgent(to_agent.clone()));
                }
                // External intervention: moves funds regardless of caps.
                self.world
                    .agent_mut(from_agent)
                    .expect("checked")
                    .adjust_balance(-amount);
                self.world
                    .agent_mut(to_agent)
                    .expect("checked")
                    .credit(*amount);
            }
            ScenarioPayload::CustomTransactionArrival { tx } => {
                if tx.amount <= 0 {
                    return Err(ScenarioError::InvalidTransaction(format!(
                        "amount must be positive, got {}",
                        tx.amount
                    )));
                }
                if tx.sender_id == tx.receiver_id {
                    return Err(ScenarioError::InvalidTransaction(
                        "sender equals receiver".to_string(),
                    ));
                }
                for agent in [&tx.sender_id, &tx.receiver_id] {
                    if self.world.agent(agent).is_none() {
                        return Err(ScenarioError::UnknownAgent(agent.clone()));
                    }
                }
                let tx_id = self.arrivals.mint_tx_id();
                let deadline = (tick + tx.deadline_offset).min(self.clock.episode_end_tick());
                let mut transaction = Transaction::new(
                    tx_id,
                    tx.sender_id.clone(),
                    tx.receiver_id.clone(),
                    tx.amount,
                    tick,
                    deadline,
                )
                .with_priority(tx.priority);
                if tx.divisible {
                    transaction = transaction.divisible();
                }
                sink.emit(applied);
                *arrivals_count += 1;
                self.admit_arrival(transaction, sink);
                return Ok(());
            }
            ScenarioPayload::CollateralAdjustment { agent, delta } => {
                let Some(target) = self.world.agent_mut(agent) else {
                    return Err(ScenarioError::UnknownAgent(agent.clone()));
                };
                let new_total = target.posted_collateral() + delta;
                if new_total < 0 {
                    return Err(ScenarioError::NegativeCollateral {
                        agent: agent.clone(),
                    });
                }
                target.set_posted_collateral(new_total);
            }
            ScenarioPayload::GlobalArrivalRateChange { factor } => {
                if !factor.is_finite() || *factor < 0.0 {
                    return Err(ScenarioError::InvalidFactor(*factor));
                }
                self.arrivals.scale_all_rates(*factor);
            }
            ScenarioPayload::AgentArrivalRateChange { agent, factor } => {
                if !factor.is_finite() || *factor < 0.0 {
                    return Err(ScenarioError::InvalidFactor(*factor));
                }
                if !self.arrivals.scale_agent_rate(agent, *factor) {
                    return Err(ScenarioError::NoArrivalConfig(agent.clone()));
                }
            }
            ScenarioPayload::CounterpartyWeightChange { agent, weights } => {
                if !self
                    .arrivals
                    .set_counterparty_weights(agent, weights.clone())
                {
                    return Err(ScenarioError::NoArrivalConfig(agent.clone()));
                }
            }
            ScenarioPayload::DeadlineWindowChange { agent, new_range } => {
                if new_range.1 < new_range.0 {
                    return Err(ScenarioError::InvalidWindow(new_range.0, new_range.1));
                }
                if !self.arrivals.set_deadline_window(agent, *new_range) {
                    return Err(ScenarioError::NoArrivalConfig(agent.clone()));
                }
            }
        }

        sink.emit(applied);
        Ok(())
    }
}
