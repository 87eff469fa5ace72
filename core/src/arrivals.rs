//! Transaction arrival generation.
//!
//! Each agent may carry an arrival specification: either a single profile or
//! one profile per priority band. Arrival counts are Poisson per tick; the
//! RNG stream for an agent's arrivals at a tick is derived from
//! `(master_seed, "arrivals", agent_id, tick)`, so the order agents are
//! processed in can never change what arrives.

use crate::costs::PriorityBand;
use crate::model::transaction::Transaction;
use crate::money::Cents;
use crate::rng::{dist, substream_rng, SeededRng, SCOPE_ARRIVALS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Amount distribution for generated transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AmountDist {
    /// Uniform in [min, max] cents, inclusive.
    Uniform { min: Cents, max: Cents },
    /// Normal with mean/std-dev in cents, clamped to >= 1.
    Normal { mean: Cents, std_dev: Cents },
    /// Log-normal on ln-cents, clamped to >= 1.
    LogNormal { mu: f64, sigma: f64 },
    /// Exponential with rate lambda, clamped to >= 1.
    Exponential { lambda: f64 },
}

impl AmountDist {
    pub fn sample(&self, rng: &mut SeededRng) -> Cents {
        match self {
            AmountDist::Uniform { min, max } => dist::uniform_amount(rng, *min, *max),
            AmountDist::Normal { mean, std_dev } => dist::normal_amount(rng, *mean, *std_dev),
            AmountDist::LogNormal { mu, sigma } => dist::log_normal_amount(rng, *mu, *sigma),
            AmountDist::Exponential { lambda } => dist::exponential_amount(rng, *lambda),
        }
    }
}

/// Priority assignment for generated transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriorityDist {
    /// Every transaction gets the same priority.
    Fixed { value: u8 },
    /// Discrete values with weights.
    Categorical { values: Vec<u8>, weights: Vec<f64> },
    /// Uniform integer in [min, max].
    Uniform { min: u8, max: u8 },
}

impl Default for PriorityDist {
    fn default() -> Self {
        PriorityDist::Fixed { value: 5 }
    }
}

impl PriorityDist {
    fn sample(&self, rng: &mut SeededRng) -> u8 {
        match self {
            PriorityDist::Fixed { value } => *value,
            PriorityDist::Categorical { values, weights } => {
                let total: f64 = weights.iter().sum();
                let mut target = rng.next_f64() * total;
                for (value, weight) in values.iter().zip(weights) {
                    target -= weight;
                    if target <= 0.0 {
                        return *value;
                    }
                }
                *values.last().unwrap_or(&5)
            }
            PriorityDist::Uniform { min, max } => {
                rng.range_i64(*min as i64, *max as i64 + 1) as u8
            }
        }
    }
}

/// Arrival profile for one stream of transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrivalProfile {
    /// Poisson rate per tick.
    pub rate_per_tick: f64,

    pub amount: AmountDist,

    /// Receiver weights; empty means uniform over all other agents. Weights
    /// need not sum to 1; the sender is always excluded.
    #[serde(default)]
    pub counterparty_weights: BTreeMap<String, f64>,

    /// Deadline offset window (min, max) ticks after arrival, inclusive.
    pub deadline_window: (u64, u64),

    #[serde(default)]
    pub priority: PriorityDist,

    #[serde(default)]
    pub divisible: bool,
}

/// Arrival configuration for one agent: a single profile or up to three
/// band profiles, each tagged with its priority band.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalSpec {
    Single(ArrivalProfile),
    Bands {
        #[serde(default)]
        urgent: Option<ArrivalProfile>,
        #[serde(default)]
        normal: Option<ArrivalProfile>,
        #[serde(default)]
        low: Option<ArrivalProfile>,
    },
}

/// Generates transactions for all configured agents, tick by tick.
#[derive(Debug, Clone)]
pub struct ArrivalGenerator {
    /// Live specs; scenario events mutate rates and windows here.
    specs: BTreeMap<String, ArrivalSpec>,

    /// Base specs as configured, so rate factors compose multiplicatively
    /// against the original rates instead of compounding drift.
    base_specs: BTreeMap<String, ArrivalSpec>,

    all_agent_ids: Vec<String>,
    master_seed: u64,
    episode_end_tick: u64,
    ticks_per_day: u64,
    deadline_cap_at_eod: bool,
    next_tx_id: u64,
}

impl ArrivalGenerator {
    pub fn new(
        specs: BTreeMap<String, ArrivalSpec>,
        mut all_agent_ids: Vec<String>,
        master_seed: u64,
        episode_end_tick: u64,
        ticks_per_day: u64,
        deadline_cap_at_eod: bool,
    ) -> Self {
        all_agent_ids.sort();
        Self {
            base_specs: specs.clone(),
            specs,
            all_agent_ids,
            master_seed,
            episode_end_tick,
            ticks_per_day,
            deadline_cap_at_eod,
            next_tx_id: 0,
        }
    }

    /// Generate this tick's arrivals for one agent.
    pub fn generate_for_agent(&mut self, agent_id: &str, tick: u64) -> Vec<Transaction> {
        let Some(spec) = self.specs.get(agent_id).cloned() else {
            return Vec::new();
        };
        let tick_key = tick.to_string();

        match spec {
            ArrivalSpec::Single(profile) => {
                let mut rng =
                    substream_rng(self.master_seed, SCOPE_ARRIVALS, &[agent_id, &tick_key]);
                self.generate_stream(agent_id, tick, &profile, None, &mut rng)
            }
            ArrivalSpec::Bands {
                urgent,
                normal,
                low,
            } => {
                let mut out = Vec::new();
                let bands = [
                    (PriorityBand::Urgent, "urgent", urgent),
                    (PriorityBand::Normal, "normal", normal),
                    (PriorityBand::Low, "low", low),
                ];
                for (band, band_key, profile) in bands {
                    if let Some(profile) = profile {
                        let mut rng = substream_rng(
                            self.master_seed,
                            SCOPE_ARRIVALS,
                            &[agent_id, &tick_key, band_key],
                        );
                        out.extend(self.generate_stream(
                            agent_id,
                            tick,
                            &profile,
                            Some(band),
                            &mut rng,
                        ));
                    }
                }
                out
            }
        }
    }

    fn generate_stream(
        &mut self,
        agent_id: &str,
        tick: u64,
        profile: &ArrivalProfile,
        band: Option<PriorityBand>,
        rng: &mut SeededRng,
    ) -> Vec<Transaction> {
        let count = dist::poisson(rng, profile.rate_per_tick);
        let mut transactions = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let amount = profile.amount.sample(rng).max(1);
            let receiver =
                self.pick_counterparty(agent_id, &profile.counterparty_weights, rng);
            let deadline = self.pick_deadline(tick, profile.deadline_window, rng);
            let priority = match band {
                Some(band) => {
                    let (lo, hi) = band.range();
                    profile.priority.sample(rng).clamp(lo, hi)
                }
                None => profile.priority.sample(rng),
            };

            let tx_id = format!("tx_{:08}", self.next_tx_id);
            self.next_tx_id += 1;

            let mut tx = Transaction::new(
                tx_id,
                agent_id.to_string(),
                receiver,
                amount,
                tick,
                deadline,
            )
            .with_priority(priority);
            if profile.divisible {
                tx = tx.divisible();
            }
            transactions.push(tx);
        }

        transactions
    }

    fn pick_counterparty(
        &self,
        sender_id: &str,
        weights: &BTreeMap<String, f64>,
        rng: &mut SeededRng,
    ) -> String {
        let candidates: Vec<&String> = self
            .all_agent_ids
            .iter()
            .filter(|id| id.as_str() != sender_id)
            .collect();
        debug_assert!(!candidates.is_empty(), "no receivers besides the sender");

        if weights.is_empty() {
            let idx = rng.range_i64(0, candidates.len() as i64) as usize;
            return candidates[idx].clone();
        }

        let total: f64 = candidates
            .iter()
            .map(|id| weights.get(id.as_str()).copied().unwrap_or(0.0))
            .sum();
        if total <= 0.0 {
            let idx = rng.range_i64(0, candidates.len() as i64) as usize;
            return candidates[idx].clone();
        }

        let mut target = rng.next_f64() * total;
        for id in &candidates {
            target -= weights.get(id.as_str()).copied().unwrap_or(0.0);
            if target <= 0.0 {
                return (*id).clone();
            }
        }
        candidates.last().unwrap().to_string()
    }

    fn pick_deadline(&self, arrival_tick: u64, window: (u64, u64), rng: &mut SeededRng) -> u64 {
        let (min_offset, max_offset) = window;
        let offset = rng.range_i64(min_offset as i64, max_offset as i64 + 1) as u64;
        let mut deadline = (arrival_tick + offset).min(self.episode_end_tick);
        if self.deadline_cap_at_eod {
            let day = arrival_tick / self.ticks_per_day;
            let eod_tick = (day + 1) * self.ticks_per_day - 1;
            deadline = deadline.min(eod_tick);
        }
        deadline.max(arrival_tick)
    }

    // ------------------------------------------------------------------
    // Scenario-event hooks
    // ------------------------------------------------------------------

    pub fn has_spec(&self, agent_id: &str) -> bool {
        self.specs.contains_key(agent_id)
    }

    /// Scale one agent's rates relative to its base configuration.
    pub fn scale_agent_rate(&mut self, agent_id: &str, factor: f64) -> bool {
        let Some(base) = self.base_specs.get(agent_id) else {
            return false;
        };
        let mut scaled = base.clone();
        for_each_profile_mut(&mut scaled, |p| p.rate_per_tick *= factor);
        self.specs.insert(agent_id.to_string(), scaled);
        true
    }

    /// Scale every agent's rates relative to its base configuration.
    pub fn scale_all_rates(&mut self, factor: f64) {
        let ids: Vec<String> = self.base_specs.keys().cloned().collect();
        for id in ids {
            self.scale_agent_rate(&id, factor);
        }
    }

    pub fn set_counterparty_weights(
        &mut self,
        agent_id: &str,
        weights: BTreeMap<String, f64>,
    ) -> bool {
        match self.specs.get_mut(agent_id) {
            Some(spec) => {
                for_each_profile_mut(spec, |p| p.counterparty_weights = weights.clone());
                true
            }
            None => false,
        }
    }

    pub fn set_deadline_window(&mut self, agent_id: &str, window: (u64, u64)) -> bool {
        match self.specs.get_mut(agent_id) {
            Some(spec) => {
                for_each_profile_mut(spec, |p| p.deadline_window = window);
                true
            }
            None => false,
        }
    }

    /// Mint a transaction id from the shared counter, for injected arrivals.
    pub fn mint_tx_id(&mut self) -> String {
        let id = format!("tx_{:08}", self.next_tx_id);
        self.next_tx_id += 1;
        id
    }
}

fn for_each_profile_mut(spec: &mut ArrivalSpec, mut f: impl FnMut(&mut ArrivalProfile)) {
    match spec {
        ArrivalSpec::Single(p) => f(p),
        ArrivalSpec::Bands {
            urgent,
            normal,
            low,
        } => {
            for p in [urgent, normal, low].into_iter().flatten() {
                f(p);
            }
        }
    }
}
