//! Conservation and queue-discipline invariants under randomized load.

use proptest::prelude::*;
use simcash_core::{Engine, SimConfig, TxStatus};

fn random_config(seed: u64, rate_a: f64, rate_b: f64, lsm_on: bool) -> SimConfig {
    serde_json::from_value(serde_json::json!({
        "ticks_per_day": 10,
        "num_days": 2,
        "rng_seed": seed,
        "priority_mode": true,
        "lsm": {"enable_bilateral": lsm_on, "enable_cycles": lsm_on},
        "agents": [
            {
                "id": "BANK_A",
                "opening_balance": 200_000,
                "unsecured_cap": 50_000,
                "arrivals": {"single": {
                    "rate_per_tick": rate_a,
                    "amount": {"kind": "uniform", "min": 1_000, "max": 90_000},
                    "deadline_window": [1, 8]
                }}
            },
            {
                "id": "BANK_B",
                "opening_balance": 150_000,
                "arrivals": {"single": {
                    "rate_per_tick": rate_b,
                    "amount": {"kind": "exponential", "lambda": 0.0001},
                    "deadline_window": [1, 8]
                }}
            },
            {"id": "BANK_C", "opening_balance": 50_000}
        ]
    }))
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Settlement moves money, it never creates or destroys it: the system
    /// balance is constant at every tick boundary. Costs are bookkeeping
    /// accumulators, not balance deductions.
    #[test]
    fn prop_total_balance_conserved(
        seed in any::<u64>(),
        rate_a in 0.0f64..3.0,
        rate_b in 0.0f64..3.0,
        lsm_on in any::<bool>(),
    ) {
        let mut engine = Engine::new(random_config(seed, rate_a, rate_b, lsm_on)).unwrap();
        let initial: i64 = ["BANK_A", "BANK_B", "BANK_C"]
            .iter()
            .map(|id| engine.agent_balance(id).unwrap())
            .sum();
        for _ in 0..20 {
            engine.tick().unwrap();
            let total: i64 = ["BANK_A", "BANK_B", "BANK_C"]
                .iter()
                .map(|id| engine.agent_balance(id).unwrap())
                .sum();
            prop_assert_eq!(total, initial);
        }
    }

    /// No transaction is ever in both queues at once, and settled
    /// transactions carry a zero remainder.
    #[test]
    fn prop_queue_discipline(
        seed in any::<u64>(),
        rate_a in 0.5f64..2.5,
    ) {
        let mut engine = Engine::new(random_config(seed, rate_a, 1.0, true)).unwrap();
        for _ in 0..20 {
            engine.tick().unwrap();

            let queue2: std::collections::BTreeSet<String> =
                engine.queue2_tx_ids().into_iter().collect();
            for agent_id in ["BANK_A", "BANK_B", "BANK_C"] {
                for tx_id in engine.queue1_tx_ids(agent_id) {
                    prop_assert!(
                        !queue2.contains(&tx_id),
                        "{} is in both queues", tx_id
                    );
                }
            }
            for event in engine.events() {
                if let Some(tx_id) = event.kind.tx_id() {
                    if let Some(tx) = engine.transaction(tx_id) {
                        if matches!(tx.status(), TxStatus::Settled { .. }) {
                            prop_assert_eq!(tx.remaining_amount(), 0);
                        }
                    }
                }
            }
        }
    }

    /// Liquidity floor: an agent's balance never drops below its overdraft
    /// limit through the settlement paths.
    #[test]
    fn prop_overdraft_limit_respected(
        seed in any::<u64>(),
        rate_a in 0.5f64..3.0,
    ) {
        let mut engine = Engine::new(random_config(seed, rate_a, 1.5, true)).unwrap();
        for _ in 0..20 {
            engine.tick().unwrap();
            // BANK_A: cap 50_000, no collateral. Others: no overdraft room.
            prop_assert!(engine.agent_balance("BANK_A").unwrap() >= -50_000);
            prop_assert!(engine.agent_balance("BANK_B").unwrap() >= 0);
            prop_assert!(engine.agent_balance("BANK_C").unwrap() >= 0);
        }
    }
}
