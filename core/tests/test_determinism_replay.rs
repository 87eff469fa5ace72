//! Determinism and replay identity.

use simcash_core::{replay_balances, Engine, EventRecord, RunOutcome, SimConfig};
use std::collections::BTreeMap;

/// A busy configuration: arrivals on both agents, priority mode, LSM on,
/// escalation on, a repeating scenario event.
fn busy_config(seed: u64) -> SimConfig {
    serde_json::from_value(serde_json::json!({
        "ticks_per_day": 20,
        "num_days": 2,
        "rng_seed": seed,
        "priority_mode": true,
        "priority_escalation": {
            "enabled": true,
            "curve": "linear",
            "start_escalating_at_ticks": 5,
            "max_boost": 3
        },
        "deadline_cap_at_eod": false,
        "cost_rates": {
            "overdraft_bps_per_tick": 0.5,
            "delay_cost_per_tick_per_cent": 0.0001,
            "deadline_penalty": 5_000,
            "eod_penalty_per_transaction": 2_000
        },
        "agents": [
            {
                "id": "BANK_A",
                "opening_balance": 300_000,
                "unsecured_cap": 100_000,
                "arrivals": {"single": {
                    "rate_per_tick": 1.2,
                    "amount": {"kind": "log_normal", "mu": 10.0, "sigma": 0.8},
                    "deadline_window": [3, 12],
                    "priority": {"kind": "uniform", "min": 0, "max": 10}
                }}
            },
            {
                "id": "BANK_B",
                "opening_balance": 300_000,
                "arrivals": {"single": {
                    "rate_per_tick": 0.9,
                    "amount": {"kind": "uniform", "min": 5_000, "max": 80_000},
                    "deadline_window": [2, 8],
                    "priority": {"kind": "fixed", "value": 6}
                }}
            },
            {
                "id": "BANK_C",
                "opening_balance": 100_000,
                "arrivals": {"single": {
                    "rate_per_tick": 0.7,
                    "amount": {"kind": "normal", "mean": 40_000, "std_dev": 15_000},
                    "deadline_window": [2, 10],
                    "priority": {"kind": "categorical", "values": [2, 5, 9], "weights": [1.0, 2.0, 1.0]}
                }}
            }
        ],
        "scenario_events": [
            {
                "schedule": {"kind": "repeating", "start_tick": 5, "interval_ticks": 10},
                "payload": {"type": "direct_transfer",
                            "from_agent": "BANK_B", "to_agent": "BANK_C", "amount": 25_000}
            }
        ]
    }))
    .unwrap()
}

fn run_to_completion(seed: u64) -> (Vec<String>, BTreeMap<String, i64>) {
    let mut engine = Engine::new(busy_config(seed)).unwrap();
    assert_eq!(
        engine.run(None).unwrap(),
        RunOutcome::Completed { ticks: 40 }
    );
    let balances = ["BANK_A", "BANK_B", "BANK_C"]
        .iter()
        .map(|id| (id.to_string(), engine.agent_balance(id).unwrap()))
        .collect();
    (engine.event_lines(), balances)
}

#[test]
fn test_identical_runs_are_byte_identical() {
    let (lines_1, balances_1) = run_to_completion(424_242);
    let (lines_2, balances_2) = run_to_completion(424_242);
    assert_eq!(lines_1.len(), lines_2.len());
    assert_eq!(lines_1, lines_2, "event streams must be byte-identical");
    assert_eq!(balances_1, balances_2);
}

#[test]
fn test_different_seeds_differ() {
    let (lines_1, _) = run_to_completion(1);
    let (lines_2, _) = run_to_completion(2);
    assert_ne!(lines_1, lines_2);
}

#[test]
fn test_replay_reconstructs_final_balances() {
    let (lines, final_balances) = run_to_completion(777);
    let records: Vec<EventRecord> = lines
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    let opening = BTreeMap::from([
        ("BANK_A".to_string(), 300_000),
        ("BANK_B".to_string(), 300_000),
        ("BANK_C".to_string(), 100_000),
    ]);
    let replayed = replay_balances(&opening, &records, false);
    for (agent_id, balance) in &final_balances {
        assert_eq!(
            replayed.get(agent_id),
            Some(balance),
            "replayed balance mismatch for {agent_id}"
        );
    }
}

#[test]
fn test_replay_reconstructs_deferred_run() {
    let mut config = busy_config(999);
    config.deferred_crediting = true;
    let mut engine = Engine::new(config).unwrap();
    engine.run(None).unwrap();

    let records: Vec<EventRecord> = engine
        .event_lines()
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let opening = BTreeMap::from([
        ("BANK_A".to_string(), 300_000),
        ("BANK_B".to_string(), 300_000),
        ("BANK_C".to_string(), 100_000),
    ]);
    let replayed = replay_balances(&opening, &records, true);
    for agent_id in ["BANK_A", "BANK_B", "BANK_C"] {
        assert_eq!(
            replayed[agent_id],
            engine.agent_balance(agent_id).unwrap(),
            "deferred replay mismatch for {agent_id}"
        );
    }
}

#[test]
fn test_event_records_roundtrip_and_sequence_dense() {
    let mut engine = Engine::new(busy_config(31_337)).unwrap();
    engine.run(None).unwrap();

    for tick in 0..40 {
        let events = engine.tick_events(tick);
        for (i, event) in events.iter().enumerate() {
            // Dense 0..N-1 sequence numbers.
            assert_eq!(event.seq, i as u64, "sparse seq at tick {tick}");
            // Wire round-trip.
            let line = event.to_json_line(engine.sim_id()).unwrap();
            let record: EventRecord = serde_json::from_str(&line).unwrap();
            assert_eq!(&record.to_event(), event);
            assert_eq!(record.sim_id, engine.sim_id());
        }
    }
}

#[test]
fn test_cancellation_between_ticks() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let mut engine = Engine::new(busy_config(55)).unwrap();
    let cancel = AtomicBool::new(true);
    let outcome = engine.run(Some(&cancel)).unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled { at_tick: 0 });
    assert_eq!(engine.events().len(), 0, "no partial tick committed");

    cancel.store(false, Ordering::Relaxed);
    assert_eq!(
        engine.run(Some(&cancel)).unwrap(),
        RunOutcome::Completed { ticks: 40 }
    );
}
