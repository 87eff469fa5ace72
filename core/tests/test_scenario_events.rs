//! Scheduled scenario events through the engine.

use simcash_core::{Engine, EventKind, SimConfig, SimError};

fn base_config(extra_events: serde_json::Value) -> SimConfig {
    serde_json::from_value(serde_json::json!({
        "ticks_per_day": 10,
        "num_days": 1,
        "rng_seed": 41,
        "agents": [
            {
                "id": "BANK_A",
                "opening_balance": 500_000,
                "arrivals": {"single": {
                    "rate_per_tick": 1.0,
                    "amount": {"kind": "uniform", "min": 1_000, "max": 5_000},
                    "deadline_window": [2, 6]
                }}
            },
            {"id": "BANK_B", "opening_balance": 500_000}
        ],
        "scenario_events": extra_events
    }))
    .unwrap()
}

#[test]
fn test_direct_transfer_moves_funds_and_logs() {
    let mut engine = Engine::new(base_config(serde_json::json!([
        {
            "schedule": {"kind": "one_time", "tick": 2},
            "payload": {"type": "direct_transfer",
                        "from_agent": "BANK_A", "to_agent": "BANK_B", "amount": 123_456}
        }
    ])))
    .unwrap();
    for _ in 0..3 {
        engine.tick().unwrap();
    }

    assert!(engine.tick_events(2).iter().any(|e| matches!(
        &e.kind,
        EventKind::ScenarioEventApplied { kind, .. } if kind == "direct_transfer"
    )));
    // The sum moved exactly once; no transaction record was created.
    let total: i64 = engine.agent_balance("BANK_A").unwrap() + engine.agent_balance("BANK_B").unwrap();
    assert_eq!(total, 1_000_000);
    assert!(engine.agent_balance("BANK_B").unwrap() >= 623_456);
}

#[test]
fn test_repeating_event_fires_on_interval() {
    let mut engine = Engine::new(base_config(serde_json::json!([
        {
            "schedule": {"kind": "repeating", "start_tick": 1, "interval_ticks": 3},
            "payload": {"type": "direct_transfer",
                        "from_agent": "BANK_A", "to_agent": "BANK_B", "amount": 1_000}
        }
    ])))
    .unwrap();
    engine.run(None).unwrap();

    let fired: Vec<u64> = engine
        .events()
        .iter()
        .filter(|e| matches!(e.kind, EventKind::ScenarioEventApplied { .. }))
        .map(|e| e.tick)
        .collect();
    assert_eq!(fired, vec![1, 4, 7]);
}

#[test]
fn test_rate_change_scales_arrivals() {
    // Zeroing the arrival rate from tick 0 silences generation entirely.
    let mut engine = Engine::new(base_config(serde_json::json!([
        {
            "schedule": {"kind": "one_time", "tick": 0},
            "payload": {"type": "agent_arrival_rate_change", "agent": "BANK_A", "factor": 0.0}
        }
    ])))
    .unwrap();
    engine.run(None).unwrap();
    let arrivals = engine
        .events()
        .iter()
        .filter(|e| matches!(e.kind, EventKind::Arrival { .. }))
        .count();
    assert_eq!(arrivals, 0);
}

#[test]
fn test_global_rate_change_resets_relative_to_base() {
    // Doubling twice is still 2× the base, not 4×.
    let config_once = base_config(serde_json::json!([
        {
            "schedule": {"kind": "one_time", "tick": 0},
            "payload": {"type": "global_arrival_rate_change", "factor": 2.0}
        }
    ]));
    let config_twice = base_config(serde_json::json!([
        {
            "schedule": {"kind": "one_time", "tick": 0},
            "payload": {"type": "global_arrival_rate_change", "factor": 2.0}
        },
        {
            "schedule": {"kind": "one_time", "tick": 0},
            "payload": {"type": "global_arrival_rate_change", "factor": 2.0}
        }
    ]));

    let count_arrivals = |config: SimConfig| {
        let mut engine = Engine::new(config).unwrap();
        engine.run(None).unwrap();
        engine
            .events()
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Arrival { .. }))
            .count()
    };
    assert_eq!(count_arrivals(config_once), count_arrivals(config_twice));
}

#[test]
fn test_deadline_window_change_applies_to_new_arrivals() {
    let mut engine = Engine::new(base_config(serde_json::json!([
        {
            "schedule": {"kind": "one_time", "tick": 3},
            "payload": {"type": "deadline_window_change", "agent": "BANK_A", "new_range": [1, 1]}
        }
    ])))
    .unwrap();
    engine.run(None).unwrap();

    for event in engine.events() {
        if event.tick >= 3 {
            if let EventKind::Arrival {
                deadline_tick, ..
            } = &event.kind
            {
                // Offset of exactly 1 tick, still capped at the horizon.
                assert_eq!(*deadline_tick, (event.tick + 1).min(9));
            }
        }
    }
}

#[test]
fn test_collateral_adjustment_below_zero_aborts_tick() {
    let mut engine = Engine::new(base_config(serde_json::json!([
        {
            "schedule": {"kind": "one_time", "tick": 1},
            "payload": {"type": "collateral_adjustment", "agent": "BANK_A", "delta": -1}
        }
    ])))
    .unwrap();
    engine.tick().unwrap();
    let err = engine.tick().unwrap_err();
    assert!(matches!(err, SimError::Scenario { tick: 1, .. }));
    // The failed tick committed nothing.
    assert!(engine.tick_events(1).is_empty());
}

#[test]
fn test_rate_change_for_agent_without_arrivals_fails() {
    let mut engine = Engine::new(base_config(serde_json::json!([
        {
            "schedule": {"kind": "one_time", "tick": 0},
            "payload": {"type": "agent_arrival_rate_change", "agent": "BANK_B", "factor": 2.0}
        }
    ])))
    .unwrap();
    assert!(matches!(
        engine.tick().unwrap_err(),
        SimError::Scenario { tick: 0, .. }
    ));
}

#[test]
fn test_counterparty_weight_change() {
    // Three agents; after the change BANK_A only ever pays BANK_C.
    let config: SimConfig = serde_json::from_value(serde_json::json!({
        "ticks_per_day": 20,
        "num_days": 1,
        "rng_seed": 43,
        "agents": [
            {
                "id": "BANK_A",
                "opening_balance": 500_000,
                "arrivals": {"single": {
                    "rate_per_tick": 1.0,
                    "amount": {"kind": "uniform", "min": 1_000, "max": 2_000},
                    "deadline_window": [2, 6]
                }}
            },
            {"id": "BANK_B", "opening_balance": 500_000},
            {"id": "BANK_C", "opening_balance": 500_000}
        ],
        "scenario_events": [
            {
                "schedule": {"kind": "one_time", "tick": 0},
                "payload": {"type": "counterparty_weight_change", "agent": "BANK_A",
                            "weights": {"BANK_C": 1.0}}
            }
        ]
    }))
    .unwrap();
    let mut engine = Engine::new(config).unwrap();
    engine.run(None).unwrap();

    for event in engine.events() {
        if let EventKind::Arrival { receiver_id, .. } = &event.kind {
            assert_eq!(receiver_id, "BANK_C");
        }
    }
}
