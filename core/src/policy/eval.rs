//! Decision-tree interpretation.
//!
//! Evaluation walks the compiled arena from the root until it reaches an
//! action node, then materializes the tree-kind-specific decision. Runtime
//! failures never abort the simulation: the engine logs a
//! `PolicyEvaluationError` event and falls back to the conservative
//! decision for the tree kind (Hold / NoAction / HoldCollateral).

use crate::money::Cents;
use crate::policy::ast::ActionName;
use crate::policy::compile::{BinOp, CComp, CExpr, CNode, CValue, CmpOp, CompiledTree};
use crate::policy::context::{EvalFrame, FieldError};
use std::collections::BTreeMap;
use thiserror::Error;

/// Epsilon for float equality and the div0 guard.
const FLOAT_EPSILON: f64 = 1e-9;

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("division by zero in node '{0}'")]
    DivisionByZero(String),

    #[error("parameter '{param}' of node '{node_id}' is not a number")]
    NonNumericParameter { node_id: String, param: String },

    #[error("parameter '{param}' of node '{node_id}' is not a string")]
    NonStringParameter { node_id: String, param: String },

    #[error("parameter '{param}' of node '{node_id}' is out of range: {value}")]
    ParameterOutOfRange {
        node_id: String,
        param: String,
        value: f64,
    },
}

/// Per-transaction decision from the payment tree.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentDecision {
    Release,
    Hold { reason: String },
    Split { parts: u32 },
    Drop { reason: String },
    Reprioritize { priority: u8 },
}

/// Per-tick agent-level directive from the bank tree.
#[derive(Debug, Clone, PartialEq)]
pub enum BankDecision {
    SetReleaseBudget { budget: Cents },
    SetState { key: String, value: f64 },
    AddState { key: String, delta: f64 },
    NoAction,
}

/// Collateral directive from either collateral tree.
#[derive(Debug, Clone, PartialEq)]
pub enum CollateralDecision {
    Post { amount: Cents },
    Withdraw { amount: Cents },
    Hold,
}

/// Walk the tree to its action node.
fn find_action<'t>(tree: &'t CompiledTree, frame: &EvalFrame) -> Result<&'t CNode, EvalError> {
    let mut idx = 0;
    // The arena is a compiled finite tree: indices only grow, so the walk
    // terminates within nodes.len() steps.
    for _ in 0..tree.len() {
        match tree.node(idx) {
            node @ CNode::Action { .. } => return Ok(node),
            CNode::Condition {
                node_id,
                expr,
                on_true,
                on_false,
            } => {
                idx = if eval_expr(expr, frame, node_id)? {
                    *on_true
                } else {
                    *on_false
                };
            }
        }
    }
    unreachable!("compiled tree has no action leaf");
}

fn eval_expr(expr: &CExpr, frame: &EvalFrame, node_id: &str) -> Result<bool, EvalError> {
    match expr {
        CExpr::Cmp { op, left, right } => {
            let l = eval_value(left, frame, node_id)?;
            let r = eval_value(right, frame, node_id)?;
            Ok(match op {
                CmpOp::Eq => (l - r).abs() < FLOAT_EPSILON,
                CmpOp::Ne => (l - r).abs() >= FLOAT_EPSILON,
                CmpOp::Lt => l < r,
                CmpOp::Le => l <= r || (l - r).abs() < FLOAT_EPSILON,
                CmpOp::Gt => l > r,
                CmpOp::Ge => l >= r || (l - r).abs() < FLOAT_EPSILON,
            })
        }
        CExpr::And(conditions) => {
            for c in conditions {
                if !eval_expr(c, frame, node_id)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        CExpr::Or(conditions) => {
            for c in conditions {
                if eval_expr(c, frame, node_id)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        CExpr::Not(condition) => Ok(!eval_expr(condition, frame, node_id)?),
    }
}

fn eval_value(value: &CValue, frame: &EvalFrame, node_id: &str) -> Result<f64, EvalError> {
    match value {
        CValue::Const(v) => Ok(*v),
        CValue::Str(_) => Err(EvalError::NonNumericParameter {
            node_id: node_id.to_string(),
            param: "<literal>".to_string(),
        }),
        CValue::Field(field) => Ok(frame.get(field)?),
        CValue::Compute(comp) => eval_computation(comp, frame, node_id),
    }
}

fn eval_computation(comp: &CComp, frame: &EvalFrame, node_id: &str) -> Result<f64, EvalError> {
    match comp {
        CComp::Bin { op, left, right } => {
            let l = eval_value(left, frame, node_id)?;
            let r = eval_value(right, frame, node_id)?;
            match op {
                BinOp::Add => Ok(l + r),
                BinOp::Sub => Ok(l - r),
                BinOp::Mul => Ok(l * r),
                BinOp::Div => {
                    if r.abs() < FLOAT_EPSILON {
                        Err(EvalError::DivisionByZero(node_id.to_string()))
                    } else {
                        Ok(l / r)
                    }
                }
            }
        }
        CComp::Min(values) => {
            let mut best = f64::INFINITY;
            for v in values {
                best = best.min(eval_value(v, frame, node_id)?);
            }
            Ok(best)
        }
        CComp::Max(values) => {
            let mut best = f64::NEG_INFINITY;
            for v in values {
                best = best.max(eval_value(v, frame, node_id)?);
            }
            Ok(best)
        }
        CComp::Clamp { value, min, max } => {
            let v = eval_value(value, frame, node_id)?;
            let lo = eval_value(min, frame, node_id)?;
            let hi = eval_value(max, frame, node_id)?;
            Ok(v.max(lo).min(hi))
        }
        CComp::SafeDiv {
            numerator,
            denominator,
            default,
        } => {
            let den = eval_value(denominator, frame, node_id)?;
            if den.abs() < FLOAT_EPSILON {
                eval_value(default, frame, node_id)
            } else {
                Ok(eval_value(numerator, frame, node_id)? / den)
            }
        }
    }
}

// ----------------------------------------------------------------------
// Action parameter helpers
// ----------------------------------------------------------------------

fn numeric_param(
    params: &BTreeMap<String, CValue>,
    name: &str,
    node_id: &str,
    frame: &EvalFrame,
) -> Result<f64, EvalError> {
    let value = params.get(name).ok_or_else(|| EvalError::NonNumericParameter {
        node_id: node_id.to_string(),
        param: name.to_string(),
    })?;
    eval_value(value, frame, node_id).map_err(|e| match e {
        EvalError::NonNumericParameter { .. } => EvalError::NonNumericParameter {
            node_id: node_id.to_string(),
            param: name.to_string(),
        },
        other => other,
    })
}

fn string_param(
    params: &BTreeMap<String, CValue>,
    name: &str,
    node_id: &str,
) -> Result<String, EvalError> {
    match params.get(name) {
        Some(CValue::Str(s)) => Ok(s.clone()),
        _ => Err(EvalError::NonStringParameter {
            node_id: node_id.to_string(),
            param: name.to_string(),
        }),
    }
}

fn optional_reason(params: &BTreeMap<String, CValue>) -> String {
    match params.get("reason") {
        Some(CValue::Str(s)) => s.clone(),
        _ => "policy".to_string(),
    }
}

/// f64 → cents, rounded half away from zero, never negative.
fn cents_param(value: f64, node_id: &str, param: &str) -> Result<Cents, EvalError> {
    if !value.is_finite() {
        return Err(EvalError::ParameterOutOfRange {
            node_id: node_id.to_string(),
            param: param.to_string(),
            value,
        });
    }
    Ok((value.round() as Cents).max(0))
}

// ----------------------------------------------------------------------
// Per-kind decision entry points
// ----------------------------------------------------------------------

pub fn decide_payment(
    tree: &CompiledTree,
    frame: &EvalFrame,
) -> Result<PaymentDecision, EvalError> {
    let node = find_action(tree, frame)?;
    let CNode::Action {
        node_id,
        action,
        params,
    } = node
    else {
        unreachable!()
    };
    match action {
        ActionName::Release => Ok(PaymentDecision::Release),
        ActionName::Hold => Ok(PaymentDecision::Hold {
            reason: optional_reason(params),
        }),
        ActionName::Drop => Ok(PaymentDecision::Drop {
            reason: optional_reason(params),
        }),
        ActionName::Split => {
            let parts = numeric_param(params, "parts", node_id, frame)?;
            if !(2.0..=64.0).contains(&parts.round()) {
                return Err(EvalError::ParameterOutOfRange {
                    node_id: node_id.clone(),
                    param: "parts".to_string(),
                    value: parts,
                });
            }
            Ok(PaymentDecision::Split {
                parts: parts.round() as u32,
            })
        }
        ActionName::Reprioritize => {
            let priority = numeric_param(params, "priority", node_id, frame)?;
            if !(0.0..=10.0).contains(&priority.round()) {
                return Err(EvalError::ParameterOutOfRange {
                    node_id: node_id.clone(),
                    param: "priority".to_string(),
                    value: priority,
                });
            }
            Ok(PaymentDecision::Reprioritize {
                priority: priority.round() as u8,
            })
        }
        // Unreachable for a validated payment tree.
        other => unreachable!("action {other:?} in payment tree"),
    }
}

pub fn decide_bank(tree: &CompiledTree, frame: &EvalFrame) -> Result<BankDecision, EvalError> {
    let node = find_action(tree, frame)?;
    let CNode::Action {
        node_id,
        action,
        params,
    } = node
    else {
        unreachable!()
    };
    match action {
        ActionName::NoAction => Ok(BankDecision::NoAction),
        ActionName::SetReleaseBudget => {
            let budget = numeric_param(params, "budget", node_id, frame)?;
            Ok(BankDecision::SetReleaseBudget {
                budget: cents_param(budget, node_id, "budget")?,
            })
        }
        ActionName::SetState => Ok(BankDecision::SetState {
            key: string_param(params, "key", node_id)?,
            value: numeric_param(params, "value", node_id, frame)?,
        }),
        ActionName::AddState => Ok(BankDecision::AddState {
            key: string_param(params, "key", node_id)?,
            delta: numeric_param(params, "delta", node_id, frame)?,
        }),
        other => unreachable!("action {other:?} in bank tree"),
    }
}

pub fn decide_collateral(
    tree: &CompiledTree,
    frame: &EvalFrame,
) -> Result<CollateralDecision, EvalError> {
    let node = find_action(tree, frame)?;
    let CNode::Action {
        node_id,
        action,
        params,
    } = node
    else {
        unreachable!()
    };
    match action {
        ActionName::HoldCollateral => Ok(CollateralDecision::Hold),
        ActionName::PostCollateral => {
            let amount = numeric_param(params, "amount", node_id, frame)?;
            Ok(CollateralDecision::Post {
                amount: cents_param(amount, node_id, "amount")?,
            })
        }
        ActionName::WithdrawCollateral => {
            let amount = numeric_param(params, "amount", node_id, frame)?;
            Ok(CollateralDecision::Withdraw {
                amount: cents_param(amount, node_id, "amount")?,
            })
        }
        other => unreachable!("action {other:?} in collateral tree"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::costs::CostRates;
    use crate::model::agent::Agent;
    use crate::model::transaction::Transaction;
    use crate::model::world::World;
    use crate::policy::ast::PolicyDoc;
    use crate::policy::compile::{compile_policy, DEFAULT_MAX_TREE_DEPTH};
    use crate::policy::context::SystemView;

    fn compile(json: &str) -> crate::policy::compile::CompiledPolicy {
        let doc: PolicyDoc = serde_json::from_str(json).unwrap();
        compile_policy(&doc, DEFAULT_MAX_TREE_DEPTH).unwrap()
    }

    fn fixture() -> (World, Transaction) {
        let world = World::new(vec![
            Agent::new("BANK_A".to_string(), 1_000_000, 0),
            Agent::new("BANK_B".to_string(), 0, 0),
        ]);
        let tx = Transaction::new(
            "tx_00000000".to_string(),
            "BANK_A".to_string(),
            "BANK_B".to_string(),
            400_000,
            0,
            50,
        );
        (world, tx)
    }

    fn sys() -> SystemView {
        SystemView {
            tick: 10,
            ticks_per_day: 100,
            eod_rush_threshold: 0.8,
        }
    }

    #[test]
    fn test_liquidity_gate_releases_when_covered() {
        let policy = compile(
            r#"{
            "version": "1.0",
            "policy_id": "gate",
            "payment_tree": {
                "node_id": "N1",
                "type": "condition",
                "condition": {"op": ">=", "left": {"field": "available_liquidity"}, "right": {"field": "amount"}},
                "on_true": {"node_id": "A1", "type": "action", "action": "Release"},
                "on_false": {"node_id": "A2", "type": "action", "action": "Hold"}
            }
        }"#,
        );
        let (world, tx) = fixture();
        let rates = CostRates::default();
        let agent = world.agent("BANK_A").unwrap();
        let frame = EvalFrame::for_transaction(&world, agent, &tx, sys(), &rates);
        assert_eq!(
            decide_payment(policy.payment.as_ref().unwrap(), &frame).unwrap(),
            PaymentDecision::Release
        );
    }

    #[test]
    fn test_division_by_zero_is_runtime_error() {
        let policy = compile(
            r#"{
            "version": "1.0",
            "policy_id": "divzero",
            "payment_tree": {
                "node_id": "N1",
                "type": "condition",
                "condition": {
                    "op": ">",
                    "left": {"compute": {"op": "/", "left": {"field": "amount"}, "right": {"value": 0}}},
                    "right": {"value": 1}
                },
                "on_true": {"node_id": "A1", "type": "action", "action": "Release"},
                "on_false": {"node_id": "A2", "type": "action", "action": "Hold"}
            }
        }"#,
        );
        let (world, tx) = fixture();
        let rates = CostRates::default();
        let agent = world.agent("BANK_A").unwrap();
        let frame = EvalFrame::for_transaction(&world, agent, &tx, sys(), &rates);
        assert_eq!(
            decide_payment(policy.payment.as_ref().unwrap(), &frame).unwrap_err(),
            EvalError::DivisionByZero("N1".to_string())
        );
    }

    #[test]
    fn test_div0_returns_default() {
        let policy = compile(
            r#"{
            "version": "1.0",
            "policy_id": "safediv",
            "payment_tree": {
                "node_id": "N1",
                "type": "condition",
                "condition": {
                    "op": "==",
                    "left": {"compute": {"op": "div0", "numerator": {"field": "amount"}, "denominator": {"value": 0}, "default": {"value": -1}}},
                    "right": {"value": -1}
                },
                "on_true": {"node_id": "A1", "type": "action", "action": "Release"},
                "on_false": {"node_id": "A2", "type": "action", "action": "Hold"}
            }
        }"#,
        );
        let (world, tx) = fixture();
        let rates = CostRates::default();
        let agent = world.agent("BANK_A").unwrap();
        let frame = EvalFrame::for_transaction(&world, agent, &tx, sys(), &rates);
        assert_eq!(
            decide_payment(policy.payment.as_ref().unwrap(), &frame).unwrap(),
            PaymentDecision::Release
        );
    }

    #[test]
    fn test_split_decision_with_computed_parts() {
        let policy = compile(
            r#"{
            "version": "1.0",
            "policy_id": "split",
            "parameters": {"n": 3},
            "payment_tree": {
                "node_id": "A1",
                "type": "action",
                "action": "Split",
                "parameters": {"parts": {"param": "n"}}
            }
        }"#,
        );
        let (world, tx) = fixture();
        let rates = CostRates::default();
        let agent = world.agent("BANK_A").unwrap();
        let frame = EvalFrame::for_transaction(&world, agent, &tx, sys(), &rates);
        assert_eq!(
            decide_payment(policy.payment.as_ref().unwrap(), &frame).unwrap(),
            PaymentDecision::Split { parts: 3 }
        );
    }

    #[test]
    fn test_bank_tree_set_state() {
        let policy = compile(
            r#"{
            "version": "1.0",
            "policy_id": "bank",
            "bank_tree": {
                "node_id": "B1",
                "type": "action",
                "action": "SetState",
                "parameters": {"key": {"value": "stress"}, "value": {"field": "queue2_size"}}
            }
        }"#,
        );
        let (world, _) = fixture();
        let rates = CostRates::default();
        let agent = world.agent("BANK_A").unwrap();
        let frame = EvalFrame::for_agent(&world, agent, sys(), &rates);
        assert_eq!(
            decide_bank(policy.bank.as_ref().unwrap(), &frame).unwrap(),
            BankDecision::SetState {
                key: "stress".to_string(),
                value: 0.0
            }
        );
    }

    #[test]
    fn test_collateral_tree_post() {
        let policy = compile(
            r#"{
            "version": "1.0",
            "policy_id": "coll",
            "strategic_collateral_tree": {
                "node_id": "C1",
                "type": "action",
                "action": "PostCollateral",
                "parameters": {"amount": {"value": 250000}}
            }
        }"#,
        );
        let (world, _) = fixture();
        let rates = CostRates::default();
        let agent = world.agent("BANK_A").unwrap();
        let frame = EvalFrame::for_agent(&world, agent, sys(), &rates);
        assert_eq!(
            decide_collateral(policy.strategic_collateral.as_ref().unwrap(), &frame).unwrap(),
            CollateralDecision::Post { amount: 250_000 }
        );
    }

    #[test]
    fn test_short_circuit_and_skips_failing_branch() {
        // Second conjunct divides by zero; the first is false, so the
        // expression short-circuits and never fails.
        let policy = compile(
            r#"{
            "version": "1.0",
            "policy_id": "shortcircuit",
            "payment_tree": {
                "node_id": "N1",
                "type": "condition",
                "condition": {
                    "op": "and",
                    "conditions": [
                        {"op": "<", "left": {"field": "balance"}, "right": {"value": 0}},
                        {"op": ">", "left": {"compute": {"op": "/", "left": {"value": 1}, "right": {"value": 0}}}, "right": {"value": 0}}
                    ]
                },
                "on_true": {"node_id": "A1", "type": "action", "action": "Drop"},
                "on_false": {"node_id": "A2", "type": "action", "action": "Release"}
            }
        }"#,
        );
        let (world, tx) = fixture();
        let rates = CostRates::default();
        let agent = world.agent("BANK_A").unwrap();
        let frame = EvalFrame::for_transaction(&world, agent, &tx, sys(), &rates);
        assert_eq!(
            decide_payment(policy.payment.as_ref().unwrap(), &frame).unwrap(),
            PaymentDecision::Release
        );
    }
}
