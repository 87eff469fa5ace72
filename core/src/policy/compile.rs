//! Policy compilation and load-time validation.
//!
//! A `PolicyDoc` is compiled into an arena of nodes per tree: children are
//! addressed by index, parameters are folded to constants, and every field
//! reference is resolved against the symbol table for the tree's kind. A
//! compiled tree cannot dangle, cycle, or name an unknown field: the whole
//! class of "typo discovered at tick 40_000" failures is moved to load time.

use crate::policy::ast::{
    ActionName, Computation, Expr, PolicyDoc, TreeKind, TreeNode, ValueSpec,
};
use crate::policy::context::{resolve_field, FieldError, FieldRef};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Default bound on tree depth.
pub const DEFAULT_MAX_TREE_DEPTH: usize = 15;

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("tree depth {depth} exceeds maximum {max}")]
    TreeTooDeep { depth: usize, max: usize },

    #[error("action {action:?} is not allowed in {tree}")]
    ActionNotAllowed {
        action: ActionName,
        tree: &'static str,
    },

    #[error("action node '{node_id}' is missing required parameter '{param}'")]
    MissingActionParameter { node_id: String, param: String },

    #[error("undefined parameter '{0}'")]
    UndefinedParameter(String),

    #[error("invalid literal in node '{node_id}': {message}")]
    InvalidLiteral { node_id: String, message: String },

    #[error("min/max computation with empty value list in node '{0}'")]
    EmptyValueList(String),

    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Compiled value: constants folded, fields resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum CValue {
    Const(f64),
    /// String literal; only legal as an action parameter (register keys,
    /// reason strings).
    Str(String),
    Field(FieldRef),
    Compute(Box<CComp>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CComp {
    Bin {
        op: BinOp,
        left: CValue,
        right: CValue,
    },
    Min(Vec<CValue>),
    Max(Vec<CValue>),
    Clamp {
        value: CValue,
        min: CValue,
        max: CValue,
    },
    SafeDiv {
        numerator: CValue,
        denominator: CValue,
        default: CValue,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CExpr {
    Cmp {
        op: CmpOp,
        left: CValue,
        right: CValue,
    },
    And(Vec<CExpr>),
    Or(Vec<CExpr>),
    Not(Box<CExpr>),
}

/// Arena node; children are arena indices.
#[derive(Debug, Clone, PartialEq)]
pub enum CNode {
    Condition {
        node_id: String,
        expr: CExpr,
        on_true: usize,
        on_false: usize,
    },
    Action {
        node_id: String,
        action: ActionName,
        params: BTreeMap<String, CValue>,
    },
}

impl CNode {
    pub fn node_id(&self) -> &str {
        match self {
            CNode::Condition { node_id, .. } | CNode::Action { node_id, .. } => node_id,
        }
    }
}

/// One compiled tree: root at index 0.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTree {
    pub kind: TreeKind,
    nodes: Vec<CNode>,
}

impl CompiledTree {
    pub fn root(&self) -> &CNode {
        &self.nodes[0]
    }

    pub fn node(&self, idx: usize) -> &CNode {
        &self.nodes[idx]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A fully validated, ready-to-evaluate policy.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    pub policy_id: String,
    pub payment: Option<CompiledTree>,
    pub bank: Option<CompiledTree>,
    pub strategic_collateral: Option<CompiledTree>,
    pub end_of_tick_collateral: Option<CompiledTree>,
}

/// Compile and validate a policy document.
pub fn compile_policy(
    doc: &PolicyDoc,
    max_depth: usize,
) -> Result<CompiledPolicy, PolicyError> {
    let mut seen_ids = HashSet::new();
    let trees = [
        (TreeKind::Payment, doc.payment_tree.as_ref()),
        (TreeKind::Bank, doc.bank_tree.as_ref()),
        (TreeKind::StrategicCollateral, doc.strategic_collateral_tree.as_ref()),
        (TreeKind::EndOfTickCollateral, doc.end_of_tick_collateral_tree.as_ref()),
    ];

    let mut compiled: [Option<CompiledTree>; 4] = [None, None, None, None];
    for (slot, (kind, tree)) in compiled.iter_mut().zip(trees) {
        if let Some(root) = tree {
            *slot = Some(compile_tree(
                root,
                kind,
                &doc.parameters,
                max_depth,
                &mut seen_ids,
            )?);
        }
    }
    let [payment, bank, strategic_collateral, end_of_tick_collateral] = compiled;

    Ok(CompiledPolicy {
        policy_id: doc.policy_id.clone(),
        payment,
        bank,
        strategic_collateral,
        end_of_tick_collateral,
    })
}

fn compile_tree(
    root: &TreeNode,
    kind: TreeKind,
    params: &HashMap<String, f64>,
    max_depth: usize,
    seen_ids: &mut HashSet<String>,
) -> Result<CompiledTree, PolicyError> {
    let mut ctx = TreeCompiler {
        kind,
        params,
        max_depth,
        seen_ids,
        nodes: Vec::new(),
    };
    ctx.compile_node(root, 1)?;
    Ok(CompiledTree {
        kind,
        nodes: ctx.nodes.into_iter().map(Option::unwrap).collect(),
    })
}

struct TreeCompiler<'a> {
    kind: TreeKind,
    params: &'a HashMap<String, f64>,
    max_depth: usize,
    seen_ids: &'a mut HashSet<String>,
    nodes: Vec<Option<CNode>>,
}

impl TreeCompiler<'_> {
    fn compile_node(&mut self, node: &TreeNode, depth: usize) -> Result<usize, PolicyError> {
        if depth > self.max_depth {
            return Err(PolicyError::TreeTooDeep {
                depth,
                max: self.max_depth,
            });
        }
        if !self.seen_ids.insert(node.node_id().to_string()) {
            return Err(PolicyError::DuplicateNodeId(node.node_id().to_string()));
        }

        // Reserve the slot first so parents precede children in the arena.
        let idx = self.nodes.len();
        self.nodes.push(None);

        let compiled = match node {
            TreeNode::Condition {
                node_id,
                condition,
                on_true,
                on_false,
            } => {
                let expr = self.compile_expr(condition, node_id)?;
                let on_true = self.compile_node(on_true, depth + 1)?;
                let on_false = self.compile_node(on_false, depth + 1)?;
                CNode::Condition {
                    node_id: node_id.clone(),
                    expr,
                    on_true,
                    on_false,
                }
            }
            TreeNode::Action {
                node_id,
                action,
                parameters,
            } => {
                if !self.kind.allowed_actions().contains(action) {
                    return Err(PolicyError::ActionNotAllowed {
                        action: *action,
                        tree: self.kind.name(),
                    });
                }
                for required in action.required_parameters() {
                    if !parameters.contains_key(*required) {
                        return Err(PolicyError::MissingActionParameter {
                            node_id: node_id.clone(),
                            param: (*required).to_string(),
                        });
                    }
                }
                let mut params = BTreeMap::new();
                for (name, spec) in parameters {
                    params.insert(name.clone(), self.compile_value(spec, node_id, true)?);
                }
                CNode::Action {
                    node_id: node_id.clone(),
                    action: *action,
                    params,
                }
            }
        };

        self.nodes[idx] = Some(compiled);
        Ok(idx)
    }

    fn compile_expr(&mut self, expr: &Expr, node_id: &str) -> Result<CExpr, PolicyError> {
        let cmp = |this: &mut Self, op, left, right| -> Result<CExpr, PolicyError> {
            Ok(CExpr::Cmp {
                op,
                left: this.compile_value(left, node_id, false)?,
                right: this.compile_value(right, node_id, false)?,
            })
        };
        match expr {
            Expr::Eq { left, right } => cmp(self, CmpOp::Eq, left, right),
            Expr::Ne { left, right } => cmp(self, CmpOp::Ne, left, right),
            Expr::Lt { left, right } => cmp(self, CmpOp::Lt, left, right),
            Expr::Le { left, right } => cmp(self, CmpOp::Le, left, right),
            Expr::Gt { left, right } => cmp(self, CmpOp::Gt, left, right),
            Expr::Ge { left, right } => cmp(self, CmpOp::Ge, left, right),
            Expr::And { conditions } => Ok(CExpr::And(
                conditions
                    .iter()
                    .map(|c| self.compile_expr(c, node_id))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Or { conditions } => Ok(CExpr::Or(
                conditions
                    .iter()
                    .map(|c| self.compile_expr(c, node_id))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Not { condition } => Ok(CExpr::Not(Box::new(
                self.compile_expr(condition, node_id)?,
            ))),
        }
    }

    fn compile_value(
        &mut self,
        spec: &ValueSpec,
        node_id: &str,
        allow_strings: bool,
    ) -> Result<CValue, PolicyError> {
        match spec {
            ValueSpec::Field { field } => {
                Ok(CValue::Field(resolve_field(field, self.kind)?))
            }
            ValueSpec::Param { param } => self
                .params
                .get(param)
                .map(|v| CValue::Const(*v))
                .ok_or_else(|| PolicyError::UndefinedParameter(param.clone())),
            ValueSpec::Literal { value } => {
                if let Some(n) = value.as_f64() {
                    Ok(CValue::Const(n))
                } else if let Some(b) = value.as_bool() {
                    Ok(CValue::Const(if b { 1.0 } else { 0.0 }))
                } else if let (true, Some(s)) = (allow_strings, value.as_str()) {
                    Ok(CValue::Str(s.to_string()))
                } else {
                    Err(PolicyError::InvalidLiteral {
                        node_id: node_id.to_string(),
                        message: format!("expected a number, got {value}"),
                    })
                }
            }
            ValueSpec::Compute { compute } => Ok(CValue::Compute(Box::new(
                self.compile_computation(compute, node_id)?,
            ))),
        }
    }

    fn compile_computation(
        &mut self,
        comp: &Computation,
        node_id: &str,
    ) -> Result<CComp, PolicyError> {
        let bin = |this: &mut Self, op, left, right| -> Result<CComp, PolicyError> {
            Ok(CComp::Bin {
                op,
                left: this.compile_value(left, node_id, false)?,
                right: this.compile_value(right, node_id, false)?,
            })
        };
        match comp {
            Computation::Add { left, right } => bin(self, BinOp::Add, left, right),
            Computation::Sub { left, right } => bin(self, BinOp::Sub, left, right),
            Computation::Mul { left, right } => bin(self, BinOp::Mul, left, right),
            Computation::Div { left, right } => bin(self, BinOp::Div, left, right),
            Computation::Min { values } => {
                if values.is_empty() {
                    return Err(PolicyError::EmptyValueList(node_id.to_string()));
                }
                Ok(CComp::Min(
                    values
                        .iter()
                        .map(|v| self.compile_value(v, node_id, false))
                        .collect::<Result<_, _>>()?,
                ))
            }
            Computation::Max { values } => {
                if values.is_empty() {
                    return Err(PolicyError::EmptyValueList(node_id.to_string()));
                }
                Ok(CComp::Max(
                    values
                        .iter()
                        .map(|v| self.compile_value(v, node_id, false))
                        .collect::<Result<_, _>>()?,
                ))
            }
            Computation::Clamp { value, min, max } => Ok(CComp::Clamp {
                value: self.compile_value(value, node_id, false)?,
                min: self.compile_value(min, node_id, false)?,
                max: self.compile_value(max, node_id, false)?,
            }),
            Computation::SafeDiv {
                numerator,
                denominator,
                default,
            } => Ok(CComp::SafeDiv {
                numerator: self.compile_value(numerator, node_id, false)?,
                denominator: self.compile_value(denominator, node_id, false)?,
                default: self.compile_value(default, node_id, false)?,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> PolicyDoc {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_compile_release_always() {
        let policy = compile_policy(
            &PolicyDoc::release_always("p"),
            DEFAULT_MAX_TREE_DEPTH,
        )
        .unwrap();
        assert!(policy.payment.is_some());
        assert_eq!(policy.payment.unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_wrong_alphabet_action() {
        let d = doc(
            r#"{
            "version": "1.0",
            "policy_id": "bad",
            "bank_tree": {"node_id": "A1", "type": "action", "action": "Release"}
        }"#,
        );
        let err = compile_policy(&d, DEFAULT_MAX_TREE_DEPTH).unwrap_err();
        assert!(matches!(err, PolicyError::ActionNotAllowed { .. }));
    }

    #[test]
    fn test_rejects_unknown_field_at_load() {
        let d = doc(
            r#"{
            "version": "1.0",
            "policy_id": "bad",
            "payment_tree": {
                "node_id": "N1",
                "type": "condition",
                "condition": {"op": ">", "left": {"field": "balanec"}, "right": {"value": 0}},
                "on_true": {"node_id": "A1", "type": "action", "action": "Release"},
                "on_false": {"node_id": "A2", "type": "action", "action": "Hold"}
            }
        }"#,
        );
        let err = compile_policy(&d, DEFAULT_MAX_TREE_DEPTH).unwrap_err();
        assert!(matches!(err, PolicyError::Field(FieldError::Unknown(_))));
    }

    #[test]
    fn test_rejects_tx_field_in_bank_tree() {
        let d = doc(
            r#"{
            "version": "1.0",
            "policy_id": "bad",
            "bank_tree": {
                "node_id": "N1",
                "type": "condition",
                "condition": {"op": ">", "left": {"field": "amount"}, "right": {"value": 0}},
                "on_true": {"node_id": "A1", "type": "action", "action": "NoAction"},
                "on_false": {"node_id": "A2", "type": "action", "action": "NoAction"}
            }
        }"#,
        );
        let err = compile_policy(&d, DEFAULT_MAX_TREE_DEPTH).unwrap_err();
        assert!(matches!(err, PolicyError::Field(FieldError::OutOfScope { .. })));
    }

    #[test]
    fn test_rejects_undefined_parameter() {
        let d = doc(
            r#"{
            "version": "1.0",
            "policy_id": "bad",
            "payment_tree": {
                "node_id": "N1",
                "type": "condition",
                "condition": {"op": ">", "left": {"field": "balance"}, "right": {"param": "missing"}},
                "on_true": {"node_id": "A1", "type": "action", "action": "Release"},
                "on_false": {"node_id": "A2", "type": "action", "action": "Hold"}
            }
        }"#,
        );
        assert_eq!(
            compile_policy(&d, DEFAULT_MAX_TREE_DEPTH).unwrap_err(),
            PolicyError::UndefinedParameter("missing".to_string())
        );
    }

    #[test]
    fn test_rejects_duplicate_node_ids_across_trees() {
        let d = doc(
            r#"{
            "version": "1.0",
            "policy_id": "bad",
            "payment_tree": {"node_id": "A1", "type": "action", "action": "Release"},
            "bank_tree": {"node_id": "A1", "type": "action", "action": "NoAction"}
        }"#,
        );
        assert_eq!(
            compile_policy(&d, DEFAULT_MAX_TREE_DEPTH).unwrap_err(),
            PolicyError::DuplicateNodeId("A1".to_string())
        );
    }

    #[test]
    fn test_rejects_missing_action_parameter() {
        let d = doc(
            r#"{
            "version": "1.0",
            "policy_id": "bad",
            "payment_tree": {"node_id": "A1", "type": "action", "action": "Split"}
        }"#,
        );
        let err = compile_policy(&d, DEFAULT_MAX_TREE_DEPTH).unwrap_err();
        assert!(matches!(err, PolicyError::MissingActionParameter { .. }));
    }

    #[test]
    fn test_rejects_tree_deeper_than_limit() {
        // Build a chain of nested conditions deeper than the limit.
        let mut node = r#"{"node_id": "L", "type": "action", "action": "Hold"}"#.to_string();
        for i in 0..16 {
            node = format!(
                r#"{{
                "node_id": "N{i}",
                "type": "condition",
                "condition": {{"op": ">", "left": {{"field": "balance"}}, "right": {{"value": 0}}}},
                "on_true": {node},
                "on_false": {{"node_id": "F{i}", "type": "action", "action": "Hold"}}
            }}"#
            );
        }
        let d = doc(&format!(
            r#"{{"version": "1.0", "policy_id": "deep", "payment_tree": {node}}}"#
        ));
        let err = compile_policy(&d, DEFAULT_MAX_TREE_DEPTH).unwrap_err();
        assert!(matches!(err, PolicyError::TreeTooDeep { .. }));
    }

    #[test]
    fn test_param_folded_to_constant() {
        let d = doc(
            r#"{
            "version": "1.0",
            "policy_id": "ok",
            "parameters": {"buffer": 250000},
            "payment_tree": {
                "node_id": "N1",
                "type": "condition",
                "condition": {"op": ">", "left": {"field": "balance"}, "right": {"param": "buffer"}},
                "on_true": {"node_id": "A1", "type": "action", "action": "Release"},
                "on_false": {"node_id": "A2", "type": "action", "action": "Hold"}
            }
        }"#,
        );
        let policy = compile_policy(&d, DEFAULT_MAX_TREE_DEPTH).unwrap();
        let tree = policy.payment.unwrap();
        match tree.root() {
            CNode::Condition { expr, .. } => match expr {
                CExpr::Cmp { right, .. } => assert_eq!(*right, CValue::Const(250_000.0)),
                _ => panic!("expected comparison"),
            },
            _ => panic!("expected condition root"),
        }
    }
}
