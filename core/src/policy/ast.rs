//! Policy document types.
//!
//! Policies are JSON decision trees, written (and rewritten) by the outer
//! optimization layer. Deserialization accepts any structurally valid tree;
//! semantic validation and compilation to the arena form happen in
//! `validate`/`eval`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Complete policy document for one agent.
///
/// Up to four trees, each with its own action alphabet:
/// - `payment_tree`: per-transaction release decisions (Queue 1 → Queue 2)
/// - `bank_tree`: once-per-tick agent-level directives
/// - `strategic_collateral_tree`: once per day, first tick
/// - `end_of_tick_collateral_tree`: every tick, after settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDoc {
    /// Schema version (currently "1.0").
    pub version: String,

    pub policy_id: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub payment_tree: Option<TreeNode>,

    #[serde(default)]
    pub bank_tree: Option<TreeNode>,

    #[serde(default)]
    pub strategic_collateral_tree: Option<TreeNode>,

    #[serde(default)]
    pub end_of_tick_collateral_tree: Option<TreeNode>,

    /// Named constants referenced by `{"param": …}` values.
    #[serde(default)]
    pub parameters: HashMap<String, f64>,
}

impl PolicyDoc {
    /// A minimal policy that releases every payment immediately.
    pub fn release_always(policy_id: &str) -> Self {
        Self {
            version: "1.0".to_string(),
            policy_id: policy_id.to_string(),
            description: None,
            payment_tree: Some(TreeNode::Action {
                node_id: "A1".to_string(),
                action: ActionName::Release,
                parameters: HashMap::new(),
            }),
            bank_tree: None,
            strategic_collateral_tree: None,
            end_of_tick_collateral_tree: None,
            parameters: HashMap::new(),
        }
    }

    /// A policy that holds every payment (used as a conservative default).
    pub fn hold_always(policy_id: &str) -> Self {
        Self {
            payment_tree: Some(TreeNode::Action {
                node_id: "A1".to_string(),
                action: ActionName::Hold,
                parameters: HashMap::new(),
            }),
            ..Self::release_always(policy_id)
        }
    }
}

/// Which of the four trees a node belongs to; determines the legal action
/// alphabet and the visible context fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    Payment,
    Bank,
    StrategicCollateral,
    EndOfTickCollateral,
}

impl TreeKind {
    pub fn name(self) -> &'static str {
        match self {
            TreeKind::Payment => "payment_tree",
            TreeKind::Bank => "bank_tree",
            TreeKind::StrategicCollateral => "strategic_collateral_tree",
            TreeKind::EndOfTickCollateral => "end_of_tick_collateral_tree",
        }
    }

    /// Legal actions for this tree kind. The alphabets are disjoint except
    /// for the two collateral trees, which share theirs.
    pub fn allowed_actions(self) -> &'static [ActionName] {
        match self {
            TreeKind::Payment => &[
                ActionName::Release,
                ActionName::Hold,
                ActionName::Split,
                ActionName::Drop,
                ActionName::Reprioritize,
            ],
            TreeKind::Bank => &[
                ActionName::SetReleaseBudget,
                ActionName::SetState,
                ActionName::AddState,
                ActionName::NoAction,
            ],
            TreeKind::StrategicCollateral | TreeKind::EndOfTickCollateral => &[
                ActionName::PostCollateral,
                ActionName::WithdrawCollateral,
                ActionName::HoldCollateral,
            ],
        }
    }
}

/// A node in a decision tree: an inner condition or a terminal action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNode {
    Condition {
        node_id: String,
        condition: Expr,
        on_true: Box<TreeNode>,
        on_false: Box<TreeNode>,
    },
    Action {
        node_id: String,
        action: ActionName,
        #[serde(default)]
        parameters: HashMap<String, ValueSpec>,
    },
}

impl TreeNode {
    pub fn node_id(&self) -> &str {
        match self {
            TreeNode::Condition { node_id, .. } | TreeNode::Action { node_id, .. } => node_id,
        }
    }
}

/// Boolean expression over context values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Expr {
    #[serde(rename = "==")]
    Eq { left: ValueSpec, right: ValueSpec },
    #[serde(rename = "!=")]
    Ne { left: ValueSpec, right: ValueSpec },
    #[serde(rename = "<")]
    Lt { left: ValueSpec, right: ValueSpec },
    #[serde(rename = "<=")]
    Le { left: ValueSpec, right: ValueSpec },
    #[serde(rename = ">")]
    Gt { left: ValueSpec, right: ValueSpec },
    #[serde(rename = ">=")]
    Ge { left: ValueSpec, right: ValueSpec },
    #[serde(rename = "and")]
    And { conditions: Vec<Expr> },
    #[serde(rename = "or")]
    Or { conditions: Vec<Expr> },
    #[serde(rename = "not")]
    Not { condition: Box<Expr> },
}

/// A value: context field, named parameter, literal, or computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec {
    Field { field: String },
    Param { param: String },
    Literal { value: serde_json::Value },
    Compute { compute: Box<Computation> },
}

/// Arithmetic over values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Computation {
    #[serde(rename = "+")]
    Add { left: ValueSpec, right: ValueSpec },
    #[serde(rename = "-")]
    Sub { left: ValueSpec, right: ValueSpec },
    #[serde(rename = "*")]
    Mul { left: ValueSpec, right: ValueSpec },
    /// Plain division; a (near-)zero denominator is a runtime evaluation
    /// error. Use `div0` for the guarded variant.
    #[serde(rename = "/")]
    Div { left: ValueSpec, right: ValueSpec },
    #[serde(rename = "min")]
    Min { values: Vec<ValueSpec> },
    #[serde(rename = "max")]
    Max { values: Vec<ValueSpec> },
    #[serde(rename = "clamp")]
    Clamp {
        value: ValueSpec,
        min: ValueSpec,
        max: ValueSpec,
    },
    /// Guarded division: returns `default` when the denominator is ~zero.
    #[serde(rename = "div0")]
    SafeDiv {
        numerator: ValueSpec,
        denominator: ValueSpec,
        default: ValueSpec,
    },
}

/// Terminal action tags across all tree kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionName {
    // payment_tree
    Release,
    Hold,
    Split,
    Drop,
    Reprioritize,
    // bank_tree
    SetReleaseBudget,
    SetState,
    AddState,
    NoAction,
    // collateral trees
    PostCollateral,
    WithdrawCollateral,
    HoldCollateral,
}

impl ActionName {
    /// Parameters the action requires, checked at load.
    pub fn required_parameters(self) -> &'static [&'static str] {
        match self {
            ActionName::Split => &["parts"],
            ActionName::Reprioritize => &["priority"],
            ActionName::SetReleaseBudget => &["budget"],
            ActionName::SetState => &["key", "value"],
            ActionName::AddState => &["key", "delta"],
            ActionName::PostCollateral | ActionName::WithdrawCollateral => &["amount"],
            _ => &[],
        }
    }
}
