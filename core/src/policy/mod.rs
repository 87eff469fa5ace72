//! Policy interpreter.
//!
//! Policies are data: JSON decision trees proposed by the outer optimization
//! layer. `ast` holds the document types, `compile` turns a document into a
//! validated arena form, `context` provides the compiled symbol table and
//! per-evaluation value frame, and `eval` walks the arena to a decision.

pub mod ast;
pub mod compile;
pub mod context;
pub mod eval;

pub use ast::{ActionName, PolicyDoc, TreeKind, TreeNode};
pub use compile::{compile_policy, CompiledPolicy, CompiledTree, PolicyError, DEFAULT_MAX_TREE_DEPTH};
pub use context::{EvalFrame, FieldError, SystemView};
pub use eval::{
    decide_bank, decide_collateral, decide_payment, BankDecision, CollateralDecision, EvalError,
    PaymentDecision,
};
