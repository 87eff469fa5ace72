//! Domain types: transactions, agents, the world state, and events.

pub mod agent;
pub mod event;
pub mod transaction;
pub mod world;

pub use agent::{Agent, AgentError};
pub use event::{Event, EventKind, EventLog, EventRecord};
pub use transaction::{Transaction, TransactionError, TxStatus};
pub use world::{Queue2Entry, World};
