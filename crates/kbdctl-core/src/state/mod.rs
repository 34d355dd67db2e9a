//! State machine module.

pub mod machine;
pub mod plan;

pub use machine::{SessionState, TransactionKind, TransactionMachine, next_state};
pub use plan::{Step, read_plan, write_plan};
