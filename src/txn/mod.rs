//! Transaction IR: operations, blocks, variables, and their execution
//! against a view-state.

pub mod executor;
pub mod operation;
pub mod types;
pub mod wire;

pub use executor::execute;
pub use operation::{Operation, TransactionObject, OP_GET, OP_RETURN, OP_SET};
pub use types::{Transaction, TransactionBlock, TransactionError, TransactionReturn, Variable};
