//! gostore: segmented, log-structured transactional key/value storage
//!
//! A storage engine built from containers of opaque JSON-shaped
//! objects, transactions (blocks/variables/operations), segmented
//! append-only on-disk logs partitioned by a 16-bit token, an
//! optimistic-concurrency view-state manager, and a replay mechanism
//! that rebuilds in-memory state from segments after a restart.
//!
//! # Example
//!
//! ```no_run
//! use gostore::prelude::*;
//!
//! # async fn example() -> gostore::error::Result<()> {
//! let engine = Engine::open(Config::new("./data", (0, 1))).await?;
//! engine.create_container("users").await;
//!
//! let mut txn = Transaction::new(0);
//! let v = txn.declare_variable();
//! txn.master.operations.push(Operation::Set {
//!     dest: TransactionObject::variable(0, v),
//!     value: TransactionObject::literal("alice"),
//!     partial: false,
//! });
//! txn.master.operations.push(Operation::Set {
//!     dest: TransactionObject::db_object("users", "1"),
//!     value: TransactionObject::variable(0, v),
//!     partial: false,
//! });
//! let result = engine.execute(txn).await;
//! assert!(result.error.is_none());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod core;
pub mod db;
pub mod error;
pub mod mutation;
pub mod storage;
pub mod txn;
pub mod viewstate;

/// Prelude module for common imports.
pub mod prelude {
    pub use crate::core::{Clock, Container, ContainerStore, Object, SystemClock, Token, TokenRange, TransactionValue};
    pub use crate::db::{Config, Engine};
    pub use crate::error::{Error, Result};
    pub use crate::txn::{Operation, Transaction, TransactionObject, TransactionReturn};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn engine_opens_on_an_empty_directory() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(Config::new(dir.path(), (0, 16))).await.unwrap();
        assert!(engine.get_container("missing").await.is_none());
    }
}
