//! Per-transaction view-states, object locking, and the prepare/commit/
//! rollback sequencing that gives writers optimistic concurrency with
//! object-level locking.

pub mod lock;
pub mod manager;
pub mod state;

pub use lock::{LockTable, ObjectLock};
pub use manager::ViewStateManager;
pub use state::{ViewObject, ViewState};
