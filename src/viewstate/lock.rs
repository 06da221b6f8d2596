//! The object lock table, owned exclusively by the lock-manager actor
//! in [`crate::viewstate::manager`]. No other code mutates it directly;
//! everything goes through the `Lock`/`Unlock` messages below.

use std::collections::HashMap;

use crate::core::token::Token;

pub type ViewKey = (Token, u32);

/// One held lock on a `container^key`.
#[derive(Clone, Debug)]
pub struct ObjectLock {
    pub readonly: bool,
    pub owner_vs: ViewKey,
}

/// Request sent to the lock-manager actor.
pub enum LockMsg {
    /// Acquire a lock on every key, readonly or not as given. All keys
    /// are locked atomically: if any one conflicts, none are taken and
    /// the whole batch reports a conflict.
    Lock {
        owner: ViewKey,
        keys: Vec<(String, bool)>,
        respond: tokio::sync::oneshot::Sender<LockOutcome>,
    },
    /// Release every lock `owner` holds on these keys. Releasing a lock
    /// never held is a no-op (covers rollback before prepare ran).
    Unlock { owner: ViewKey, keys: Vec<String> },
}

#[derive(Debug)]
pub enum LockOutcome {
    Acquired,
    Conflict { key: String },
}

/// In-memory table: at most one writer, or any number of readers, per
/// key. Reader/reader and reader/writer queuing beyond this two-state
/// contract is intentionally not modeled; a writer request against
/// existing readers is treated the same as writer-vs-writer: a
/// conflict.
#[derive(Default)]
pub struct LockTable {
    locks: HashMap<String, Vec<ObjectLock>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_lock_one(&mut self, key: &str, owner: ViewKey, readonly: bool) -> bool {
        match self.locks.get_mut(key) {
            None => {
                self.locks.insert(key.to_string(), vec![ObjectLock { readonly, owner_vs: owner }]);
                true
            }
            Some(holders) => {
                let has_writer = holders.iter().any(|h| !h.readonly);
                if has_writer || !readonly {
                    false
                } else {
                    holders.push(ObjectLock { readonly, owner_vs: owner });
                    true
                }
            }
        }
    }

    fn unlock_one(&mut self, key: &str, owner: ViewKey) {
        if let Some(holders) = self.locks.get_mut(key) {
            holders.retain(|h| h.owner_vs != owner);
            if holders.is_empty() {
                self.locks.remove(key);
            }
        }
    }

    /// Try to lock every key; on first conflict, release everything
    /// this call already acquired and report the offending key.
    pub fn lock_all(&mut self, owner: ViewKey, keys: &[(String, bool)]) -> LockOutcome {
        let mut acquired = Vec::with_capacity(keys.len());
        for (key, readonly) in keys {
            if self.try_lock_one(key, owner, *readonly) {
                acquired.push(key.clone());
            } else {
                for k in &acquired {
                    self.unlock_one(k, owner);
                }
                return LockOutcome::Conflict { key: key.clone() };
            }
        }
        LockOutcome::Acquired
    }

    pub fn unlock_all(&mut self, owner: ViewKey, keys: &[String]) {
        for key in keys {
            self.unlock_one(key, owner);
        }
    }
}

impl PartialEq for ObjectLock {
    fn eq(&self, other: &Self) -> bool {
        self.readonly == other.readonly && self.owner_vs == other.owner_vs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_can_share_a_key() {
        let mut t = LockTable::new();
        assert!(matches!(t.lock_all((0, 1), &[("k".into(), true)]), LockOutcome::Acquired));
        assert!(matches!(t.lock_all((0, 2), &[("k".into(), true)]), LockOutcome::Acquired));
    }

    #[test]
    fn writer_excludes_everyone_else() {
        let mut t = LockTable::new();
        assert!(matches!(t.lock_all((0, 1), &[("k".into(), false)]), LockOutcome::Acquired));
        assert!(matches!(t.lock_all((0, 2), &[("k".into(), true)]), LockOutcome::Conflict { .. }));
        assert!(matches!(t.lock_all((0, 3), &[("k".into(), false)]), LockOutcome::Conflict { .. }));
    }

    #[test]
    fn partial_batch_failure_releases_what_it_took() {
        let mut t = LockTable::new();
        assert!(matches!(t.lock_all((0, 1), &[("a".into(), false)]), LockOutcome::Acquired));
        assert!(matches!(
            t.lock_all((0, 2), &[("b".into(), false), ("a".into(), false)]),
            LockOutcome::Conflict { .. }
        ));
        // "b" must have been released after the conflict on "a".
        assert!(matches!(t.lock_all((0, 3), &[("b".into(), false)]), LockOutcome::Acquired));
    }

    #[test]
    fn unlock_on_unheld_key_is_a_no_op() {
        let mut t = LockTable::new();
        t.unlock_all((0, 1), &["missing".into()]);
    }
}
