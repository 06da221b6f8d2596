//! A view-state: the per-transaction staging area a [`crate::txn::executor::execute`]
//! call reads and writes through.

use std::collections::HashMap;

use crate::core::object::{object_key, Object};
use crate::core::token::Token;

/// A view-local snapshot of one `(container, key)` object, plus enough
/// context to publish or discard it.
#[derive(Clone, Debug)]
pub struct ViewObject {
    pub container: String,
    pub key: String,
    pub object: Object,
}

/// Per-transaction staging area. Reads are served from `objects` (lazily
/// populated from the container index / segment chain); writes land
/// here first and are only published to the container index on commit.
#[derive(Debug)]
pub struct ViewState {
    pub token: Token,
    pub id: u32,
    pub read_only: bool,
    /// Absolute segment position at which this view opened. A commit by
    /// another view after this point, touching an object this view also
    /// touches, is an optimistic-concurrency conflict.
    pub vs_position: u64,
    pub objects: HashMap<String, ViewObject>,
}

impl ViewState {
    pub fn new(token: Token, id: u32, read_only: bool, vs_position: u64) -> Self {
        Self { token, id, read_only, vs_position, objects: HashMap::new() }
    }

    pub fn get_cached(&self, container: &str, key: &str) -> Option<&ViewObject> {
        self.objects.get(&object_key(container, key))
    }

    pub fn put(&mut self, container: &str, key: &str, object: Object) {
        self.objects.insert(
            object_key(container, key),
            ViewObject { container: container.to_string(), key: key.to_string(), object },
        );
    }

    /// `(container, key)` pairs touched by this view, in the order
    /// they're returned by the underlying map. Callers that need a
    /// canonical lock order sort this themselves -- see
    /// [`crate::viewstate::manager`].
    pub fn touched_keys(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }
}
