//! Containers are the top-level namespace objects live in: every key
//! is addressed as `(container, key)`. Grounded on gostore's
//! `container.go` (`container{objects map[string]object}`), widened
//! from a single in-process map into an async, lockable store so the
//! view-state manager and engine can share it across tasks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::object::Object;

/// A named bucket of objects. Each container owns its own mutex so
/// unrelated containers never contend with each other.
#[derive(Debug)]
pub struct Container {
    name: String,
    objects: Mutex<HashMap<String, Object>>,
}

impl Container {
    fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), objects: Mutex::new(HashMap::new()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get_object(&self, key: &str) -> Option<Object> {
        self.objects.lock().await.get(key).cloned()
    }

    pub async fn set_object(&self, key: String, object: Object) {
        self.objects.lock().await.insert(key, object);
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Registry of all containers known to the engine. Containers are
/// created lazily on first write and otherwise looked up by name.
#[derive(Debug, Default)]
pub struct ContainerStore {
    containers: RwLock<HashMap<String, Arc<Container>>>,
}

impl ContainerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the named container, creating it if this is the first
    /// reference to it.
    pub async fn create_container(&self, name: &str) -> Arc<Container> {
        if let Some(c) = self.containers.read().await.get(name) {
            return c.clone();
        }
        let mut containers = self.containers.write().await;
        containers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Container::new(name)))
            .clone()
    }

    pub async fn get_container(&self, name: &str) -> Option<Arc<Container>> {
        self.containers.read().await.get(name).cloned()
    }

    pub async fn container_names(&self) -> Vec<String> {
        self.containers.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::object::{OBJ_FLAG_EXISTS, Object};

    #[tokio::test]
    async fn create_container_is_idempotent() {
        let store = ContainerStore::new();
        let a = store.create_container("users").await;
        let b = store.create_container("users").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn unknown_container_lookup_returns_none() {
        let store = ContainerStore::new();
        assert!(store.get_container("missing").await.is_none());
    }

    #[tokio::test]
    async fn object_round_trips_through_container() {
        let store = ContainerStore::new();
        let c = store.create_container("users").await;
        let obj = Object { flags: OBJ_FLAG_EXISTS, segment_id: 1, relative_position: 10, data: None };
        c.set_object("alice".into(), obj).await;
        let fetched = c.get_object("alice").await.unwrap();
        assert_eq!(fetched.segment_id, 1);
        assert!(fetched.exists());
        assert!(c.get_object("bob").await.is_none());
    }
}
