// SPDX-License-Identifier: MIT OR Apache-2.0
//! Keyed task CRUD store for SNAP, per `spec.md` §4.6.
//!
//! Keying is by an application-chosen string independent of `Task.id` —
//! callers are free to key by `context_id`, a transport connection id, or
//! anything else. Context lifecycle/eviction policy is explicitly
//! implementation-defined (`spec.md` §9, Open Questions); the reference
//! store never evicts on its own.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use snap_core::Task;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Contract for a keyed task store.
///
/// The reference implementation stores `Task` by reference (clone on
/// read/write) without defensive copying beyond what `Clone` already does —
/// callers that mutate a `Task` they got from `get` must `set` it back to
/// persist the change.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetch the task stored at `key`, if any.
    async fn get(&self, key: &str) -> Option<Task>;
    /// Store `task` at `key`, overwriting any prior value.
    async fn set(&self, key: &str, task: Task);
    /// Remove the task stored at `key`, if any.
    async fn delete(&self, key: &str);
}

/// Reference in-memory [`TaskStore`].
#[derive(Default)]
pub struct InMemoryTaskStore {
    inner: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of tasks currently stored.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the store holds no tasks.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, key: &str) -> Option<Task> {
        self.inner.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, task: Task) {
        self.inner.write().await.insert(key.to_string(), task);
    }

    async fn delete(&self, key: &str) {
        self.inner.write().await.remove(key);
    }
}
