//! Node-local registry of session queues
//!
//! Each node that scans files owns one registry. Registries are never
//! synchronized across nodes; a session key only means something on the
//! node that holds the matching queue.

use crate::queue::FileEntryQueue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifies the queue of one transfer operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(Uuid);

impl SessionKey {
    /// Generate a fresh random key
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Map of session key to queue
#[derive(Default)]
pub struct QueueRegistry {
    queues: Mutex<HashMap<SessionKey, Arc<FileEntryQueue>>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the queue for `key`, creating it on first reference
    pub fn get_or_create(&self, key: SessionKey) -> Arc<FileEntryQueue> {
        let mut queues = self.queues.lock();
        Arc::clone(queues.entry(key).or_default())
    }

    /// Look up the queue for `key` without creating it
    pub fn get(&self, key: SessionKey) -> Option<Arc<FileEntryQueue>> {
        self.queues.lock().get(&key).cloned()
    }

    /// Remove the queue for `key`, returning it if it was registered
    pub fn remove(&self, key: SessionKey) -> Option<Arc<FileEntryQueue>> {
        self.queues.lock().remove(&key)
    }

    pub fn contains(&self, key: SessionKey) -> bool {
        self.queues.lock().contains_key(&key)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.queues.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.lock().is_empty()
    }
}
