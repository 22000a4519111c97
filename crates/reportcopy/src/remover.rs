use crate::registry::{QueueRegistry, SessionKey};
use tracing::debug;

/// Final cleanup of a session on the node that owns its queue
///
/// This is the only place a queue leaves the registry. Running it twice is
/// a no-op the second time.
pub struct QueueShutdownAndRemover {
    key: SessionKey,
}

impl QueueShutdownAndRemover {
    pub fn new(key: SessionKey) -> Self {
        Self { key }
    }

    /// Returns whether a queue was registered for the key
    pub fn invoke(&self, registry: &QueueRegistry) -> bool {
        match registry.remove(self.key) {
            Some(queue) => {
                // Wake every worker still blocked on the queue
                queue.shutdown_now();
                debug!(key = %self.key, "Queue removed");
                true
            }
            None => false,
        }
    }
}
