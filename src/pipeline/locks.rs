use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per document id, so the skip check, stuck repair and
/// writes for an id never interleave with another worker on the same id.
#[derive(Default)]
pub struct DocLocks {
    map: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

pub struct DocGuard<'a> {
    registry: &'a DocLocks,
    id: String,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl DocLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: &str) -> DocGuard<'_> {
        let lock = {
            let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(id.to_string()).or_default())
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        DocGuard {
            registry: self,
            id: id.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    /// Number of ids currently tracked.
    pub fn len(&self) -> usize {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for DocGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self
            .registry
            .map
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // map + this guard: nobody else is waiting on the id
        if Arc::strong_count(&self.lock) <= 2 {
            map.remove(&self.id);
        }
    }
}
