//! Per-document mutual exclusion
//!
//! Writes to different ids never wait on each other. Entries are dropped
//! from the table once the last holder or waiter goes away, so the table
//! only ever holds ids with work in flight.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Debug, Clone, Default)]
pub struct IdLocks {
    slots: Slots,
}

impl IdLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no one else holds `id`, then hold it until the guard drops
    pub async fn acquire(&self, id: &str) -> IdGuard {
        let slot = self.slots.lock().entry(id.to_string()).or_default().clone();
        let guard = slot.lock_owned().await;
        IdGuard {
            id: id.to_string(),
            slots: self.slots.clone(),
            guard: Some(guard),
        }
    }

    /// Number of ids currently held or waited on
    pub fn in_flight(&self) -> usize {
        self.slots.lock().len()
    }
}

#[derive(Debug)]
pub struct IdGuard {
    id: String,
    slots: Slots,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdGuard {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        // the owned guard keeps its own reference to the slot
        drop(self.guard.take());
        if let Some(slot) = slots.get(&self.id) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.id);
            }
        }
    }
}
