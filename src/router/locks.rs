//! Per-chat locks serializing event processing.
//!
//! One async mutex per chat id, created on first use. Holding the guard
//! across the whole pipeline (permission check through handler execution)
//! gives the per-chat ordering guarantee and prevents torn state updates.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Map from chat id to its processing lock.
#[derive(Default)]
pub struct ChatLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    /// Empty lock map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a chat, creating it on first use.
    pub async fn acquire(&self, chat_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(
                locks
                    .entry(chat_id.to_owned())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Drop lock entries nobody is holding or waiting on.
    pub async fn reap_idle(&self) {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of chats with a live lock entry.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Whether no lock entries exist.
    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }
}
