use std::sync::{Arc, Mutex};

use be_core::domain::{LruMap, ThreadId};

use crate::dialog::{DialogBotChatManager, DialogError};

pub type SharedChatManager = Arc<tokio::sync::Mutex<DialogBotChatManager>>;

// ---------------------------------------------------------------------------
// ChatManagerCache — one live orchestrator per thread, LRU-bounded
// ---------------------------------------------------------------------------

/// Keeps the running orchestrator of each active thread. Holders lock the
/// async mutex for the whole observe call, which serializes turns on a
/// thread. Evicted or invalidated orchestrators are rebuilt from storage on
/// next use.
pub struct ChatManagerCache {
    managers: Mutex<LruMap<ThreadId, SharedChatManager>>,
}

impl ChatManagerCache {
    pub fn new(max_threads: usize) -> Self {
        Self {
            managers: Mutex::new(LruMap::new(max_threads)),
        }
    }

    pub fn get_or_try_insert_with<F>(
        &self,
        thread_id: ThreadId,
        build: F,
    ) -> Result<SharedChatManager, DialogError>
    where
        F: FnOnce() -> Result<DialogBotChatManager, DialogError>,
    {
        let mut managers = self.lock_managers();
        if let Some(manager) = managers.get(&thread_id) {
            return Ok(Arc::clone(manager));
        }

        let manager = Arc::new(tokio::sync::Mutex::new(build()?));
        if let Some((evicted, _)) = managers.insert(thread_id, Arc::clone(&manager)) {
            tracing::debug!(thread_id = %evicted, "evicted chat manager");
        }
        Ok(manager)
    }

    /// Drops the cached orchestrator, e.g. once the episode is complete.
    pub fn invalidate(&self, thread_id: ThreadId) -> bool {
        self.lock_managers().remove(&thread_id).is_some()
    }

    pub fn contains(&self, thread_id: ThreadId) -> bool {
        self.lock_managers().contains_key(&thread_id)
    }

    pub fn len(&self) -> usize {
        self.lock_managers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_managers().is_empty()
    }

    fn lock_managers(&self) -> std::sync::MutexGuard<'_, LruMap<ThreadId, SharedChatManager>> {
        self.managers.lock().expect("chat manager cache poisoned")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
