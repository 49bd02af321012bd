//! Client-scoped shared state.
//!
//! Both registries are read concurrently by watch tasks and written by
//! registration and close, so each sits behind its own reader-writer lock.
//! Locks are never held across an `.await`.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Addresses this client registered and has not yet unregistered,
/// mapped to the record id that carries them.
#[derive(Debug, Default)]
pub(crate) struct SelfRegistry {
    entries: RwLock<HashMap<String, String>>,
}

impl SelfRegistry {
    pub(crate) fn insert(
        &self,
        address: &str,
        id: &str,
    ) {
        self.entries.write().insert(address.to_string(), id.to_string());
    }

    /// Removes `address` only while it still maps to `id`; a newer
    /// registration of the same address keeps its entry.
    pub(crate) fn remove_if(
        &self,
        address: &str,
        id: &str,
    ) -> bool {
        let mut entries = self.entries.write();
        if entries.get(address).is_some_and(|current| current == id) {
            entries.remove(address);
            return true;
        }
        false
    }

    pub(crate) fn contains(
        &self,
        address: &str,
    ) -> bool {
        self.entries.read().contains_key(address)
    }

    /// Drops self-registered addresses, preserving order
    pub(crate) fn filter(
        &self,
        addresses: Vec<String>,
    ) -> Vec<String> {
        let entries = self.entries.read();
        addresses.into_iter().filter(|a| !entries.contains_key(a)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub(crate) fn clear(&self) {
        self.entries.write().clear();
    }
}

/// A running keepalive or watch task together with the token that stops it
#[derive(Debug)]
pub(crate) struct BackgroundTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub(crate) fn new(
        token: CancellationToken,
        handle: JoinHandle<()>,
    ) -> Self {
        Self { token, handle }
    }

    /// Signals the task to stop without waiting for it
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancels the task and waits until it has exited
    pub(crate) async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                warn!("background task panicked during shutdown: {:?}", e);
            }
        }
    }
}

/// Every active keepalive loop and watch, keyed by registration id or watch id
#[derive(Debug, Default)]
pub(crate) struct CancellationRegistry {
    tasks: RwLock<HashMap<String, BackgroundTask>>,
}

impl CancellationRegistry {
    pub(crate) fn insert(
        &self,
        id: String,
        task: BackgroundTask,
    ) {
        if let Some(previous) = self.tasks.write().insert(id.clone(), task) {
            // ids are fresh nanoids; a clash means the old task would leak
            warn!(%id, "replacing an existing background task");
            previous.token.cancel();
        }
    }

    pub(crate) fn remove(
        &self,
        id: &str,
    ) -> Option<BackgroundTask> {
        self.tasks.write().remove(id)
    }

    pub(crate) fn contains(
        &self,
        id: &str,
    ) -> bool {
        self.tasks.read().contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub(crate) fn count_where(
        &self,
        predicate: impl Fn(&str) -> bool,
    ) -> usize {
        self.tasks.read().keys().filter(|id| predicate(id)).count()
    }

    /// Empties the registry, handing back every task for shutdown
    pub(crate) fn drain(&self) -> Vec<(String, BackgroundTask)> {
        self.tasks.write().drain().collect()
    }
}
