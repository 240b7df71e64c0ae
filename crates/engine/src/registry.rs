use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use mailshift_core::ItemId;
use tracing::{debug, info};

use crate::supervisor::ProcessHandle;

/// Live sync processes keyed by the item they are migrating.
///
/// Shared between the runner that owns a process and any stop request. Only
/// termination-capable handles are stored; nothing here can wait on a child.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<HashMap<ItemId, ProcessHandle>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ItemId, ProcessHandle>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, item_id: ItemId, handle: ProcessHandle) {
        debug!(item_id = %item_id, pid = ?handle.pid(), "process registered");
        self.lock().insert(item_id, handle);
    }

    /// Register and get a guard that unregisters when dropped.
    pub fn register_scoped(&self, item_id: ItemId, handle: ProcessHandle) -> Registration {
        self.register(item_id, handle);
        Registration {
            registry: self.clone(),
            item_id,
        }
    }

    pub fn unregister(&self, item_id: ItemId) {
        if self.lock().remove(&item_id).is_some() {
            debug!(item_id = %item_id, "process unregistered");
        }
    }

    /// Request graceful termination of the item's process.
    ///
    /// Returns false when nothing is registered or the process already exited.
    /// Never waits for the process to go away.
    pub fn terminate(&self, item_id: ItemId) -> bool {
        let handle = self.lock().get(&item_id).cloned();
        match handle {
            Some(handle) => {
                let sent = handle.request_terminate();
                if sent {
                    info!(item_id = %item_id, pid = ?handle.pid(), "termination requested");
                }
                sent
            }
            None => false,
        }
    }

    pub fn contains(&self, item_id: ItemId) -> bool {
        self.lock().contains_key(&item_id)
    }

    /// Request termination of every registered process. Returns how many were signalled.
    pub fn terminate_all(&self) -> usize {
        let handles: Vec<(ItemId, ProcessHandle)> =
            self.lock().iter().map(|(id, h)| (*id, h.clone())).collect();
        let mut sent = 0;
        for (item_id, handle) in handles {
            if handle.request_terminate() {
                info!(item_id = %item_id, "termination requested");
                sent += 1;
            }
        }
        sent
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Keeps an item registered for as long as it lives.
#[must_use = "dropping the registration unregisters the process"]
pub struct Registration {
    registry: ProcessRegistry,
    item_id: ItemId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.item_id);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::ffi::OsString;

    use super::*;
    use crate::supervisor::{ExitOutcome, LogSink, Supervisor};

    #[tokio::test]
    async fn terminate_unknown_item_is_false() {
        let registry = ProcessRegistry::new();
        assert!(!registry.terminate(ItemId(42)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn scoped_registration_terminates_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let log = LogSink::create(tmp.path().join("1.log")).await.unwrap();
        let args: Vec<OsString> = vec!["-c".into(), "exec sleep 30".into()];
        let process = Supervisor::default().launch("sh", &args, log).unwrap();

        let registry = ProcessRegistry::new();
        let guard = registry.register_scoped(ItemId(1), process.handle());
        assert!(registry.contains(ItemId(1)));
        assert_eq!(registry.len(), 1);

        assert!(registry.terminate(ItemId(1)));
        let report = process.wait().await.unwrap();
        assert_eq!(report.outcome, ExitOutcome::Terminated);

        // The owner has stopped waiting: a late stop is a no-op.
        assert!(!registry.terminate(ItemId(1)));
        drop(guard);
        assert!(!registry.contains(ItemId(1)));
    }

    #[tokio::test]
    async fn terminate_all_counts_live_processes() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = ProcessRegistry::new();
        let mut processes = Vec::new();
        for id in 1..=2u64 {
            let log = LogSink::create(tmp.path().join(format!("{id}.log"))).await.unwrap();
            let args: Vec<OsString> = vec!["-c".into(), "exec sleep 30".into()];
            let process = Supervisor::default().launch("sh", &args, log).unwrap();
            registry.register(ItemId(id), process.handle());
            processes.push(process);
        }

        assert_eq!(registry.terminate_all(), 2);
        for process in processes {
            assert_eq!(process.wait().await.unwrap().outcome, ExitOutcome::Terminated);
        }
    }

    #[tokio::test]
    async fn terminate_after_natural_exit_is_a_no_op() {
        let registry = ProcessRegistry::new();
        let tmp = tempfile::tempdir().unwrap();
        let log = LogSink::create(tmp.path().join("1.log")).await.unwrap();
        let args = vec![OsString::from("-c"), OsString::from("exit 0")];
        let process = Supervisor::default().launch("sh", &args, log).unwrap();

        // Still registered while the process is already gone.
        registry.register(ItemId(1), process.handle());
        let report = process.wait().await.unwrap();
        assert_eq!(report.outcome, ExitOutcome::Exited(0));

        assert!(registry.contains(ItemId(1)));
        assert!(!registry.terminate(ItemId(1)));
        assert_eq!(registry.terminate_all(), 0);

        registry.unregister(ItemId(1));
        assert!(!registry.terminate(ItemId(1)));
    }
}