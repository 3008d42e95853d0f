//! Per-volume mutual exclusion with bounded admission per operation class.
//!
//! Two workflows on the same volume name never run their critical sections at
//! the same time. Independently, mount and unmount workflows are admitted
//! through counting semaphores so at most N of each are in flight; callers
//! wait rather than fail when a class is saturated.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

use crate::config::AdmissionConfig;
use crate::types::OpClass;

type LockMap = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Gate shared by all workflows of an orchestrator.
#[derive(Clone)]
pub struct RequestGate {
    locks: LockMap,
    admission: Arc<HashMap<OpClass, Arc<Semaphore>>>,
}

/// Proof of admission and exclusive access to one volume name. Dropping the
/// handle releases both, on every exit path.
pub struct GateHandle {
    guard: Option<OwnedMutexGuard<()>>,
    _permit: Option<OwnedSemaphorePermit>,
    name: String,
    class: OpClass,
    locks: LockMap,
}

impl RequestGate {
    pub fn new(config: &AdmissionConfig) -> Self {
        let mut admission = HashMap::new();
        admission.insert(OpClass::Mount, Arc::new(Semaphore::new(config.mount.max(1))));
        admission.insert(OpClass::Unmount, Arc::new(Semaphore::new(config.unmount.max(1))));
        Self {
            locks: Arc::new(DashMap::new()),
            admission: Arc::new(admission),
        }
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for an admission slot of `class` (if bounded), then for the lock of
    /// `name`.
    pub async fn acquire(&self, name: &str, class: OpClass) -> GateHandle {
        let permit = match self.admission.get(&class) {
            Some(sem) => match sem.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                // never closed while the gate exists
                Err(_) => None,
            },
            None => None,
        };

        let guard = self.lock_for(name).lock_owned().await;
        debug!("gate acquired for {name} ({class})");
        GateHandle {
            guard: Some(guard),
            _permit: permit,
            name: name.to_string(),
            class,
            locks: self.locks.clone(),
        }
    }

    /// Explicit release; equivalent to dropping the handle.
    pub fn release(&self, handle: GateHandle) {
        drop(handle);
    }

    /// Free admission slots for a bounded class, `None` for unbounded ones.
    pub fn available(&self, class: OpClass) -> Option<usize> {
        self.admission.get(&class).map(|s| s.available_permits())
    }

    /// Number of volume names with a live lock entry.
    pub fn tracked_names(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for GateHandle {
    fn drop(&mut self) {
        self.guard.take();
        // Remove the entry unless someone else is holding or waiting on it:
        // one reference lives in the map, ours is gone with the guard.
        self.locks
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) <= 1);
        debug!("gate released for {} ({})", self.name, self.class);
    }
}
