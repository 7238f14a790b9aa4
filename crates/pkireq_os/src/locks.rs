#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use pkireq_kernel_contracts::RequestId;

/// Per-request mutual exclusion. At most one guard per id exists at a time;
/// guards for different ids never block each other for longer than the table
/// bookkeeping takes. Not re-entrant: locking an id the current thread
/// already holds deadlocks.
///
/// Each held id owns a wait slot; a release wakes only the waiters of that id.
#[derive(Debug, Default)]
pub struct RequestLockTable {
    held: Mutex<HashMap<RequestId, Arc<Condvar>>>,
}

#[derive(Debug)]
pub struct RequestLockGuard<'a> {
    table: &'a RequestLockTable,
    id: RequestId,
}

impl RequestLockGuard<'_> {
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

impl RequestLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, id: &RequestId) -> RequestLockGuard<'_> {
        let mut held = self.held.lock();
        while let Some(slot) = held.get(id).cloned() {
            slot.wait(&mut held);
        }
        held.insert(id.clone(), Arc::new(Condvar::new()));
        RequestLockGuard {
            table: self,
            id: id.clone(),
        }
    }

    pub fn try_lock(&self, id: &RequestId) -> Option<RequestLockGuard<'_>> {
        let mut held = self.held.lock();
        if held.contains_key(id) {
            return None;
        }
        held.insert(id.clone(), Arc::new(Condvar::new()));
        Some(RequestLockGuard {
            table: self,
            id: id.clone(),
        })
    }

    /// Number of ids currently locked. Entries disappear on release.
    pub fn in_flight(&self) -> usize {
        self.held.lock().len()
    }
}

impl Drop for RequestLockGuard<'_> {
    fn drop(&mut self) {
        let slot = self.table.held.lock().remove(&self.id);
        // Every waiter re-checks the table; the first one back installs a
        // fresh slot and the rest park on it.
        if let Some(slot) = slot {
            slot.notify_all();
        }
    }
}
