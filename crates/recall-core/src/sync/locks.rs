//! Per-scope serialization of synchronization passes.
//!
//! Two passes over the same scope must not interleave, passes over different
//! scopes never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct ContainerLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContainerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `scope_id`, created on first use.
    ///
    /// Entries nobody holds a handle to are dropped here, so the map only
    /// grows with the number of scopes in use at once.
    ///
    /// Hold the returned handle's guard for the whole pass:
    ///
    /// ```ignore
    /// let handle = locks.handle(scope_id);
    /// let _guard = ContainerLocks::lock(&handle);
    /// ```
    pub fn handle(&self, scope_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(scope_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Block until `handle` is free. A poisoned lock is still usable since it
    /// guards no data.
    pub fn lock(handle: &Mutex<()>) -> MutexGuard<'_, ()> {
        handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_scope_shares_a_lock() {
        let locks = ContainerLocks::new();
        let a = locks.handle("lang");
        let b = locks.handle("lang");
        let c = locks.handle("math");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn released_locks_are_dropped() {
        let locks = ContainerLocks::new();
        for i in 0..100 {
            let handle = locks.handle(&format!("scope-{i}"));
            let _guard = ContainerLocks::lock(&handle);
        }
        let held = locks.handle("lang");
        assert_eq!(locks.len(), 1);
        // A held lock survives pruning and is shared with later callers.
        let again = locks.handle("lang");
        assert!(Arc::ptr_eq(&held, &again));
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn passes_on_one_scope_do_not_overlap() {
        let locks = Arc::new(ContainerLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let active = Arc::clone(&active);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    let handle = locks.handle("lang");
                    let _guard = ContainerLocks::lock(&handle);
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
