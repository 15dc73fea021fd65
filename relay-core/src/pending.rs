//! Pending callback table: suspended dispatches keyed by correlation id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::id::CorrelationId;

/// Zero-argument thunk that performs (or releases) the original transport call.
pub type Continuation = Box<dyn FnOnce() + Send + 'static>;

/// Shared table of continuations. Each entry runs at most once.
#[derive(Clone, Default)]
pub struct PendingTable {
    entries: Arc<Mutex<HashMap<CorrelationId, Continuation>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `continuation` under `id`. An id is never reused while its entry
    /// exists; a second registration replaces the first.
    pub fn register(&self, id: CorrelationId, continuation: Continuation) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.insert(id.clone(), continuation).is_some() {
                tracing::warn!(request_id = %id, "replaced pending continuation");
            }
        }
    }

    /// Remove the entry for `id` and run it. Returns false when nothing was
    /// pending (duplicate or late acknowledgment).
    pub fn resolve_and_run(&self, id: &str) -> bool {
        // Lock is released before the continuation runs; it may re-enter.
        let continuation = match self.entries.lock() {
            Ok(mut entries) => entries.remove(id),
            Err(_) => None,
        };
        match continuation {
            Some(run) => {
                run();
                true
            }
            None => false,
        }
    }

    /// Drop the entry without running it.
    pub fn cancel(&self, id: &str) -> bool {
        self.entries
            .lock()
            .map(|mut e| e.remove(id).is_some())
            .unwrap_or(false)
    }

    /// Drop every entry without running it.
    pub fn clear(&self) -> usize {
        self.entries
            .lock()
            .map(|mut e| e.drain().count())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .lock()
            .map(|e| e.contains_key(id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn id(s: &str) -> CorrelationId {
        CorrelationId::parse(s).unwrap()
    }

    fn counter() -> (Arc<AtomicUsize>, Continuation) {
        let n = Arc::new(AtomicUsize::new(0));
        let c = n.clone();
        (
            n,
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn resolve_twice_runs_once() {
        let table = PendingTable::new();
        let (runs, cont) = counter();
        table.register(id("1"), cont);
        assert!(table.resolve_and_run("1"));
        assert!(!table.resolve_and_run("1"));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_id_is_noop() {
        let table = PendingTable::new();
        assert!(!table.resolve_and_run("404"));
    }

    #[test]
    fn interleaved_requests_independent() {
        let table = PendingTable::new();
        let (a_runs, a) = counter();
        let (b_runs, b) = counter();
        table.register(id("1"), a);
        table.register(id("2"), b);
        assert!(table.resolve_and_run("2"));
        assert_eq!(a_runs.load(Ordering::SeqCst), 0);
        assert_eq!(b_runs.load(Ordering::SeqCst), 1);
        assert!(table.contains("1"));
        assert!(table.resolve_and_run("1"));
        assert_eq!(a_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn continuation_may_reenter_table() {
        let table = PendingTable::new();
        let inner = table.clone();
        let (runs, cont) = counter();
        table.register(id("2"), cont);
        table.register(
            id("1"),
            Box::new(move || {
                inner.resolve_and_run("2");
            }),
        );
        assert!(table.resolve_and_run("1"));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_drops_without_running() {
        let table = PendingTable::new();
        let (runs, cont) = counter();
        table.register(id("1"), cont);
        assert_eq!(table.clear(), 1);
        assert!(!table.resolve_and_run("1"));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_removes_entry() {
        let table = PendingTable::new();
        let (_, cont) = counter();
        table.register(id("9"), cont);
        assert!(table.cancel("9"));
        assert!(!table.cancel("9"));
    }
}
