use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Live count of proxied sessions per backend
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count a new session against `addr`; the slot is released when the
    /// returned guard is dropped.
    pub fn acquire(&self, addr: &str) -> ConnectionGuard {
        *self.lock().entry(addr.to_string()).or_insert(0) += 1;
        ConnectionGuard {
            tracker: self.clone(),
            addr: addr.to_string(),
        }
    }

    /// Sessions currently open to `addr`
    pub fn active(&self, addr: &str) -> usize {
        self.lock().get(addr).copied().unwrap_or(0)
    }

    /// Counts for each address, in the given order, read under one lock
    pub fn active_for(&self, addrs: &[String]) -> Vec<usize> {
        let counts = self.lock();
        addrs
            .iter()
            .map(|addr| counts.get(addr).copied().unwrap_or(0))
            .collect()
    }

    /// Sessions open across all backends
    pub fn total(&self) -> usize {
        self.lock().values().sum()
    }

    fn release(&self, addr: &str) {
        let mut counts = self.lock();
        if let Some(count) = counts.get_mut(addr) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(addr);
            }
        }
    }
}

/// Holds one session slot for a backend
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
    addr: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.release(&self.addr);
    }
}
