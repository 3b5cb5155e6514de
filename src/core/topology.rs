use crate::core::bus::{BusError, Channel, TopologyBus};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pool membership guarded by the topology lock.
///
/// An address is either in `pool` or in `retired`, never both.
#[derive(Debug, Default)]
struct TopologyState {
    pool: Vec<String>,
    // address -> epoch of the retirement that put it there
    retired: HashMap<String, u64>,
}

/// Single authority for backend pool membership.
///
/// Membership changes come from the bus (add/remove notifications) and from
/// the forwarder (`retire` on connect failure). Retired backends come back
/// after the quarantine period unless something evicted them in the meantime.
pub struct TopologyManager {
    state: RwLock<TopologyState>,
    bus: Arc<dyn TopologyBus>,
    quarantine: Duration,
    epoch: AtomicU64,
    // Keeps snapshot write-backs in the same order as the mutations
    persist_lock: Mutex<()>,
}

impl TopologyManager {
    pub fn new(bus: Arc<dyn TopologyBus>, quarantine: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(TopologyState::default()),
            bus,
            quarantine,
            epoch: AtomicU64::new(0),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn quarantine(&self) -> Duration {
        self.quarantine
    }

    /// Load the initial pool from the snapshot store
    pub async fn init_pool(&self) -> Result<(), TopologyError> {
        let loaded = self.bus.load_snapshot().await?;
        let mut pool: Vec<String> = Vec::with_capacity(loaded.len());
        for addr in loaded {
            if pool.contains(&addr) {
                warn!("Duplicate server {} in pool snapshot, keeping first entry", addr);
                continue;
            }
            pool.push(addr);
        }
        info!("Initial server pool loaded with {} backends", pool.len());

        let mut state = self.state.write().await;
        state.pool = pool;
        state.retired.clear();
        Ok(())
    }

    /// Subscribe to add/remove notifications and apply them for as long as
    /// the feed stays open.
    pub async fn watch_topology(self: &Arc<Self>) -> Result<WatchHandle, TopologyError> {
        let mut adds = self.bus.subscribe(Channel::AddServer).await?;
        let mut removes = self.bus.subscribe(Channel::RemoveServer).await?;

        let topology = Arc::clone(self);
        let add_task = tokio::spawn(async move {
            while let Some(addr) = adds.next().await {
                topology.add_server(&addr).await;
            }
            warn!("Notification feed '{}' closed", Channel::AddServer);
        });

        let topology = Arc::clone(self);
        let remove_task = tokio::spawn(async move {
            while let Some(addr) = removes.next().await {
                topology.remove_server(&addr).await;
            }
            warn!("Notification feed '{}' closed", Channel::RemoveServer);
        });

        info!(
            "Watching topology on '{}' and '{}'",
            Channel::AddServer,
            Channel::RemoveServer
        );
        Ok(WatchHandle {
            add_task,
            remove_task,
        })
    }

    /// Copy of the backends currently eligible for selection
    pub async fn get_pool(&self) -> Vec<String> {
        self.state.read().await.pool.clone()
    }

    /// Backends currently in quarantine, sorted
    pub async fn retired(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut retired: Vec<String> = state.retired.keys().cloned().collect();
        retired.sort();
        retired
    }

    /// Apply an "addServer" notification
    pub async fn add_server(&self, addr: &str) {
        let mut state = self.state.write().await;
        if state.pool.iter().any(|a| a == addr) {
            debug!("Server {} already in pool, ignoring add", addr);
            return;
        }
        if state.retired.contains_key(addr) {
            debug!("Server {} is quarantined, ignoring add", addr);
            return;
        }

        state.pool.push(addr.to_string());
        info!("Topology changed, server added {}", addr);
        self.persist(state).await;
    }

    /// Apply a "removeServer" notification. Unknown addresses are ignored.
    pub async fn remove_server(&self, addr: &str) {
        let mut state = self.state.write().await;
        if let Some(index) = state.pool.iter().position(|a| a == addr) {
            state.pool.remove(index);
            info!("Topology changed, server {} removed from pool", addr);
            self.persist(state).await;
            return;
        }

        if state.retired.remove(addr).is_some() {
            info!("Topology changed, server {} removed from retirement zone", addr);
            return;
        }

        debug!("Server {} not known, ignoring remove", addr);
    }

    /// Quarantine a backend after a failed connect.
    ///
    /// No-op if the address is not in the pool (already retired by a
    /// concurrent failure, or removed externally).
    pub async fn retire(self: &Arc<Self>, addr: &str) {
        let mut state = self.state.write().await;
        let Some(index) = state.pool.iter().position(|a| a == addr) else {
            debug!("Server {} not in pool, nothing to retire", addr);
            return;
        };

        state.pool.remove(index);
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed);
        state.retired.insert(addr.to_string(), epoch);
        warn!(
            "Retiring server {} from active pool for {:?}",
            addr, self.quarantine
        );

        self.schedule_recommission(addr.to_string(), epoch);
        self.persist(state).await;
    }

    fn schedule_recommission(self: &Arc<Self>, addr: String, epoch: u64) {
        let topology: Weak<Self> = Arc::downgrade(self);
        let delay = self.quarantine;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(topology) = topology.upgrade() {
                topology.recommission(&addr, epoch).await;
            }
        });
    }

    async fn recommission(&self, addr: &str, epoch: u64) {
        let mut state = self.state.write().await;
        // The entry may have been evicted by a remove, or replaced by a later retirement
        if state.retired.get(addr) != Some(&epoch) {
            debug!("Recommission of {} skipped, no longer retired", addr);
            return;
        }

        state.retired.remove(addr);
        state.pool.push(addr.to_string());
        info!("Server {} recommissioned into active pool", addr);
        self.persist(state).await;
    }

    /// Write the pool snapshot back to the bus. Failures are logged only.
    async fn persist(&self, state: RwLockWriteGuard<'_, TopologyState>) {
        let snapshot = state.pool.clone();
        let _ordered = self.persist_lock.lock().await;
        drop(state);

        if let Err(e) = self.bus.store_snapshot(&snapshot).await {
            warn!("Failed to write back pool snapshot: {}", e);
        }
    }
}

/// Running notification handlers started by `watch_topology`
pub struct WatchHandle {
    add_task: JoinHandle<()>,
    remove_task: JoinHandle<()>,
}

impl WatchHandle {
    /// Stop applying notifications
    pub fn abort(&self) {
        self.add_task.abort();
        self.remove_task.abort();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("Topology bus error: {0}")]
    Bus(#[from] BusError),
}
