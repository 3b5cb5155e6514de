use super::Policy;
use crate::core::topology::TopologyManager;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Round robin policy - cycles through the live pool in order.
///
/// The cursor is reduced modulo the pool size on every call, so after the
/// pool shrinks a backend may be picked again out of strict rotation.
pub struct RoundRobinPolicy {
    pub name: String,
    topology: Arc<TopologyManager>,
    counter: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new(topology: Arc<TopologyManager>) -> Self {
        Self {
            name: "round_robin".to_string(),
            topology,
            counter: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Policy for RoundRobinPolicy {
    async fn get_target(&self) -> Option<String> {
        let pool = self.topology.get_pool().await;
        if pool.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % pool.len();
        pool.get(index).cloned()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
