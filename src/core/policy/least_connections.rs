use super::Policy;
use crate::core::connections::ConnectionTracker;
use crate::core::topology::TopologyManager;
use async_trait::async_trait;
use std::sync::Arc;

/// Least connections policy - selects the backend with the fewest open
/// proxied sessions. Ties go to the earliest backend in pool order.
pub struct LeastConnectionsPolicy {
    pub name: String,
    topology: Arc<TopologyManager>,
    connections: ConnectionTracker,
}

impl LeastConnectionsPolicy {
    pub fn new(topology: Arc<TopologyManager>, connections: ConnectionTracker) -> Self {
        Self {
            name: "least_connections".to_string(),
            topology,
            connections,
        }
    }
}

#[async_trait]
impl Policy for LeastConnectionsPolicy {
    async fn get_target(&self) -> Option<String> {
        let pool = self.topology.get_pool().await;
        let counts = self.connections.active_for(&pool);

        // min_by_key keeps the first of equal elements
        counts
            .iter()
            .enumerate()
            .min_by_key(|(_, count)| **count)
            .and_then(|(index, _)| pool.get(index).cloned())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
