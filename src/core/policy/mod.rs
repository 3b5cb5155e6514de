use crate::core::connections::ConnectionTracker;
use crate::core::topology::TopologyManager;
use async_trait::async_trait;
use std::sync::Arc;

pub mod least_connections;
pub mod round_robin;

pub use least_connections::LeastConnectionsPolicy;
pub use round_robin::RoundRobinPolicy;

/// Core trait for target selection policies
#[async_trait]
pub trait Policy: Send + Sync {
    /// Pick a backend from the current pool, or None when the pool is empty
    async fn get_target(&self) -> Option<String>;

    /// Policy name
    fn name(&self) -> &str;
}

/// Policy names accepted by `create_policy`
pub const POLICY_NAMES: &[&str] = &["round_robin", "least_connections"];

/// Policy factory for creating policies from configuration
pub fn create_policy(
    policy_type: &str,
    topology: Arc<TopologyManager>,
    connections: ConnectionTracker,
) -> Result<Arc<dyn Policy>, PolicyError> {
    match policy_type {
        "round_robin" => Ok(Arc::new(RoundRobinPolicy::new(topology))),
        "least_connections" => Ok(Arc::new(LeastConnectionsPolicy::new(topology, connections))),
        _ => Err(PolicyError::UnknownPolicy(policy_type.to_string())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Unknown policy type: {0}")]
    UnknownPolicy(String),
}
