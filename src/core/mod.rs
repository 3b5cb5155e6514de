pub mod bus;
pub mod connections;
pub mod forwarder;
pub mod policy;
pub mod topology;

// Re-export core types
pub use bus::{Channel, MemoryBus, TopologyBus};
pub use connections::{ConnectionGuard, ConnectionTracker};
pub use forwarder::{failsafe_connect, relay, Direction, ForwardError, RelayOutcome};
pub use policy::{create_policy, LeastConnectionsPolicy, Policy, RoundRobinPolicy};
pub use topology::{TopologyError, TopologyManager, WatchHandle};
