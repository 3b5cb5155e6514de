use crate::core::policy::Policy;
use crate::core::topology::TopologyManager;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Default number of candidates tried before giving up on a client
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: usize = 5;

/// Tune a proxied socket for latency (applied to both client and target)
pub fn optimize_socket(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let socket_ref = socket2::SockRef::from(stream);
    let _ = socket_ref.set_keepalive(true);
}

/// Established connection to a backend
#[derive(Debug)]
pub struct TargetConnection {
    pub addr: String,
    pub stream: TcpStream,
}

/// Open a transport connection to a pool entry.
///
/// Entries are parsed as literal socket addresses; nothing is resolved.
pub async fn connect_target(addr: &str) -> Result<TcpStream, ForwardError> {
    let socket_addr: SocketAddr = addr
        .parse()
        .map_err(|_| ForwardError::InvalidAddress(addr.to_string()))?;

    let stream = TcpStream::connect(socket_addr)
        .await
        .map_err(|e| ForwardError::Connect(addr.to_string(), e.to_string()))?;

    optimize_socket(&stream);
    Ok(stream)
}

/// Connect to a backend chosen by `policy`, failing over to fresh candidates.
///
/// Every candidate that cannot be connected to is retired. An empty pool ends
/// the search immediately.
pub async fn failsafe_connect(
    policy: &dyn Policy,
    topology: &Arc<TopologyManager>,
    max_attempts: usize,
) -> Result<TargetConnection, ForwardError> {
    for attempt in 1..=max_attempts {
        let Some(addr) = policy.get_target().await else {
            warn!("Policy found no suitable server in the backend pool");
            return Err(ForwardError::NoTarget);
        };

        match connect_target(&addr).await {
            Ok(stream) => {
                debug!("Target server connected: {} (attempt {})", addr, attempt);
                return Ok(TargetConnection { addr, stream });
            }
            Err(e) => {
                warn!("Attempt {}/{} failed: {}", attempt, max_attempts, e);
                topology.retire(&addr).await;
            }
        }
    }

    warn!("No backend connectable after {} attempts", max_attempts);
    Err(ForwardError::AttemptsExhausted(max_attempts))
}

/// Which copy loop ended the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToTarget,
    TargetToClient,
}

/// Result of a relay: the first direction to finish decides it
#[derive(Debug)]
pub struct RelayOutcome {
    pub finished: Direction,
    /// Bytes copied by the finishing direction; unknown when the copy failed
    pub bytes: Option<u64>,
    pub error: Option<std::io::Error>,
}

impl RelayOutcome {
    fn from_copy(finished: Direction, result: std::io::Result<u64>) -> Self {
        match result {
            Ok(bytes) => Self {
                finished,
                bytes: Some(bytes),
                error: None,
            },
            Err(e) => Self {
                finished,
                bytes: None,
                error: Some(e),
            },
        }
    }
}

/// Copy bytes both ways until either direction reaches EOF or fails.
///
/// The other direction is dropped mid-flight; the caller closes both sockets.
pub async fn relay(client: &mut TcpStream, target: &mut TcpStream) -> RelayOutcome {
    let (mut client_read, mut client_write) = client.split();
    let (mut target_read, mut target_write) = target.split();

    let outcome = tokio::select! {
        result = tokio::io::copy(&mut client_read, &mut target_write) => {
            RelayOutcome::from_copy(Direction::ClientToTarget, result)
        }
        result = tokio::io::copy(&mut target_read, &mut client_write) => {
            RelayOutcome::from_copy(Direction::TargetToClient, result)
        }
    };

    match (&outcome.error, outcome.bytes) {
        (Some(e), _) => info!("Relay {:?} failed: {}", outcome.finished, e),
        (None, Some(bytes)) => debug!("Relay {:?} finished after {} bytes", outcome.finished, bytes),
        (None, None) => debug!("Relay {:?} finished", outcome.finished),
    }
    outcome
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Invalid backend address: {0}")]
    InvalidAddress(String),
    #[error("Failed to connect to {0}: {1}")]
    Connect(String, String),
    #[error("No backend available in pool")]
    NoTarget,
    #[error("No backend connectable after {0} attempts")]
    AttemptsExhausted(usize),
}
