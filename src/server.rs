use crate::config::Config;
use crate::core::bus::TopologyBus;
use crate::core::connections::ConnectionTracker;
use crate::core::forwarder::{self, ForwardError, RelayOutcome};
use crate::core::policy::{create_policy, Policy, PolicyError};
use crate::core::topology::{TopologyError, TopologyManager, WatchHandle};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Shared state handed to every session task
#[derive(Clone)]
struct SessionContext {
    topology: Arc<TopologyManager>,
    policy: Arc<dyn Policy>,
    connections: ConnectionTracker,
    max_attempts: usize,
}

pub struct GantryServer {
    config: Arc<Config>,
    context: SessionContext,
}

impl GantryServer {
    pub fn new(
        config: Config,
        topology: Arc<TopologyManager>,
        policy: Arc<dyn Policy>,
        connections: ConnectionTracker,
    ) -> Self {
        let max_attempts = config.forwarding.max_connect_attempts;
        Self {
            config: Arc::new(config),
            context: SessionContext {
                topology,
                policy,
                connections,
                max_attempts,
            },
        }
    }

    /// Load the initial pool, start watching membership changes and build
    /// the configured policy. A missing or unreadable snapshot is fatal.
    pub async fn from_config(
        config: Config,
        bus: Arc<dyn TopologyBus>,
    ) -> Result<(Self, WatchHandle), ServerError> {
        let topology = TopologyManager::new(bus, config.topology.quarantine());
        topology.init_pool().await?;
        let watch = topology.watch_topology().await?;

        let connections = ConnectionTracker::new();
        let policy = create_policy(
            &config.policy.policy_type,
            topology.clone(),
            connections.clone(),
        )?;
        info!(
            "Using '{}' target selection policy, quarantine {:?}",
            policy.name(),
            topology.quarantine()
        );

        Ok((Self::new(config, topology, policy, connections), watch))
    }

    pub fn topology(&self) -> &Arc<TopologyManager> {
        &self.context.topology
    }

    /// Sessions currently relaying to a backend
    pub fn active_sessions(&self) -> usize {
        self.context.connections.total()
    }

    /// Bind the configured listener address
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let bind = &self.config.listener.bind;
        info!("Listener binding to: {}", bind);
        TcpListener::bind(bind)
            .await
            .map_err(|e| ServerError::BindFailed(format!("{}: {}", bind, e)))
    }

    /// Bind and serve for the lifetime of the process
    pub async fn listen(&self) -> Result<(), ServerError> {
        self.listen_with_shutdown(std::future::pending()).await
    }

    /// Bind and serve until `shutdown` resolves
    pub async fn listen_with_shutdown(
        &self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Accept connections until `shutdown` resolves, then close the listener
    /// and give in-flight sessions up to the drain timeout to finish.
    pub async fn serve(&self, listener: TcpListener, shutdown: impl Future<Output = ()>) {
        if let Ok(addr) = listener.local_addr() {
            info!("Load balancer listening on {}", addr);
        }

        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((client, peer)) => {
                        debug!("New connection from: {}", peer);
                        forwarder::optimize_socket(&client);
                        let context = self.context.clone();
                        sessions.spawn(run_session(client, peer, context));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    log_join_error(finished);
                }
            }
        }

        drop(listener);
        self.drain(&mut sessions).await;
    }

    async fn drain(&self, sessions: &mut JoinSet<()>) {
        if sessions.is_empty() {
            return;
        }

        let timeout = self.config.forwarding.drain_timeout();
        info!("Draining {} in-flight sessions (up to {:?})", sessions.len(), timeout);

        let drained = tokio::time::timeout(timeout, async {
            while let Some(finished) = sessions.join_next().await {
                log_join_error(finished);
            }
        })
        .await;

        if drained.is_err() {
            warn!("Aborting {} sessions still open after drain timeout", sessions.len());
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        }
    }
}

fn log_join_error(finished: Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        if e.is_panic() {
            error!("Session task panicked: {}", e);
        }
    }
}

/// Session task boundary: the result is reduced to a log line and dropped
async fn run_session(client: TcpStream, peer: SocketAddr, context: SessionContext) {
    match handle_connection(client, &context).await {
        Ok((target, outcome)) => {
            debug!(
                "Session {} -> {} closed ({:?} ended first)",
                peer, target, outcome.finished
            );
        }
        Err(e @ (ForwardError::NoTarget | ForwardError::AttemptsExhausted(_))) => {
            info!("Client {} not served: {}", peer, e);
        }
        Err(e) => {
            warn!("Session for {} failed: {}", peer, e);
        }
    }
}

async fn handle_connection(
    mut client: TcpStream,
    context: &SessionContext,
) -> Result<(String, RelayOutcome), ForwardError> {
    // Returning early drops (and so closes) the client socket
    let mut target = forwarder::failsafe_connect(
        context.policy.as_ref(),
        &context.topology,
        context.max_attempts,
    )
    .await?;

    let _slot = context.connections.acquire(&target.addr);
    let outcome = forwarder::relay(&mut client, &mut target.stream).await;

    let _ = client.shutdown().await;
    let _ = target.stream.shutdown().await;

    Ok((target.addr, outcome))
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Bind failed: {0}")]
    BindFailed(String),
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),
}
