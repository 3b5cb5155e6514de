use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Key under which the pool snapshot is stored
pub const SNAPSHOT_KEY: &str = "serverPool";

const CHANNEL_CAPACITY: usize = 1024;

/// Membership notification channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    AddServer,
    RemoveServer,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::AddServer => "addServer",
            Channel::RemoveServer => "removeServer",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External membership feed and pool snapshot store.
///
/// The load balancer never publishes membership events itself; it only
/// reads the snapshot once, listens for add/remove notifications and writes
/// the snapshot back after every pool mutation.
#[async_trait]
pub trait TopologyBus: Send + Sync {
    /// Read and decode the current pool snapshot
    async fn load_snapshot(&self) -> Result<Vec<String>, BusError>;

    /// Overwrite the stored pool snapshot
    async fn store_snapshot(&self, pool: &[String]) -> Result<(), BusError>;

    /// Subscribe to a notification channel; each item is one backend address
    async fn subscribe(&self, channel: Channel) -> Result<BoxStream<'static, String>, BusError>;
}

/// Decode a snapshot value (JSON array of address strings)
pub fn decode_snapshot(raw: &str) -> Result<Vec<String>, BusError> {
    serde_json::from_str(raw).map_err(|e| BusError::SnapshotParse(e.to_string()))
}

/// Encode a pool as a snapshot value
pub fn encode_snapshot(pool: &[String]) -> Result<String, BusError> {
    serde_json::to_string(pool).map_err(|e| BusError::SnapshotEncode(e.to_string()))
}

/// In-process bus with broadcast fan-out and an optional snapshot file
pub struct MemoryBus {
    snapshot: Mutex<Option<String>>,
    snapshot_file: Option<PathBuf>,
    add_tx: broadcast::Sender<String>,
    remove_tx: broadcast::Sender<String>,
}

impl MemoryBus {
    /// Bus with no stored snapshot
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Bus whose channels buffer at most `capacity` undelivered events per subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        let (add_tx, _) = broadcast::channel(capacity);
        let (remove_tx, _) = broadcast::channel(capacity);
        Self {
            snapshot: Mutex::new(None),
            snapshot_file: None,
            add_tx,
            remove_tx,
        }
    }

    /// Bus seeded with a pool snapshot
    pub fn with_pool(pool: &[String]) -> Result<Self, BusError> {
        let bus = Self::new();
        bus.set_raw_snapshot(Some(encode_snapshot(pool)?));
        Ok(bus)
    }

    /// Persist the snapshot to `path` instead of memory
    pub fn with_snapshot_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_file = Some(path.into());
        self
    }

    /// Replace the raw stored value (None removes the key)
    pub fn set_raw_snapshot(&self, raw: Option<String>) {
        *self.lock_snapshot() = raw;
    }

    /// Raw stored value, if any
    pub fn raw_snapshot(&self) -> Option<String> {
        self.lock_snapshot().clone()
    }

    fn lock_snapshot(&self) -> MutexGuard<'_, Option<String>> {
        self.snapshot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish an address on a channel, returning the number of receivers
    pub fn publish(&self, channel: Channel, addr: impl Into<String>) -> usize {
        let addr = addr.into();
        debug!("Publishing {} on {}", addr, channel);
        self.sender(channel).send(addr).unwrap_or(0)
    }

    fn sender(&self, channel: Channel) -> &broadcast::Sender<String> {
        match channel {
            Channel::AddServer => &self.add_tx,
            Channel::RemoveServer => &self.remove_tx,
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TopologyBus for MemoryBus {
    async fn load_snapshot(&self) -> Result<Vec<String>, BusError> {
        let raw = match &self.snapshot_file {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(content) => Some(content),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.raw_snapshot(),
                Err(e) => return Err(BusError::Io(e.to_string())),
            },
            None => self.raw_snapshot(),
        };

        let raw = raw.ok_or_else(|| BusError::SnapshotMissing(SNAPSHOT_KEY.to_string()))?;
        decode_snapshot(&raw)
    }

    async fn store_snapshot(&self, pool: &[String]) -> Result<(), BusError> {
        let raw = encode_snapshot(pool)?;
        if let Some(path) = &self.snapshot_file {
            tokio::fs::write(path, raw.as_bytes())
                .await
                .map_err(|e| BusError::Io(e.to_string()))?;
        }
        self.set_raw_snapshot(Some(raw));
        Ok(())
    }

    async fn subscribe(&self, channel: Channel) -> Result<BoxStream<'static, String>, BusError> {
        let rx = self.sender(channel).subscribe();
        let stream = stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(addr) => return Some((addr, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Subscriber on {} lagged, {} events skipped", channel, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Snapshot key '{0}' not found")]
    SnapshotMissing(String),
    #[error("Failed to parse snapshot: {0}")]
    SnapshotParse(String),
    #[error("Failed to encode snapshot: {0}")]
    SnapshotEncode(String),
    #[error("IO error: {0}")]
    Io(String),
}
