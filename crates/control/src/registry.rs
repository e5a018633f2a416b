//! Live connection registry and ping/pong liveness sweep.
//!
//! Responsibilities:
//! - track every accepted channel connection, partitioned by declared role;
//! - hand out snapshot copies of the worker/observer sets so dispatch code
//!   iterates without holding the lock;
//! - run the mark/sweep liveness protocol that is the only detector of
//!   silent peer loss.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use elytra_common::{global_metrics, ConnectionId, ElytraError, Result};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::protocol::Outbound;

/// Declared role of a channel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Executes tasks and reports results.
    Worker,
    /// Passive listener for progress broadcasts.
    Observer,
}

impl PeerRole {
    /// Parse the handshake `role` query parameter; anything but `observer`
    /// (including absence) is a worker.
    pub fn from_handshake(role: Option<&str>) -> Self {
        match role {
            Some("observer") => Self::Observer,
            _ => Self::Worker,
        }
    }
}

/// Send-side handle for one live connection.
///
/// Cloneable snapshot item: holding a `PeerHandle` never pins the registry
/// lock, and sending through it never suspends (the writer task drains an
/// unbounded queue).
#[derive(Debug, Clone)]
pub struct PeerHandle {
    /// Stable connection id.
    pub id: ConnectionId,
    /// Declared role.
    pub role: PeerRole,
    /// Advisory handshake flag, kept as connection metadata.
    pub is_mobile: bool,
    sender: UnboundedSender<Outbound>,
}

impl PeerHandle {
    /// Enqueue one serialized JSON frame.
    pub fn send_frame(&self, json: String) -> Result<()> {
        self.sender
            .send(Outbound::Frame(json))
            .map_err(|_| ElytraError::Transport(format!("connection {} is closed", self.id)))
    }

    fn push(&self, out: Outbound) -> bool {
        self.sender.send(out).is_ok()
    }
}

#[derive(Debug)]
struct PeerState {
    handle: PeerHandle,
    alive: bool,
}

/// Registry of live worker and observer connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    peers: Mutex<HashMap<ConnectionId, PeerState>>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a newly accepted connection and return its handle.
    pub fn accept(
        &self,
        sender: UnboundedSender<Outbound>,
        role: PeerRole,
        is_mobile: bool,
    ) -> PeerHandle {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let handle = PeerHandle {
            id,
            role,
            is_mobile,
            sender,
        };
        let mut peers = self.peers.lock().expect("registry lock poisoned");
        peers.insert(
            id,
            PeerState {
                handle: handle.clone(),
                alive: true,
            },
        );
        publish_gauges(&peers);
        drop(peers);
        info!(connection_id = %id, role = ?role, is_mobile, "connection accepted");
        handle
    }

    /// Remove a connection after its socket closed. Returns whether it was
    /// still registered.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let mut peers = self.peers.lock().expect("registry lock poisoned");
        let removed = peers.remove(&id).is_some();
        if removed {
            publish_gauges(&peers);
        }
        drop(peers);
        if removed {
            info!(connection_id = %id, "connection removed");
        }
        removed
    }

    /// Snapshot of the live worker set.
    pub fn workers(&self) -> Vec<PeerHandle> {
        self.snapshot(PeerRole::Worker)
    }

    /// Snapshot of the live observer set.
    pub fn observers(&self) -> Vec<PeerHandle> {
        self.snapshot(PeerRole::Observer)
    }

    fn snapshot(&self, role: PeerRole) -> Vec<PeerHandle> {
        let peers = self.peers.lock().expect("registry lock poisoned");
        peers
            .values()
            .filter(|p| p.handle.role == role)
            .map(|p| p.handle.clone())
            .collect()
    }

    /// Best-effort fan-out of one frame to a snapshot of peers.
    ///
    /// Returns the number of peers the frame was enqueued for; closed
    /// connections are skipped with a debug log.
    pub fn broadcast(&self, peers: &[PeerHandle], json: &str) -> usize {
        let mut delivered = 0;
        for peer in peers {
            match peer.send_frame(json.to_string()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    debug!(connection_id = %peer.id, "skipping broadcast to closed connection");
                }
            }
        }
        delivered
    }

    /// Record a pong, flipping the connection back to alive for this tick.
    pub fn mark_pong(&self, id: ConnectionId) {
        let mut peers = self.peers.lock().expect("registry lock poisoned");
        if let Some(peer) = peers.get_mut(&id) {
            peer.alive = true;
        }
    }

    /// One liveness tick: tear down every connection that missed the last
    /// ping, then mark the survivors dead-provisional and ping them.
    ///
    /// Returns the ids of torn-down connections.
    pub fn sweep(&self) -> Vec<ConnectionId> {
        let mut evicted = Vec::new();
        let mut peers = self.peers.lock().expect("registry lock poisoned");
        peers.retain(|id, peer| {
            if peer.alive {
                return true;
            }
            peer.handle.push(Outbound::Close);
            evicted.push(*id);
            false
        });
        for peer in peers.values_mut() {
            peer.alive = false;
            peer.handle.push(Outbound::Ping);
        }
        publish_gauges(&peers);
        drop(peers);

        for id in &evicted {
            warn!(connection_id = %id, "liveness check failed; connection torn down");
        }
        evicted
    }

    /// Number of registered connections, across both roles.
    pub fn len(&self) -> usize {
        self.peers.lock().expect("registry lock poisoned").len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn publish_gauges(peers: &HashMap<ConnectionId, PeerState>) {
    let workers = peers
        .values()
        .filter(|p| p.handle.role == PeerRole::Worker)
        .count();
    let metrics = global_metrics();
    metrics.set_connected_workers(workers as i64);
    metrics.set_connected_observers((peers.len() - workers) as i64);
}
