//! Connection registry and delivery for progress events.
//!
//! Each connection is a bounded queue plus a set of download ids. An empty
//! set means every download. A failed `try_send` removes the connection.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::event::{ProgressPayload, ServerMessage};

/// Queue depth per subscriber.
pub const DEFAULT_CONNECTION_CAPACITY: usize = 256;

/// Identifier of one subscriber connection, rendered as `client_N`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct Connection {
    sender: mpsc::Sender<ServerMessage>,
    /// Empty means every download.
    subscriptions: HashSet<u64>,
}

impl Connection {
    fn wants(&self, download_id: u64) -> bool {
        self.subscriptions.is_empty() || self.subscriptions.contains(&download_id)
    }
}

/// Registry of subscriber connections.
#[derive(Debug)]
pub struct ProgressBroadcaster {
    connections: DashMap<ConnectionId, Connection>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTION_CAPACITY)
    }
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber of everything. Messages arrive on the receiver.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let id = ConnectionId(format!("client_{}", n));
        let (sender, receiver) = mpsc::channel(self.capacity);

        self.connections.insert(
            id.clone(),
            Connection {
                sender,
                subscriptions: HashSet::new(),
            },
        );
        info!(client_id = %id, total = self.connections.len(), "Subscriber connected");
        (id, receiver)
    }

    pub fn disconnect(&self, id: &ConnectionId) {
        if self.connections.remove(id).is_some() {
            info!(client_id = %id, total = self.connections.len(), "Subscriber disconnected");
        }
    }

    /// Add one download to a connection's subscriptions.
    pub fn subscribe(&self, id: &ConnectionId, download_id: u64) -> bool {
        self.connections
            .get_mut(id)
            .map(|mut conn| {
                conn.subscriptions.insert(download_id);
            })
            .is_some()
    }

    pub fn unsubscribe(&self, id: &ConnectionId, download_id: u64) -> bool {
        self.connections
            .get_mut(id)
            .map(|mut conn| {
                conn.subscriptions.remove(&download_id);
            })
            .is_some()
    }

    /// Reset to the "everything" subscription.
    pub fn subscribe_all(&self, id: &ConnectionId) -> bool {
        self.connections
            .get_mut(id)
            .map(|mut conn| conn.subscriptions.clear())
            .is_some()
    }

    /// Deliver a message to one connection, dropping it if the queue is
    /// full or closed.
    pub fn send_to(&self, id: &ConnectionId, message: ServerMessage) -> bool {
        let delivered = match self.connections.get(id) {
            Some(conn) => conn.sender.try_send(message).is_ok(),
            None => return false,
        };
        if !delivered {
            debug!(client_id = %id, "Delivery failed, dropping subscriber");
            self.disconnect(id);
        }
        delivered
    }

    /// Fan a progress payload out to interested connections.
    ///
    /// Returns the number of connections that received it.
    pub fn broadcast(&self, payload: &ProgressPayload) -> usize {
        let download_id = payload.download_id;
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.connections.iter() {
            if !entry.wants(download_id) {
                continue;
            }
            match entry.sender.try_send(ServerMessage::progress(payload.clone())) {
                Ok(()) => delivered += 1,
                Err(_) => dead.push(entry.key().clone()),
            }
        }

        // Removal happens after iteration releases the shard locks.
        for id in dead {
            debug!(client_id = %id, download_id, "Delivery failed, dropping subscriber");
            self.disconnect(&id);
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Current subscriptions of a connection; `None` if it is not registered.
    pub fn subscriptions(&self, id: &ConnectionId) -> Option<HashSet<u64>> {
        self.connections.get(id).map(|c| c.subscriptions.clone())
    }
}
