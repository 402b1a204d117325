use super::{ChannelManager, ResponseSender};
use crate::protocol::Response;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub type ConnectionId = u64;

/// A client connection: its outbound queue and the channels opened on it
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    sender: ResponseSender,
    channels: ChannelManager,
}

impl Connection {
    pub fn new(id: ConnectionId, peer: Option<SocketAddr>, sender: ResponseSender) -> Self {
        Self {
            id,
            peer,
            sender,
            channels: ChannelManager::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn sender(&self) -> &ResponseSender {
        &self.sender
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    /// Queue a frame for the client; false once the serve loop has stopped
    pub fn send(&self, response: Response) -> bool {
        self.sender.send(response).is_ok()
    }

    /// Close every channel, cancelling their consumers
    pub fn close(&self) {
        self.channels.close_all();
        debug!("Connection {} closed its channels", self.id);
    }
}

/// Live connections keyed by a monotonically increasing id
pub struct ConnectionManager {
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
        }
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: Option<SocketAddr>, sender: ResponseSender) -> Arc<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(Connection::new(id, peer, sender));
        self.connections.lock().insert(id, Arc::clone(&connection));
        info!("Registered connection {} from {:?}", id, peer);
        connection
    }

    /// Forget the connection and close its channels
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.connections.lock().remove(&id);
        if let Some(connection) = &removed {
            connection.close();
            info!("Removed connection {}", id);
        }
        removed
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    pub fn close_all(&self) {
        let connections: Vec<_> = self
            .connections
            .lock()
            .drain()
            .map(|(_, connection)| connection)
            .collect();
        for connection in connections {
            connection.close();
        }
    }
}
