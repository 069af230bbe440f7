use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Counts accepted TCP connections per listening address.
#[derive(Clone, Default)]
pub struct ConnectionTracker {
    connections: Arc<Mutex<HashMap<SocketAddr, Vec<Instant>>>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection accepted on `addr`.
    pub fn record_connection(&self, addr: SocketAddr) {
        self.connections
            .lock()
            .unwrap()
            .entry(addr)
            .or_default()
            .push(Instant::now());
    }

    /// Number of connections accepted on `addr`.
    pub fn connection_count(&self, addr: SocketAddr) -> usize {
        self.connections
            .lock()
            .unwrap()
            .get(&addr)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Number of connections accepted on any address.
    pub fn total(&self) -> usize {
        self.connections.lock().unwrap().values().map(|v| v.len()).sum()
    }
}
