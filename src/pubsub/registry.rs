//! Subscription Registry
//!
//! Process-wide table of connected RESP clients and the glob patterns each
//! has subscribed to. The registry is shared between every RESP session
//! (which registers, subscribes, and unregisters) and the notification
//! publisher (which asks it who should receive a broadcast).
//!
//! Each connection is held as an `Arc<ClientConnection>` carrying the write
//! half of its socket behind an async mutex, so the session's replies and
//! the publisher's pushed messages serialize on the same stream.

use crate::pubsub::glob::GlobPattern;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;

/// One registered RESP connection.
pub struct ClientConnection {
    /// Monotonically assigned, never reused for the process lifetime.
    id: u64,
    addr: SocketAddr,
    /// Patterns in subscription order; duplicates are kept on purpose.
    subscriptions: Mutex<Vec<String>>,
    /// Write half of the socket, shared by the session and the publisher.
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
}

impl ClientConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Snapshot of this connection's patterns, in subscription order.
    pub fn patterns(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    fn add_subscription(&self, pattern: String) {
        self.subscriptions.lock().unwrap().push(pattern);
    }

    /// Writes and flushes raw bytes on this connection's socket.
    pub async fn write_all(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

/// Reporting snapshot of one registered connection (for CLIENT LIST).
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: u64,
    pub addr: SocketAddr,
    pub patterns: Vec<String>,
}

/// The process-wide registry of RESP connections.
#[derive(Default)]
pub struct SubscriptionRegistry {
    /// Keyed by id; ids are monotone, so iteration order is insertion order.
    clients: Mutex<BTreeMap<u64, Arc<ClientConnection>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("clients", &self.len())
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted connection and assigns it the next id.
    pub fn register(&self, addr: SocketAddr, writer: OwnedWriteHalf) -> Arc<ClientConnection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let conn = Arc::new(ClientConnection {
            id,
            addr,
            subscriptions: Mutex::new(Vec::new()),
            writer: tokio::sync::Mutex::new(writer),
        });
        self.clients.lock().unwrap().insert(id, Arc::clone(&conn));
        conn
    }

    /// Removes a connection. A no-op if the id is already gone; the id is
    /// never handed out again either way.
    pub fn unregister(&self, id: u64) {
        self.clients.lock().unwrap().remove(&id);
    }

    /// Appends `pattern` to the connection's subscription list. Repeated
    /// identical patterns each occupy a slot; nothing is deduplicated.
    pub fn subscribe(&self, id: u64, pattern: String) {
        let conn = self.clients.lock().unwrap().get(&id).cloned();
        if let Some(conn) = conn {
            conn.add_subscription(pattern);
        }
    }

    /// Number of currently registered connections.
    pub fn len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reporting snapshot of every registered connection, in registry order.
    pub fn list(&self) -> Vec<ClientInfo> {
        self.clients
            .lock()
            .unwrap()
            .values()
            .map(|conn| ClientInfo {
                id: conn.id,
                addr: conn.addr,
                patterns: conn.patterns(),
            })
            .collect()
    }

    /// Every `(connection, pattern)` pair whose pattern covers
    /// `channel`, in registry order. A connection subscribed with several
    /// overlapping patterns appears once per matching pattern; the
    /// broadcast intentionally delivers one message per match.
    pub fn matching(&self, channel: &str) -> Vec<(Arc<ClientConnection>, String)> {
        let clients: Vec<Arc<ClientConnection>> =
            self.clients.lock().unwrap().values().cloned().collect();

        let mut matches = Vec::new();
        for conn in clients {
            for pattern in conn.patterns() {
                if GlobPattern::new(&pattern).matches(channel) {
                    matches.push((Arc::clone(&conn), pattern));
                }
            }
        }
        matches
    }
}
