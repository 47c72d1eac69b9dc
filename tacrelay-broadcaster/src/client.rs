//! Client identifiers and the concurrent client registry

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::RwLock;

use crate::error::{BroadcasterError, Result};

/// One CoT document, without its trailing delimiter. Produced once by a
/// session's read loop, shared read-only by every outbound delivery.
pub type Message = Arc<str>;

/// Opaque per-connection identifier.
///
/// Allocated monotonically by the registry at accept time and never reused
/// while the registry still references it. Doubles as the exclude-from-
/// broadcast token: the router skips the entry whose id matches a message's
/// sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Concurrent directory mapping each connected client to the sending half of
/// its bounded outbound queue.
///
/// Sessions register themselves at accept time and unregister on disconnect;
/// the router reads it on every fan-out. `snapshot` clones the senders out
/// under a read lock, so iteration never holds the lock and a concurrent
/// unregister cannot invalidate it. A client registered while a fan-out is in
/// flight may or may not see that message; CoT delivery is best-effort.
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, mpsc::Sender<Message>>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh, never-reused id. Also used by non-session producers
    /// (UDP ingest) that need sender-exclusion but no outbound queue.
    pub fn allocate_id(&self) -> ClientId {
        ClientId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn register(&self, id: ClientId, sender: mpsc::Sender<Message>) -> Result<()> {
        let mut clients = self.clients.write().await;
        if clients.contains_key(&id) {
            return Err(BroadcasterError::DuplicateClient(id));
        }
        clients.insert(id, sender);
        tracing::info!(%id, total = clients.len(), "client registered");
        Ok(())
    }

    /// Remove a client. Returns false if it was already gone, so the session
    /// teardown path and the router's eviction path can both call this
    /// without coordinating.
    pub async fn unregister(&self, id: ClientId) -> bool {
        let mut clients = self.clients.write().await;
        let removed = clients.remove(&id).is_some();
        if removed {
            tracing::info!(%id, total = clients.len(), "client unregistered");
        }
        removed
    }

    /// Clone out the current membership for one fan-out pass.
    pub async fn snapshot(&self) -> Vec<(ClientId, mpsc::Sender<Message>)> {
        self.clients
            .read()
            .await
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
