//! The broadcast router: single consumer of all inbound CoT traffic

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::client::{ClientId, ClientRegistry, Message};

/// Counters maintained by the router. Shared, read-anywhere.
#[derive(Debug, Default)]
pub struct RouterStats {
    messages: AtomicU64,
    deliveries: AtomicU64,
    evictions: AtomicU64,
}

impl RouterStats {
    /// Inbound messages consumed
    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    /// Successful pushes onto outbound queues
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    /// Clients dropped because their queue was full or closed
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

/// Fan-out engine between sessions.
///
/// Consumes the shared inbound queue forever; exits when every inbound sender
/// has been dropped (server shutdown). For each `(sender, message)` pair it
/// takes a registry snapshot and attempts a non-blocking push to every other
/// client. Queue-full and queue-closed peers are collected during the pass
/// and unregistered after it completes, never mid-iteration.
pub struct BroadcastRouter {
    registry: Arc<ClientRegistry>,
    inbound_rx: mpsc::UnboundedReceiver<(ClientId, Message)>,
    stats: Arc<RouterStats>,
}

impl BroadcastRouter {
    /// Build a router over `registry`. Returns the router, the inbound sender
    /// handle for sessions to clone, and the shared stats.
    pub fn new(
        registry: Arc<ClientRegistry>,
    ) -> (
        Self,
        mpsc::UnboundedSender<(ClientId, Message)>,
        Arc<RouterStats>,
    ) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(RouterStats::default());
        let router = Self {
            registry,
            inbound_rx,
            stats: Arc::clone(&stats),
        };
        (router, inbound_tx, stats)
    }

    /// Consume the inbound queue until it closes.
    pub async fn run(mut self) {
        tracing::info!("broadcast router running");
        while let Some((sender_id, message)) = self.inbound_rx.recv().await {
            self.fan_out(sender_id, message).await;
        }
        tracing::info!(
            messages = self.stats.messages(),
            deliveries = self.stats.deliveries(),
            "broadcast router stopped"
        );
    }

    async fn fan_out(&self, sender_id: ClientId, message: Message) {
        self.stats.messages.fetch_add(1, Ordering::Relaxed);

        let snapshot = self.registry.snapshot().await;
        let mut unreachable = Vec::new();

        for (id, outbound) in &snapshot {
            if *id == sender_id {
                continue;
            }
            match outbound.try_send(Arc::clone(&message)) {
                Ok(()) => {
                    self.stats.deliveries.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(%id, "outbound queue full, evicting slow client");
                    unreachable.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(%id, "outbound queue closed, evicting");
                    unreachable.push(*id);
                }
            }
        }

        for id in unreachable {
            if self.registry.unregister(id).await {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
