//! Client session: one socket, a read duty and a write duty
//!
//! The two duties run as independent tokio tasks joined only by the shared
//! inbound queue and this session's outbound queue, so a peer that is slow to
//! accept writes never stalls reading from it, and vice versa. Whichever duty
//! dies first signals the other: the read duty unregisters the session (which
//! drops the registry's outbound sender, ending the write duty once the queue
//! drains), the write duty trips a notify the read duty selects on.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::time::timeout;

use tacrelay_broadcaster::{ClientId, ClientRegistry, Message};
use tacrelay_cot::StreamFramer;

use crate::config::RelayConfig;

const READ_BUF_SIZE: usize = 8 * 1024;

/// Connection lifecycle. Transitions are one-way; `advance_to` refuses to
/// move backwards, so both duties can report transitions without coordinating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Ready = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Ready,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Per-session knobs lifted out of the relay configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    pub framer_soft_cap: usize,
    pub framer_hard_cap: usize,
}

impl From<&RelayConfig> for SessionConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            framer_soft_cap: config.framer_soft_cap,
            framer_hard_cap: config.framer_hard_cap,
        }
    }
}

struct SessionShared {
    id: ClientId,
    state: AtomicU8,
    registry: Arc<ClientRegistry>,
    /// Tripped by the write duty on exit to unblock a read blocked on recv
    write_closed: Notify,
    /// Duties still running; the one that reaches zero finishes teardown
    duties: AtomicU8,
}

impl SessionShared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn advance_to(&self, next: ConnectionState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= next as u8 {
                return false;
            }
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Called once per duty on exit. The last one out removes the registry
    /// entry (idempotent) and marks the session Closed.
    async fn duty_finished(&self) {
        if self.duties.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.registry.unregister(self.id).await;
            self.advance_to(ConnectionState::Closed);
            tracing::debug!(id = %self.id, "session closed");
        }
    }
}

/// Observer handle for a spawned session.
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn id(&self) -> ClientId {
        self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }
}

/// Start both duties for an accepted (and, if configured, handshaken) stream.
///
/// The caller has already registered `id` with the sending half of
/// `outbound_rx`'s channel; this session owns the receiving half and the
/// socket.
pub fn spawn<S>(
    stream: S,
    id: ClientId,
    registry: Arc<ClientRegistry>,
    inbound_tx: mpsc::UnboundedSender<(ClientId, Message)>,
    outbound_rx: mpsc::Receiver<Message>,
    config: SessionConfig,
) -> SessionHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let shared = Arc::new(SessionShared {
        id,
        state: AtomicU8::new(ConnectionState::Connecting as u8),
        registry,
        write_closed: Notify::new(),
        duties: AtomicU8::new(2),
    });
    shared.advance_to(ConnectionState::Ready);

    tokio::spawn(write_duty(write_half, outbound_rx, Arc::clone(&shared)));
    tokio::spawn(read_duty(read_half, inbound_tx, Arc::clone(&shared), config));

    SessionHandle { shared }
}

/// Socket -> framer -> inbound queue. Exits on idle timeout, EOF, read
/// error, router shutdown, or the write duty going down.
async fn read_duty<R>(
    mut reader: R,
    inbound_tx: mpsc::UnboundedSender<(ClientId, Message)>,
    shared: Arc<SessionShared>,
    config: SessionConfig,
) where
    R: AsyncRead + Unpin,
{
    let mut framer = StreamFramer::with_caps(config.framer_soft_cap, config.framer_hard_cap);
    let mut buf = vec![0u8; READ_BUF_SIZE];

    'session: loop {
        tokio::select! {
            _ = shared.write_closed.notified() => {
                tracing::debug!(id = %shared.id, "read duty stopping, write duty gone");
                break 'session;
            }
            read = timeout(config.idle_timeout, reader.read(&mut buf)) => {
                match read {
                    Err(_) => {
                        tracing::info!(id = %shared.id, "idle timeout, disconnecting");
                        break 'session;
                    }
                    Ok(Ok(0)) => {
                        tracing::debug!(id = %shared.id, "peer closed connection");
                        break 'session;
                    }
                    Ok(Ok(n)) => {
                        for message in framer.feed(&buf[..n]) {
                            if inbound_tx.send((shared.id, Message::from(message))).is_err() {
                                // Router gone: server is shutting down
                                break 'session;
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(id = %shared.id, "read error: {e}");
                        break 'session;
                    }
                }
            }
        }
    }

    let stats = framer.stats();
    if stats.discarded > 0 || stats.overflows > 0 {
        tracing::info!(
            id = %shared.id,
            discarded = stats.discarded,
            overflows = stats.overflows,
            "framer dropped traffic from this peer"
        );
    }

    shared.advance_to(ConnectionState::Closing);
    // Unregister immediately so the router stops queueing to us; dropping the
    // registry's sender also lets the write duty finish once it has drained.
    shared.registry.unregister(shared.id).await;
    shared.duty_finished().await;
}

/// Outbound queue -> socket. Exits on queue closure or write error.
async fn write_duty<W>(
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<Message>,
    shared: Arc<SessionShared>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound_rx.recv().await {
        if shared.state() >= ConnectionState::Closing {
            break;
        }
        if let Err(e) = write_message(&mut writer, &message).await {
            tracing::warn!(id = %shared.id, "write error: {e}");
            break;
        }
    }

    shared.advance_to(ConnectionState::Closing);
    shared.write_closed.notify_one();
    shared.duty_finished().await;
}

async fn write_message<W>(writer: &mut W, message: &Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(message.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
