//! UDP ingest: one datagram is one CoT message, no framing
//!
//! Recognized alternative transport for senders that cannot hold a stream
//! open (radio gateways, fire-and-forget beacons). Ingest-only: datagram
//! sources have no outbound queue and receive nothing back.

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tacrelay_broadcaster::{ClientId, Message};
use tacrelay_cot::is_well_formed;

const MAX_DATAGRAM: usize = 64 * 1024;

pub async fn ingest_loop(
    socket: UdpSocket,
    id: ClientId,
    inbound_tx: mpsc::UnboundedSender<(ClientId, Message)>,
) {
    info!(%id, addr = ?socket.local_addr().ok(), "udp ingest listening");
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => {
                let datagram = &buf[..n];
                // Some senders still terminate datagrams stream-style
                let datagram = datagram.strip_suffix(b"\n").unwrap_or(datagram);
                let datagram = datagram.strip_suffix(b"\r").unwrap_or(datagram);

                match std::str::from_utf8(datagram) {
                    Ok(text) if is_well_formed(text) => {
                        if inbound_tx.send((id, Message::from(text))).is_err() {
                            // Router gone: server is shutting down
                            return;
                        }
                    }
                    _ => {
                        debug!(%from, len = n, "discarding malformed datagram");
                    }
                }
            }
            Err(e) => {
                warn!("udp receive error: {e}");
            }
        }
    }
}
