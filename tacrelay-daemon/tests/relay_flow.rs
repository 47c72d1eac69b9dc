//! End-to-end relay flows over real loopback sockets

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use tacrelay_broadcaster::{BroadcastRouter, ClientRegistry, RouterStats};
use tacrelay_daemon::{RelayConfig, RelayServer};

struct Relay {
    tcp_addr: SocketAddr,
    udp_addr: Option<SocketAddr>,
    registry: Arc<ClientRegistry>,
    stats: Arc<RouterStats>,
}

async fn start_relay(mut config: RelayConfig) -> Relay {
    config.bind_host = "127.0.0.1".to_string();
    config.tcp_port = 0;

    let registry = Arc::new(ClientRegistry::new());
    let (router, inbound_tx, stats) = BroadcastRouter::new(Arc::clone(&registry));
    tokio::spawn(router.run());

    let server = RelayServer::bind(config, Arc::clone(&registry), inbound_tx)
        .await
        .unwrap();
    let tcp_addr = server.local_addr().unwrap();
    let udp_addr = server.udp_local_addr();
    tokio::spawn(server.run());

    Relay {
        tcp_addr,
        udp_addr,
        registry,
        stats,
    }
}

async fn wait_for_clients(registry: &ClientRegistry, want: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while registry.len().await != want {
        assert!(
            tokio::time::Instant::now() < deadline,
            "registry never reached {want} clients (at {})",
            registry.len().await
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// The full admission/relay/replacement scenario: capacity two, A and B
/// talking, C refused until B leaves.
#[tokio::test]
async fn test_capacity_relay_and_replacement() {
    let relay = start_relay(RelayConfig {
        max_clients: 2,
        ..RelayConfig::default()
    })
    .await;

    let mut a = TcpStream::connect(relay.tcp_addr).await.unwrap();
    let b = TcpStream::connect(relay.tcp_addr).await.unwrap();
    wait_for_clients(&relay.registry, 2).await;

    // A's message reaches B and only B
    a.write_all(b"<event uid=\"1\"/>\n").await.unwrap();
    let mut b_lines = BufReader::new(b).lines();
    let line = timeout(Duration::from_secs(2), b_lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(line, r#"<event uid="1"/>"#);

    // A hears nothing back
    let mut scratch = [0u8; 64];
    assert!(
        timeout(Duration::from_millis(200), a.read(&mut scratch))
            .await
            .is_err(),
        "sender received its own broadcast"
    );

    // C is refused at capacity: accepted by the kernel, closed by the relay
    let mut c = TcpStream::connect(relay.tcp_addr).await.unwrap();
    let n = timeout(Duration::from_secs(2), c.read(&mut scratch))
        .await
        .expect("refused connection was not closed")
        .unwrap();
    assert_eq!(n, 0);
    assert_eq!(relay.registry.len().await, 2);

    // Existing peers are unaffected by the refusal
    a.write_all(b"<event uid=\"2\"/>\n").await.unwrap();
    let line = timeout(Duration::from_secs(2), b_lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(line, r#"<event uid="2"/>"#);

    // B leaves; C can now join and it alone receives A's next message
    drop(b_lines);
    wait_for_clients(&relay.registry, 1).await;

    let c2 = TcpStream::connect(relay.tcp_addr).await.unwrap();
    wait_for_clients(&relay.registry, 2).await;

    a.write_all(b"<event uid=\"3\"/>\n").await.unwrap();
    let mut c2_lines = BufReader::new(c2).lines();
    let line = timeout(Duration::from_secs(2), c2_lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(line, r#"<event uid="3"/>"#);
    assert!(
        timeout(Duration::from_millis(200), a.read(&mut scratch))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_per_sender_order_over_sockets() {
    let relay = start_relay(RelayConfig::default()).await;

    let mut sender = TcpStream::connect(relay.tcp_addr).await.unwrap();
    let receiver = TcpStream::connect(relay.tcp_addr).await.unwrap();
    wait_for_clients(&relay.registry, 2).await;

    // One burst, many messages, partly coalesced by the stack
    let mut wire = String::new();
    for n in 0..50 {
        wire.push_str(&format!("<event uid=\"{n}\"/>\n"));
    }
    sender.write_all(wire.as_bytes()).await.unwrap();

    let mut lines = BufReader::new(receiver).lines();
    for n in 0..50 {
        let line = timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(line, format!("<event uid=\"{n}\"/>"));
    }
}

#[tokio::test]
async fn test_fragmented_writes_reassemble_across_the_relay() {
    let relay = start_relay(RelayConfig::default()).await;

    let mut sender = TcpStream::connect(relay.tcp_addr).await.unwrap();
    let receiver = TcpStream::connect(relay.tcp_addr).await.unwrap();
    wait_for_clients(&relay.registry, 2).await;

    // Dribble one document a few bytes at a time
    let doc = b"<event uid=\"fragmented\"><point lat=\"1\" lon=\"2\"/></event>\n";
    for chunk in doc.chunks(7) {
        sender.write_all(chunk).await.unwrap();
        sender.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let mut lines = BufReader::new(receiver).lines();
    let line = timeout(Duration::from_secs(2), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        line,
        r#"<event uid="fragmented"><point lat="1" lon="2"/></event>"#
    );
}

#[tokio::test]
async fn test_malformed_line_dropped_without_disconnect() {
    let relay = start_relay(RelayConfig::default()).await;

    let mut sender = TcpStream::connect(relay.tcp_addr).await.unwrap();
    let receiver = TcpStream::connect(relay.tcp_addr).await.unwrap();
    wait_for_clients(&relay.registry, 2).await;

    sender.write_all(b"this is not xml\n").await.unwrap();
    sender.write_all(b"<event uid=\"ok\"/>\n").await.unwrap();

    // Only the valid document comes through; the sender stays connected
    let mut lines = BufReader::new(receiver).lines();
    let line = timeout(Duration::from_secs(2), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(line, r#"<event uid="ok"/>"#);
    assert_eq!(relay.registry.len().await, 2);
    assert_eq!(relay.stats.messages(), 1);
}

#[tokio::test]
async fn test_udp_datagram_reaches_stream_subscribers() {
    let relay = start_relay(RelayConfig {
        udp_port: Some(0),
        ..RelayConfig::default()
    })
    .await;
    let udp_addr = relay.udp_addr.expect("udp ingest not bound");

    let subscriber = TcpStream::connect(relay.tcp_addr).await.unwrap();
    wait_for_clients(&relay.registry, 1).await;

    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sock.send_to(b"<event uid=\"udp\"/>", udp_addr).await.unwrap();
    // And one with a stream-style trailing newline
    sock.send_to(b"<event uid=\"udp2\"/>\n", udp_addr)
        .await
        .unwrap();

    let mut lines = BufReader::new(subscriber).lines();
    for expected in [r#"<event uid="udp"/>"#, r#"<event uid="udp2"/>"#] {
        let line = timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(line, expected);
    }
}

#[tokio::test]
async fn test_idle_peer_is_disconnected() {
    let relay = start_relay(RelayConfig {
        idle_timeout_secs: 1,
        ..RelayConfig::default()
    })
    .await;

    let mut quiet = TcpStream::connect(relay.tcp_addr).await.unwrap();
    wait_for_clients(&relay.registry, 1).await;

    // Say nothing; the relay hangs up on us
    let mut scratch = [0u8; 16];
    let n = timeout(Duration::from_secs(3), quiet.read(&mut scratch))
        .await
        .expect("idle peer was never disconnected")
        .unwrap();
    assert_eq!(n, 0);
    wait_for_clients(&relay.registry, 0).await;
}
