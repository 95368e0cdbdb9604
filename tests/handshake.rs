//! Integration tests for connection establishment and teardown.
//!
//! Each test spins up a real `tokio::net::UdpSocket` on loopback, runs one
//! half in a background task, and verifies the handshake/teardown contract —
//! including the lossy paths (silent peer, lost final ACK, lost FIN).

use std::net::SocketAddr;
use std::time::Duration;

use udp_file_transfer::{
    connection::{ConnError, Connection},
    packet::Packet,
    sender::FileSender,
    socket::Socket,
    state::ConnectionState,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Bind a socket to an OS-assigned port on loopback.
async fn ephemeral() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Both sides should reach `Established` after a clean handshake on loopback.
#[tokio::test]
async fn handshake_both_sides_reach_established() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    // Server blocks on `accept` until the SYN arrives.
    let server_task = tokio::spawn(async move { Connection::accept(server_socket).await });

    let client_socket = ephemeral().await;
    let client_addr = client_socket.local_addr;
    let client_conn = tokio::time::timeout(
        Duration::from_secs(5),
        Connection::connect(client_socket, server_addr),
    )
    .await
    .expect("client connect timed out")
    .expect("client connect failed");

    let server_conn = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server accept timed out")
        .expect("server task panicked")
        .expect("server accept failed");

    assert_eq!(client_conn.state, ConnectionState::Established);
    assert_eq!(server_conn.state, ConnectionState::Established);
    assert_eq!(server_conn.peer, client_addr);
    assert_eq!(client_conn.peer, server_addr);
    assert!(server_conn.pending.is_none());
}

/// Connecting to an address where nobody is listening should eventually fail
/// rather than hang forever.
#[tokio::test]
async fn connect_to_silent_peer_fails_after_retries() {
    // Bind an ephemeral port and immediately drop the socket so the port is
    // unbound; any SYN sent there gets no reply.
    let silent_addr = {
        let tmp = ephemeral().await;
        tmp.local_addr
    };

    let client_socket = ephemeral().await;
    let result = Connection::connect(client_socket, silent_addr).await;

    assert!(
        matches!(result, Err(ConnError::HandshakeFailed)),
        "expected HandshakeFailed, got: {result:?}",
    );
}

/// A lost final ACK must not strand the passive side: the first data packet
/// proves the sender is established, and `accept` hands it back as pending.
#[tokio::test]
async fn accept_survives_lost_final_ack() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let server_task = tokio::spawn(async move { Connection::accept(server_socket).await });

    // Hand-rolled client: SYN, await SYN-ACK, then *skip* the final ACK and
    // go straight to data.
    let client_socket = ephemeral().await;
    client_socket
        .send_to(&Packet::syn(), server_addr)
        .await
        .expect("send SYN");
    let (syn_ack, _) = tokio::time::timeout(Duration::from_secs(5), client_socket.recv_from())
        .await
        .expect("SYN-ACK timed out")
        .expect("recv SYN-ACK");
    assert!(syn_ack.is_syn() && syn_ack.is_ack());

    let first_data = Packet::data(1, b"early bytes".to_vec());
    client_socket
        .send_to(&first_data, server_addr)
        .await
        .expect("send data");

    let server_conn = tokio::time::timeout(Duration::from_secs(10), server_task)
        .await
        .expect("accept timed out")
        .expect("server task panicked")
        .expect("accept failed");

    assert_eq!(server_conn.state, ConnectionState::Established);
    let pending = server_conn.pending.expect("data packet must be preserved");
    assert_eq!(pending.seq_num, 1);
    assert_eq!(pending.payload, b"early bytes");
}

/// A sender whose FIN is never acknowledged retries it a bounded number of
/// times and then force-closes instead of hanging.
#[tokio::test]
async fn lost_fin_retries_then_force_closes() {
    let peer_socket = ephemeral().await;
    let peer_addr = peer_socket.local_addr;

    // Fake receiver: completes the handshake, then swallows FINs silently.
    // Resolves once it has seen a retried (second) FIN.
    let peer_task = tokio::spawn(async move {
        let (syn, client_addr) = peer_socket.recv_from().await.expect("recv SYN");
        assert!(syn.is_syn());
        peer_socket
            .send_to(&Packet::syn_ack(syn.seq_num + 1), client_addr)
            .await
            .expect("send SYN-ACK");
        let (ack, _) = peer_socket.recv_from().await.expect("recv final ACK");
        assert!(ack.is_ack());

        let mut fins_seen = 0u32;
        while fins_seen < 2 {
            let (pkt, _) = peer_socket.recv_from().await.expect("recv");
            if pkt.is_fin() {
                fins_seen += 1;
            }
        }
        fins_seen
    });

    let client_socket = ephemeral().await;
    let sender = FileSender::connect(client_socket, peer_addr)
        .await
        .expect("connect");

    // No data: close() goes straight to the FIN exchange, which will never
    // be acknowledged.
    let stats = tokio::time::timeout(Duration::from_secs(30), sender.close())
        .await
        .expect("close must give up in bounded time")
        .expect("force-close still reports success");
    assert_eq!(stats.packets_sent, 0);

    let fins_seen = tokio::time::timeout(Duration::from_secs(5), peer_task)
        .await
        .expect("peer timed out")
        .expect("peer task panicked");
    assert!(fins_seen >= 2, "FIN was never retried");
}
