//! End-to-end transfer scenarios over loopback.
//!
//! Each test spins up a receiver and a sender as separate tokio tasks.  The
//! impaired scenarios route the sender through the fault-injecting
//! [`Router`] (seeded, so runs are reproducible) or through a small
//! deterministic tampering relay defined below.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use udp_file_transfer::{
    packet::{Packet, HEADER_SIZE, MAX_DATA_SIZE},
    receiver::{FileReceiver, ReceiveStats},
    sender::{FileSender, TransferStats},
    simulator::{Router, SimulatorConfig},
    socket::Socket,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn ephemeral() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

/// Deterministic test payload.
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Run one complete transfer of `data`, with the sender aimed at `target`
/// (either the receiver itself or a relay in front of it).
async fn run_transfer(
    server_socket: Socket,
    target: SocketAddr,
    data: Vec<u8>,
    guard: Duration,
) -> (Vec<u8>, ReceiveStats, TransferStats) {
    let server = tokio::spawn(async move {
        let mut receiver = FileReceiver::accept(server_socket).await.expect("accept");
        let mut sink = Vec::new();
        let stats = receiver.receive_to(&mut sink).await.expect("receive");
        (sink, stats)
    });

    let client = tokio::spawn(async move {
        let socket = ephemeral().await;
        let mut sender = FileSender::connect(socket, target).await.expect("connect");
        sender.send_bytes(&data).await.expect("send");
        sender.close().await.expect("close")
    });

    let (server_result, client_result) = tokio::time::timeout(guard, async {
        tokio::join!(server, client)
    })
    .await
    .expect("transfer timed out");

    let (received, recv_stats) = server_result.expect("server task panicked");
    let send_stats = client_result.expect("client task panicked");
    (received, recv_stats, send_stats)
}

/// Spawn a relay that forwards datagrams between one client and `upstream`,
/// passing each client→upstream datagram through `tamper`, which returns
/// the list of datagrams to actually forward (empty = drop).
async fn spawn_tampering_relay<F>(upstream: SocketAddr, mut tamper: F) -> SocketAddr
where
    F: FnMut(Vec<u8>) -> Vec<Vec<u8>> + Send + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind relay");
    let addr = socket.local_addr().expect("relay addr");
    tokio::spawn(async move {
        let mut client: Option<SocketAddr> = None;
        let mut buf = [0u8; 1500];
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let datagram = buf[..n].to_vec();
            if from == upstream {
                if let Some(client) = client {
                    let _ = socket.send_to(&datagram, client).await;
                }
            } else {
                client = Some(from);
                for out in tamper(datagram) {
                    let _ = socket.send_to(&out, upstream).await;
                }
            }
        }
    });
    addr
}

// ---------------------------------------------------------------------------
// Clean-channel scenarios
// ---------------------------------------------------------------------------

/// 10 KB over a clean channel: ⌈10240 / 1480⌉ = 7 data packets, none of
/// them retransmitted, output byte-identical.
#[tokio::test]
async fn clean_channel_10kb() {
    let server_socket = ephemeral().await;
    let target = server_socket.local_addr;
    let data = payload(10 * 1024);

    let (received, recv_stats, send_stats) =
        run_transfer(server_socket, target, data.clone(), Duration::from_secs(30)).await;

    assert_eq!(received, data);
    assert_eq!(send_stats.packets_sent, 7);
    assert_eq!(send_stats.retransmissions, 0);
    assert!(send_stats.acks_received >= 7);
    assert_eq!(recv_stats.packets_received, 7);
    assert_eq!(recv_stats.out_of_order_packets, 0);
    assert_eq!(recv_stats.bytes_written, data.len());
}

/// A zero-byte input completes with one FIN exchange and no data packets.
#[tokio::test]
async fn zero_byte_input() {
    let server_socket = ephemeral().await;
    let target = server_socket.local_addr;

    let (received, recv_stats, send_stats) =
        run_transfer(server_socket, target, Vec::new(), Duration::from_secs(30)).await;

    assert!(received.is_empty());
    assert_eq!(send_stats.packets_sent, 0);
    assert_eq!(send_stats.retransmissions, 0);
    assert_eq!(recv_stats.packets_received, 0);
    assert_eq!(recv_stats.bytes_written, 0);
}

/// An input that is an exact multiple of the payload size produces full
/// final packets and no empty trailer.
#[tokio::test]
async fn exact_multiple_of_max_data_size() {
    let server_socket = ephemeral().await;
    let target = server_socket.local_addr;
    let data = payload(MAX_DATA_SIZE * 3);

    let (received, recv_stats, send_stats) =
        run_transfer(server_socket, target, data.clone(), Duration::from_secs(30)).await;

    assert_eq!(received, data);
    assert_eq!(send_stats.packets_sent, 3);
    assert_eq!(recv_stats.packets_received, 3);
}

// ---------------------------------------------------------------------------
// Impaired-channel scenarios (seeded Router)
// ---------------------------------------------------------------------------

/// 100 KB through 8% loss (plus some duplication): the transfer completes,
/// retransmissions happen, and the output is byte-identical.
#[tokio::test]
async fn lossy_channel_100kb() {
    let server_socket = ephemeral().await;
    let upstream = server_socket.local_addr;
    let router = Router::spawn(
        "127.0.0.1:0".parse().unwrap(),
        upstream,
        SimulatorConfig {
            loss_rate: 0.08,
            duplicate_rate: 0.02,
            seed: 7,
            ..SimulatorConfig::default()
        },
    )
    .await
    .expect("spawn router");

    let data = payload(100 * 1024);
    let (received, _recv_stats, send_stats) = run_transfer(
        server_socket,
        router.local_addr,
        data.clone(),
        Duration::from_secs(120),
    )
    .await;

    assert_eq!(received, data);
    assert!(
        send_stats.retransmissions > 0,
        "8% loss must force retransmissions"
    );
    router.abort();
}

/// 50 KB through a reordering relay: the receiver buffers out-of-order
/// packets and still produces identical bytes.
#[tokio::test]
async fn reordering_channel_50kb() {
    let server_socket = ephemeral().await;
    let upstream = server_socket.local_addr;
    let router = Router::spawn(
        "127.0.0.1:0".parse().unwrap(),
        upstream,
        SimulatorConfig {
            reorder_rate: 0.15,
            seed: 21,
            ..SimulatorConfig::default()
        },
    )
    .await
    .expect("spawn router");

    let data = payload(50 * 1024);
    let (received, recv_stats, _send_stats) = run_transfer(
        server_socket,
        router.local_addr,
        data.clone(),
        Duration::from_secs(120),
    )
    .await;

    assert_eq!(received, data);
    assert!(
        recv_stats.out_of_order_packets > 0,
        "reordering must exercise the receive buffer"
    );
    router.abort();
}

// ---------------------------------------------------------------------------
// Deterministic fault scenarios (tampering relay)
// ---------------------------------------------------------------------------

/// One bit of data packet 5 is flipped in flight: the receiver discards it
/// on checksum, the sender retransmits, and the file arrives intact.
#[tokio::test]
async fn corrupted_packet_is_retransmitted() {
    let server_socket = ephemeral().await;
    let upstream = server_socket.local_addr;

    let mut corrupted = false;
    let relay = spawn_tampering_relay(upstream, move |datagram| {
        if !corrupted {
            if let Ok(pkt) = Packet::decode(&datagram) {
                if pkt.seq_num == 5 && pkt.data_len() > 0 {
                    corrupted = true;
                    let mut bad = datagram.clone();
                    bad[HEADER_SIZE + 2] ^= 0x10;
                    return vec![bad];
                }
            }
        }
        vec![datagram]
    })
    .await;

    // 30 KB = 21 packets, enough traffic behind the gap for duplicate ACKs.
    let data = payload(30 * 1024);
    let (received, _recv_stats, send_stats) =
        run_transfer(server_socket, relay, data.clone(), Duration::from_secs(60)).await;

    assert_eq!(received, data);
    assert!(
        send_stats.retransmissions >= 1,
        "the corrupted packet must be resent"
    );
}

/// A data packet delivered twice is re-ACKed with an unchanged cumulative
/// number and never corrupts the output.
#[tokio::test]
async fn duplicate_data_packet_is_discarded() {
    let server_socket = ephemeral().await;
    let upstream = server_socket.local_addr;

    let mut duplicated = false;
    let relay = spawn_tampering_relay(upstream, move |datagram| {
        if !duplicated {
            if let Ok(pkt) = Packet::decode(&datagram) {
                if pkt.seq_num == 3 && pkt.data_len() > 0 {
                    duplicated = true;
                    return vec![datagram.clone(), datagram];
                }
            }
        }
        vec![datagram]
    })
    .await;

    let data = payload(20 * 1024);
    let (received, recv_stats, _send_stats) =
        run_transfer(server_socket, relay, data.clone(), Duration::from_secs(60)).await;

    assert_eq!(received, data);
    assert!(
        recv_stats.duplicate_packets >= 1,
        "the duplicate must hit the discard branch"
    );
}
