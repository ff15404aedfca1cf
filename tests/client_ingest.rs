//! End-to-end tests for the client runtime over real localhost UDP.
//!
//! These tests verify the complete flow:
//! 1. A spawned client binds its data socket and starts both threads
//! 2. A fake server sends snapshot datagrams
//! 3. Snapshots land in the shared store under the lock discipline
//! 4. Heartbeats reach the fake server within the TTL
//! 5. Shutdown joins both threads and quiesces the store
//!
//! # Running with tracing
//!
//! ```bash
//! RUST_LOG=ptp_client=trace cargo test --features tracing -- --nocapture
//! ```

use std::net::UdpSocket;
use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

use ptp_client::protocol::{
    HEARTBEAT_PACKET_SIZE, ParticleUpdate, SnapshotPacket, encode_snapshot,
};
use ptp_client::{Client, ClientConfig};

static INIT_TRACING: Once = Once::new();

/// Initialize tracing for tests (only once).
fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        ptp_client::init_tracing();
    });
}

/// Helper to create a UDP socket bound to localhost on an ephemeral port.
fn bind_ephemeral() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind ephemeral");
    socket.set_nonblocking(true).expect("set nonblocking");
    let port = socket.local_addr().expect("local addr").port();
    (socket, port)
}

/// Spawns a client with fast polling, reporting heartbeats to `server_port`.
fn spawn_client(server_port: u16) -> Client {
    let config = ClientConfig {
        data_host: "127.0.0.1".into(),
        data_port: 0,
        server_host: "127.0.0.1".into(),
        server_port,
        recv_buffer_size: Some(1 << 20),
        heartbeat_ttl: Duration::from_millis(100),
        poll_interval: Duration::from_millis(2),
    };
    Client::spawn(config).expect("spawn client")
}

/// Helper to send a snapshot packet to the client's data socket.
fn send_snapshot(socket: &UdpSocket, client: &Client, packet: &SnapshotPacket) {
    let mut buf = Vec::new();
    encode_snapshot(packet, &mut buf).expect("encode");
    socket
        .send_to(&buf, client.data_addr().as_socket_addr())
        .expect("send snapshot");
}

/// Polls `predicate` until it holds or the timeout expires.
fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

fn sample_packet(total: u32, t: f32, updates: Vec<ParticleUpdate>) -> SnapshotPacket {
    SnapshotPacket {
        total_particle_count: total,
        simulation_time: t,
        world_origin: [0.0, 0.0, 0.0],
        world_size: [10.0, 10.0, 10.0],
        updates,
    }
}

#[test]
fn snapshots_flow_into_the_store() {
    init_test_tracing();
    let (server, server_port) = bind_ephemeral();
    let client = spawn_client(server_port);
    let store = client.store();

    send_snapshot(
        &server,
        &client,
        &sample_packet(
            100,
            1.0,
            vec![
                ParticleUpdate {
                    id: 5,
                    position: [1.0, 2.0, 3.0],
                    particle_type: 1,
                },
                ParticleUpdate {
                    id: 99,
                    position: [4.0, 5.0, 6.0],
                    particle_type: 2,
                },
            ],
        ),
    );

    assert!(
        wait_until(Duration::from_secs(2), || store
            .read(|s| s.packets_received() >= 1)),
        "snapshot was never applied"
    );

    store.read(|s| {
        assert_eq!(s.total_particle_count(), 100);
        assert_eq!(s.particles().len(), 100);
        assert_eq!(s.particles()[5].position, [1.0, 2.0, 3.0]);
        assert_eq!(s.particles()[99].position, [4.0, 5.0, 6.0]);
        assert!(!s.particles()[0].is_defined());
        assert_eq!(s.most_recent_timestamp(), 1.0);
        assert_eq!(s.total_timesteps(), 1);
    });

    // An out-of-order packet updates its ids without lowering the clock.
    send_snapshot(
        &server,
        &client,
        &sample_packet(
            100,
            0.5,
            vec![ParticleUpdate {
                id: 5,
                position: [9.0, 9.0, 9.0],
                particle_type: 1,
            }],
        ),
    );

    assert!(
        wait_until(Duration::from_secs(2), || store
            .read(|s| s.packets_received() >= 2)),
        "second snapshot was never applied"
    );

    store.read(|s| {
        assert_eq!(s.particles()[5].position, [9.0, 9.0, 9.0]);
        assert_eq!(s.particles()[99].position, [4.0, 5.0, 6.0]);
        assert_eq!(s.most_recent_timestamp(), 1.0);
        assert_eq!(s.total_timesteps(), 1);
    });

    client.shutdown();
}

#[test]
fn wrong_size_datagrams_never_reach_the_store() {
    init_test_tracing();
    let (server, server_port) = bind_ephemeral();
    let client = spawn_client(server_port);
    let store = client.store();

    // Undersized garbage first, then a valid packet.
    server
        .send_to(&[0u8; 100], client.data_addr().as_socket_addr())
        .expect("send garbage");
    send_snapshot(&server, &client, &sample_packet(10, 1.0, vec![]));

    assert!(
        wait_until(Duration::from_secs(2), || store
            .read(|s| s.packets_received() >= 1)),
        "valid snapshot was never applied"
    );
    // Only the valid datagram counted.
    assert_eq!(store.read(|s| s.packets_received()), 1);

    client.shutdown();
}

#[test]
fn heartbeat_reaches_the_server_within_ttl() {
    init_test_tracing();
    let (server, server_port) = bind_ephemeral();
    let client = spawn_client(server_port);
    let store = client.store();

    let mut buf = [0u8; 64];
    let mut received = None;
    assert!(
        wait_until(Duration::from_secs(2), || {
            match server.recv_from(&mut buf) {
                Ok((len, _from)) => {
                    received = Some(len);
                    true
                }
                Err(_) => false,
            }
        }),
        "no heartbeat arrived"
    );
    assert_eq!(received, Some(HEARTBEAT_PACKET_SIZE));

    assert!(
        wait_until(Duration::from_secs(2), || store
            .read(|s| s.heartbeats_sent() >= 1)),
        "heartbeat counter never advanced"
    );

    client.shutdown();
}

#[test]
fn shutdown_quiesces_the_store() {
    init_test_tracing();
    let (server, server_port) = bind_ephemeral();
    let client = spawn_client(server_port);
    let store = client.store();

    send_snapshot(&server, &client, &sample_packet(10, 1.0, vec![]));
    assert!(
        wait_until(Duration::from_secs(2), || store
            .read(|s| s.packets_received() >= 1)),
        "snapshot was never applied"
    );

    let data_addr = client.data_addr().as_socket_addr();
    client.shutdown();

    // Join has returned: nothing mutates the store anymore, even if more
    // datagrams are thrown at the old address.
    let packets_at_shutdown = store.read(|s| s.packets_received());
    let mut buf = Vec::new();
    encode_snapshot(&sample_packet(10, 2.0, vec![]), &mut buf).expect("encode");
    let _ = server.send_to(&buf, data_addr);
    thread::sleep(Duration::from_millis(50));

    assert_eq!(store.read(|s| s.packets_received()), packets_at_shutdown);
}
