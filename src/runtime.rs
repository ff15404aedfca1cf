//! Client runtime: supervision of the heartbeat and snapshot threads.
//!
//! # Architecture
//!
//! [`Client::spawn`] starts two independent threads against one shared
//! [`ParticleStore`](crate::store::ParticleStore):
//! - **Heartbeat thread**: keeps the server's liveness timer from
//!   expiring (outbound only).
//! - **Data thread**: receives snapshot datagrams and applies them to
//!   the store (inbound, mutating).
//!
//! Neither loop ever blocks indefinitely; both poll non-blocking sockets
//! and observe a shared shutdown token every iteration, so
//! [`Client::shutdown`] completes within one poll interval per thread.
//! The join inside `shutdown` is the quiescence point: afterwards no
//! further store writes occur.
//!
//! The renderer and the config/CLI layer are external collaborators: the
//! former polls [`Client::store`], the latter populates [`ClientConfig`].

pub mod heartbeat;
pub mod receiver;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::{Endpoint, UdpSocket};
use crate::protocol::{DEFAULT_CLIENT_PORT, DEFAULT_SERVER_PORT};
use crate::store::SharedParticleStore;
use crate::trace::{debug, error, info, warn};

use heartbeat::HeartbeatSender;
use receiver::SnapshotReceiver;

/// Idle pause between poll attempts when a loop has no work; also the
/// bound on shutdown responsiveness.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long the server keeps a silent client alive. Heartbeats are spaced
/// at this interval; the server's own window is expected to be larger.
pub const HEARTBEAT_TTL: Duration = Duration::from_secs(5);

/// Connection parameters, populated by the embedding config/CLI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Local host to bind for snapshot reception.
    pub data_host: String,
    /// Local port to bind for snapshot reception.
    pub data_port: u16,
    /// Server hostname for heartbeats; resolved once by the heartbeat
    /// thread.
    pub server_host: String,
    /// Server port for heartbeats.
    pub server_port: u16,
    /// Requested SO_RCVBUF for the data socket; best-effort.
    pub recv_buffer_size: Option<usize>,
    /// Interval between heartbeat sends.
    pub heartbeat_ttl: Duration,
    /// Idle pause between poll attempts.
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_host: "127.0.0.1".into(),
            data_port: DEFAULT_CLIENT_PORT,
            server_host: "127.0.0.1".into(),
            server_port: DEFAULT_SERVER_PORT,
            recv_buffer_size: None,
            heartbeat_ttl: HEARTBEAT_TTL,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Error spawning the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The local data bind address did not resolve.
    #[error("failed to resolve data bind address {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: io::Error,
    },
    /// Failed to bind a UDP socket.
    #[error("failed to bind socket: {0}")]
    Bind(io::Error),
}

/// Handle to a running client.
///
/// Dropping the handle will signal shutdown but not wait for threads to
/// exit. Use [`Client::shutdown`] for graceful shutdown with join.
pub struct Client {
    /// Shutdown token observed by both threads at every poll iteration.
    shutdown_flag: Arc<AtomicBool>,
    data_handle: Option<JoinHandle<()>>,
    heartbeat_handle: Option<JoinHandle<()>>,
    store: SharedParticleStore,
    data_addr: Endpoint,
}

impl Client {
    /// Spawns the heartbeat and data threads against a fresh store.
    ///
    /// The data socket is bound here with address/port reuse; sockets are
    /// owned by their threads and closed when the loops exit.
    ///
    /// # Errors
    /// Returns an error if the data bind address does not resolve or a
    /// socket cannot be bound. Server hostname resolution is deliberately
    /// deferred to the heartbeat thread: its failure must not take down
    /// snapshot reception.
    ///
    /// # Panics
    /// Panics if thread spawning fails.
    pub fn spawn(config: ClientConfig) -> Result<Self, ClientError> {
        info!(
            data_host = %config.data_host,
            data_port = config.data_port,
            server_host = %config.server_host,
            server_port = config.server_port,
            recv_buffer_size = ?config.recv_buffer_size,
            "client starting"
        );

        let store = SharedParticleStore::new();
        let shutdown_flag = Arc::new(AtomicBool::new(false));

        let data_socket = bind_data_socket(&config)?;
        let data_addr = data_socket.local_addr().map_err(ClientError::Bind)?;

        // Ephemeral local port; only heartbeats leave through it.
        let heartbeat_socket = UdpSocket::bind(Endpoint::any(0)).map_err(ClientError::Bind)?;

        debug!("spawning data thread");
        let mut rx = SnapshotReceiver::new(
            data_socket,
            store.clone(),
            Arc::clone(&shutdown_flag),
            config.poll_interval,
        );
        let data_handle = thread::Builder::new()
            .name("ptp-data".into())
            .spawn(move || {
                info!("data thread started");
                rx.run();
                info!("data thread exiting");
            })
            .expect("failed to spawn data thread");

        debug!("spawning heartbeat thread");
        let mut hb = HeartbeatSender::new(
            heartbeat_socket,
            config.server_host,
            config.server_port,
            store.clone(),
            Arc::clone(&shutdown_flag),
            config.heartbeat_ttl,
            config.poll_interval,
        );
        let heartbeat_handle = thread::Builder::new()
            .name("ptp-heartbeat".into())
            .spawn(move || {
                info!("heartbeat thread started");
                hb.run();
                info!("heartbeat thread exiting");
            })
            .expect("failed to spawn heartbeat thread");

        info!(data_addr = %data_addr, "client started successfully");

        Ok(Self {
            shutdown_flag,
            data_handle: Some(data_handle),
            heartbeat_handle: Some(heartbeat_handle),
            store,
            data_addr,
        })
    }

    /// Initiates shutdown and waits for both threads to exit.
    ///
    /// After this returns, no further store writes occur; the renderer
    /// may keep reading the final (stale but consistent) state through
    /// any handle it still holds.
    pub fn shutdown(mut self) {
        info!("client shutdown initiated");
        self.shutdown_flag.store(true, Ordering::Relaxed);

        if let Some(handle) = self.data_handle.take() {
            debug!("waiting for data thread to exit");
            let _ = handle.join();
        }
        if let Some(handle) = self.heartbeat_handle.take() {
            debug!("waiting for heartbeat thread to exit");
            let _ = handle.join();
        }

        info!("client shutdown complete");
    }

    /// Returns a handle to the shared store for the renderer.
    #[must_use]
    pub fn store(&self) -> SharedParticleStore {
        self.store.clone()
    }

    /// Actual bound address of the data socket (relevant when the config
    /// requested port 0).
    #[must_use]
    pub fn data_addr(&self) -> Endpoint {
        self.data_addr
    }

    /// Returns a clone of the shutdown token for external signal handling.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_flag)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Signal shutdown if not already done; threads notice within one
        // poll interval and close their sockets on exit.
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }
}

/// Binds the reuse-enabled data socket and applies the optional receive
/// buffer override (best-effort; failure is logged, not fatal).
fn bind_data_socket(config: &ClientConfig) -> Result<UdpSocket, ClientError> {
    use std::net::ToSocketAddrs;

    let addr = (config.data_host.as_str(), config.data_port)
        .to_socket_addrs()
        .map_err(|source| ClientError::Resolve {
            host: config.data_host.clone(),
            port: config.data_port,
            source,
        })?
        .next()
        .ok_or_else(|| ClientError::Resolve {
            host: config.data_host.clone(),
            port: config.data_port,
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
        })?;

    let socket = UdpSocket::bind_reuse(Endpoint::from(addr)).map_err(|e| {
        error!(addr = %addr, error = %e, "failed to bind data socket");
        ClientError::Bind(e)
    })?;

    if let Some(size) = config.recv_buffer_size {
        if let Err(e) = socket.set_recv_buffer_size(size) {
            warn!(requested = size, error = %e, "could not set receive buffer size");
        }
    }
    match socket.recv_buffer_size() {
        Ok(actual) => debug!(actual, "data socket receive buffer size"),
        Err(e) => debug!(error = %e, "could not read receive buffer size"),
    }

    Ok(socket)
}

/// Whether an I/O error reports a closed file descriptor (`EBADF`), the
/// signal that the socket was deliberately closed by its owner.
pub(crate) fn is_closed_descriptor(e: &io::Error) -> bool {
    e.raw_os_error() == Some(rustix::io::Errno::BADF.raw_os_error())
}
