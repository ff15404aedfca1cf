//! Snapshot receiver runtime.
//!
//! Responsibilities:
//! - Poll the data socket without blocking so the loop stays responsive
//!   to shutdown within one poll interval.
//! - Accept only exact-size snapshot datagrams, decode them, and apply
//!   them to the shared store under its lock.
//! - Triage transport errors: transient ones are tolerated, a closed or
//!   invalid descriptor terminates the loop.

use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::net::{Endpoint, UdpSocket};
use crate::protocol::{SNAPSHOT_PACKET_SIZE, decode_snapshot};
use crate::store::SharedParticleStore;
use crate::trace::{debug, error, info, trace, warn};

use super::is_closed_descriptor;

/// Maximum UDP datagram size we'll receive.
///
/// Larger than [`SNAPSHOT_PACKET_SIZE`] on purpose: an oversized datagram
/// must arrive untruncated so the exact-size gate can reject it.
const MAX_DATAGRAM_SIZE: usize = 65535;

/// Receiver thread state and event loop.
pub struct SnapshotReceiver {
    /// Bound, reuse-enabled, non-blocking data socket.
    socket: UdpSocket,
    store: SharedParticleStore,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
    /// Reusable buffer for receiving datagrams.
    recv_buf: Vec<u8>,
}

impl SnapshotReceiver {
    pub fn new(
        socket: UdpSocket,
        store: SharedParticleStore,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            socket,
            store,
            shutdown,
            poll_interval,
            recv_buf: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// Runs the ingest loop until shutdown.
    ///
    /// Terminates on: the shutdown token, a zero-length datagram (peer
    /// closed), a closed or invalid descriptor, or an allocation failure
    /// during a store resize. Everything else is logged and survived.
    pub fn run(&mut self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.socket.try_recv_from(&mut self.recv_buf) {
                Ok(Some((len, from))) => {
                    if self.handle_datagram(len, from) {
                        break;
                    }
                }
                Ok(None) => {
                    // No data available; idle briefly instead of spinning.
                    thread::sleep(self.poll_interval);
                }
                Err(e) => {
                    if self.handle_recv_error(&e) {
                        break;
                    }
                    // A tolerated error is a no-work iteration too; pause
                    // so a persistently failing socket cannot busy-spin.
                    thread::sleep(self.poll_interval);
                }
            }
        }
        info!("snapshot receiver exiting");
    }

    /// Processes one received datagram. Returns `true` to stop the loop.
    fn handle_datagram(&mut self, len: usize, from: Endpoint) -> bool {
        if len == 0 {
            info!(from = %from, "transport closed by peer, stopping");
            return true;
        }
        if len != SNAPSHOT_PACKET_SIZE {
            debug!(
                from = %from,
                len,
                expected = SNAPSHOT_PACKET_SIZE,
                "discarding datagram of unexpected size"
            );
            return false;
        }

        let packet = match decode_snapshot(&self.recv_buf[..len]) {
            Ok(p) => p,
            Err(e) => {
                warn!(from = %from, error = %e, "discarding malformed snapshot");
                return false;
            }
        };

        trace!(
            from = %from,
            t = packet.simulation_time,
            total = packet.total_particle_count,
            count = packet.updates.len(),
            "applying snapshot"
        );

        match self.store.write(|store| store.apply_snapshot(&packet)) {
            Ok(()) => false,
            Err(e) => {
                // Old arrays are intact; stop rather than ingest into a
                // field the store could not size.
                error!(error = %e, "store resize failed, stopping ingestion");
                true
            }
        }
    }

    /// Triages a receive error. Returns `true` to stop the loop.
    fn handle_recv_error(&self, e: &io::Error) -> bool {
        if e.kind() == ErrorKind::Interrupted {
            return false;
        }
        if is_closed_descriptor(e) {
            info!("data socket closed, stopping");
            return true;
        }
        if e.kind() == ErrorKind::InvalidInput {
            warn!(error = %e, "invalid receive argument, stopping");
            return true;
        }
        warn!(error = %e, "transient receive error");
        false
    }
}
