//! Heartbeat sender runtime.
//!
//! Responsibilities:
//! - Resolve the server address once at thread start.
//! - Send one heartbeat datagram whenever the TTL has elapsed since the
//!   last attempt; the server stops streaming to clients it hasn't heard
//!   from within its liveness window.
//! - Drain and discard anything addressed to the heartbeat socket; a
//!   closed descriptor there is honored as a legacy shutdown signal.

use std::io::ErrorKind;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use minstant::Instant;

use crate::net::{Endpoint, UdpSocket};
use crate::protocol::{HEARTBEAT_PACKET_SIZE, encode_heartbeat};
use crate::store::SharedParticleStore;
use crate::trace::{error, info, trace, warn};

use super::is_closed_descriptor;

/// TTL-elapsed bookkeeping for heartbeat pacing.
///
/// Timing advances on every attempt, successful or not, so a failing
/// send is retried on the next TTL expiry instead of every tick.
#[derive(Debug)]
pub struct HeartbeatTimer {
    ttl: Duration,
    last_send: Option<Instant>,
}

impl HeartbeatTimer {
    /// Creates a timer that is immediately due.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last_send: None,
        }
    }

    /// Whether a heartbeat is due at `now`.
    #[must_use]
    pub fn should_send(&self, now: Instant) -> bool {
        match self.last_send {
            None => true,
            Some(at) => now.duration_since(at) >= self.ttl,
        }
    }

    /// Records a send attempt at `now`.
    pub fn mark_sent(&mut self, now: Instant) {
        self.last_send = Some(now);
    }
}

/// Heartbeat thread state and event loop.
pub struct HeartbeatSender {
    /// Socket the heartbeats leave through; bound ephemeral, never read
    /// for data.
    socket: UdpSocket,
    /// Server hostname, resolved once inside [`run`](Self::run).
    server_host: String,
    server_port: u16,
    store: SharedParticleStore,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
    timer: HeartbeatTimer,
}

impl HeartbeatSender {
    pub fn new(
        socket: UdpSocket,
        server_host: String,
        server_port: u16,
        store: SharedParticleStore,
        shutdown: Arc<AtomicBool>,
        ttl: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            socket,
            server_host,
            server_port,
            store,
            shutdown,
            poll_interval,
            timer: HeartbeatTimer::new(ttl),
        }
    }

    /// Runs the heartbeat loop until shutdown.
    ///
    /// Hostname resolution failure is fatal to this unit only: the error
    /// is logged and the thread exits without touching the receiver.
    pub fn run(&mut self) {
        let server = match resolve(&self.server_host, self.server_port) {
            Ok(ep) => ep,
            Err(e) => {
                error!(
                    host = %self.server_host,
                    port = self.server_port,
                    error = %e,
                    "cannot resolve server address, heartbeat sender exiting"
                );
                return;
            }
        };
        info!(server = %server, "heartbeat sender started");

        let mut packet_buf = Vec::with_capacity(HEARTBEAT_PACKET_SIZE);

        while !self.shutdown.load(Ordering::Relaxed) {
            let now = Instant::now();
            if self.timer.should_send(now) {
                encode_heartbeat(&mut packet_buf);
                match self.socket.try_send_to(&packet_buf, server) {
                    Ok(Some(n)) if n > 0 => {
                        trace!(server = %server, bytes = n, "heartbeat sent");
                        self.store.write(|store| store.record_heartbeat());
                    }
                    Ok(_) => warn!(server = %server, "heartbeat send did not complete"),
                    Err(e) => warn!(server = %server, error = %e, "heartbeat send failed"),
                }
                self.timer.mark_sent(now);
            }

            if self.drain_socket() {
                break;
            }

            thread::sleep(self.poll_interval);
        }

        info!("heartbeat sender exiting");
    }

    /// Discards any inbound data on the heartbeat socket.
    ///
    /// Returns `true` if the socket was closed out from under us.
    fn drain_socket(&mut self) -> bool {
        let mut discard_buf = [0u8; 64];
        match self.socket.try_recv_from(&mut discard_buf) {
            Ok(_) => false,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => false,
            Err(ref e) if is_closed_descriptor(e) => {
                info!("heartbeat socket closed, stopping");
                true
            }
            Err(e) => {
                warn!(error = %e, "heartbeat socket receive error");
                false
            }
        }
    }
}

fn resolve(host: &str, port: u16) -> std::io::Result<Endpoint> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .map(Endpoint::from)
        .ok_or_else(|| {
            std::io::Error::new(
                ErrorKind::NotFound,
                format!("no addresses for {host}:{port}"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_sends_once_per_ttl_window() {
        let mut timer = HeartbeatTimer::new(Duration::from_secs(1));
        let t0 = Instant::now();

        // Fresh timer is immediately due.
        assert!(timer.should_send(t0));
        timer.mark_sent(t0);

        // Two check ticks 0.2s apart: elapsed < TTL, so only the first
        // send across both ticks.
        assert!(!timer.should_send(t0 + Duration::from_millis(200)));
        assert!(!timer.should_send(t0 + Duration::from_millis(400)));

        // Due again once the TTL has fully elapsed.
        assert!(timer.should_send(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn timer_advances_on_attempt_not_success() {
        let mut timer = HeartbeatTimer::new(Duration::from_secs(1));
        let t0 = Instant::now();
        timer.mark_sent(t0);
        // A failed attempt still pushed the next send a full TTL out.
        assert!(!timer.should_send(t0 + Duration::from_millis(999)));
    }

    #[test]
    fn resolve_localhost() {
        let ep = resolve("127.0.0.1", 50001).expect("resolve");
        assert_eq!(ep.port(), 50001);
    }
}
