//! UDP socket wrapper for mio-based I/O.
//!
//! Provides a thin wrapper around [`mio::net::UdpSocket`] with ergonomic
//! non-blocking send/recv APIs and the socket options the snapshot
//! receiver needs (address/port reuse, receive-buffer sizing).

use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::os::fd::{AsFd, BorrowedFd};

use mio::net::UdpSocket as MioUdpSocket;
use rustix::net::{AddressFamily, SocketType};

use super::Endpoint;

/// A non-blocking UDP socket.
///
/// Wraps a mio UDP socket and provides methods for sending and receiving
/// datagrams. The socket is always non-blocking; `WouldBlock` is surfaced
/// as `Ok(None)` through the `try_` variants.
pub struct UdpSocket {
    inner: MioUdpSocket,
}

impl UdpSocket {
    /// Creates a new UDP socket bound to the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound (e.g., address in use).
    pub fn bind(endpoint: Endpoint) -> io::Result<Self> {
        let inner = MioUdpSocket::bind(endpoint.into())?;
        Ok(Self { inner })
    }

    /// Creates a UDP socket with `SO_REUSEADDR`/`SO_REUSEPORT` enabled
    /// before binding to the given endpoint.
    ///
    /// The reuse options must be set on the raw descriptor before `bind`,
    /// so the socket is built through rustix and then handed to mio.
    ///
    /// # Errors
    ///
    /// Returns an error if socket creation, option setup, or bind fails.
    pub fn bind_reuse(endpoint: Endpoint) -> io::Result<Self> {
        let family = match endpoint.as_socket_addr() {
            SocketAddr::V4(_) => AddressFamily::INET,
            SocketAddr::V6(_) => AddressFamily::INET6,
        };
        let fd = rustix::net::socket(family, SocketType::DGRAM, None)?;
        rustix::net::sockopt::set_socket_reuseaddr(&fd, true)?;
        #[cfg(not(target_os = "windows"))]
        rustix::net::sockopt::set_socket_reuseport(&fd, true)?;
        match endpoint.as_socket_addr() {
            SocketAddr::V4(addr) => rustix::net::bind_v4(&fd, &addr)?,
            SocketAddr::V6(addr) => rustix::net::bind_v6(&fd, &addr)?,
        }

        let socket = std::net::UdpSocket::from(fd);
        socket.set_nonblocking(true)?;
        Ok(Self {
            inner: MioUdpSocket::from_std(socket),
        })
    }

    /// Returns the local address this socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be retrieved.
    pub fn local_addr(&self) -> io::Result<Endpoint> {
        self.inner.local_addr().map(Endpoint::from)
    }

    /// Sends a datagram to the specified endpoint.
    ///
    /// Returns the number of bytes sent, or `WouldBlock` if the socket
    /// is not ready for writing.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if the socket would block.
    pub fn send_to(&self, buf: &[u8], dest: Endpoint) -> io::Result<usize> {
        self.inner.send_to(buf, dest.into())
    }

    /// Receives a datagram from the socket.
    ///
    /// Returns the number of bytes received and the source endpoint,
    /// or `WouldBlock` if no data is available.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if the socket would block.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Endpoint)> {
        self.inner
            .recv_from(buf)
            .map(|(n, addr)| (n, Endpoint::from(addr)))
    }

    /// Attempts to send, returning `Ok(None)` instead of `WouldBlock`.
    ///
    /// Useful in polling loops where `WouldBlock` is expected.
    pub fn try_send_to(&self, buf: &[u8], dest: Endpoint) -> io::Result<Option<usize>> {
        match self.send_to(buf, dest) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Attempts to receive, returning `Ok(None)` instead of `WouldBlock`.
    ///
    /// Useful in polling loops where `WouldBlock` is expected.
    pub fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, Endpoint)>> {
        match self.recv_from(buf) {
            Ok((n, ep)) => Ok(Some((n, ep))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Sets the socket's receive buffer size.
    ///
    /// # Errors
    ///
    /// Returns an error if the option cannot be set.
    pub fn set_recv_buffer_size(&self, size: usize) -> io::Result<()> {
        // Use rustix for socket options since mio doesn't expose them directly
        let fd = self.inner.as_fd();
        rustix::net::sockopt::set_socket_recv_buffer_size(fd, size)?;
        Ok(())
    }

    /// Gets the socket's receive buffer size.
    ///
    /// # Errors
    ///
    /// Returns an error if the option cannot be retrieved.
    pub fn recv_buffer_size(&self) -> io::Result<usize> {
        let fd = self.inner.as_fd();
        Ok(rustix::net::sockopt::get_socket_recv_buffer_size(fd)?)
    }
}

impl AsFd for UdpSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_recv_on_empty_socket_returns_none() {
        let socket = UdpSocket::bind(Endpoint::localhost(0)).expect("bind");
        let mut buf = [0u8; 64];
        assert!(matches!(socket.try_recv_from(&mut buf), Ok(None)));
    }

    #[test]
    fn datagram_roundtrip_on_localhost() {
        let rx = UdpSocket::bind(Endpoint::localhost(0)).expect("bind rx");
        let tx = UdpSocket::bind(Endpoint::localhost(0)).expect("bind tx");
        let dest = rx.local_addr().expect("local addr");

        tx.send_to(b"ping", dest).expect("send");

        let mut buf = [0u8; 64];
        // Non-blocking receive; give the loopback a moment.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
        loop {
            match rx.try_recv_from(&mut buf).expect("recv") {
                Some((len, _from)) => {
                    assert_eq!(&buf[..len], b"ping");
                    break;
                }
                None => {
                    assert!(std::time::Instant::now() < deadline, "timed out");
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
            }
        }
    }

    #[test]
    fn reuse_bind_allows_rebinding_same_port() {
        let first = UdpSocket::bind_reuse(Endpoint::localhost(0)).expect("first bind");
        let addr = first.local_addr().expect("local addr");
        let _second = UdpSocket::bind_reuse(addr).expect("second bind on same port");
    }

    #[test]
    fn recv_buffer_size_is_adjustable() {
        let socket = UdpSocket::bind_reuse(Endpoint::localhost(0)).expect("bind");
        socket.set_recv_buffer_size(1 << 16).expect("set rcvbuf");
        // Kernels round the value (Linux doubles it); just check it took.
        assert!(socket.recv_buffer_size().expect("get rcvbuf") >= 1 << 16);
    }
}
