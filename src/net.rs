//! Network transport primitives.
//!
//! Provides the non-blocking UDP socket abstractions used by the client's
//! heartbeat and snapshot-receiver threads.

pub mod endpoint;
pub mod socket;

pub use endpoint::Endpoint;
pub use socket::UdpSocket;
