//! Live-telemetry ingestion client for the particle transport protocol (PTP).
//!
//! A simulation server streams fixed-layout UDP snapshot packets describing
//! a 3-D particle field; this crate receives them, maintains the latest
//! known state of every particle in a lock-guarded store, and keeps the
//! server's liveness timer alive with periodic heartbeat datagrams.
//! Rendering and configuration parsing are external collaborators: a
//! renderer polls the store read-only, and a config/CLI layer supplies
//! [`ClientConfig`].
//!
//! Delivery is deliberately best-effort: no queues, no retransmission, no
//! history. Excess packets overwrite prior state, so the store always
//! exposes latest-state-wins data.
//!
//! # Example
//!
//! ```ignore
//! use ptp_client::{Client, ClientConfig};
//!
//! let client = Client::spawn(ClientConfig::default())?;
//! let store = client.store();
//!
//! // ... render loop polls `store.read(...)` ...
//!
//! client.shutdown();
//! ```

pub mod net;
pub mod protocol;
pub mod runtime;
pub mod store;
mod trace;

pub use runtime::{Client, ClientConfig, ClientError};
pub use store::{ParticleRecord, ParticleStore, SharedParticleStore};
pub use trace::init_tracing;
