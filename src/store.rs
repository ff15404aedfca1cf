//! Shared particle data model.
//!
//! [`ParticleStore`] holds the latest known state of every particle in the
//! simulated field plus session-level counters. The snapshot receiver is
//! the single writer; the renderer polls it read-only through
//! [`SharedParticleStore`] under the same lock.
//!
//! There is no history and no queue: a newer packet simply overwrites the
//! ids it names, so the store always exposes latest-state-wins data.

use std::collections::TryReserveError;
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use thiserror::Error;

use crate::protocol::SnapshotPacket;
use crate::trace::{debug, warn};

/// Sentinel coordinate marking a particle that no packet has named yet.
pub const UNDEFINED_POSITION: f32 = -1.0;

/// Errors mutating the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Allocating the per-particle arrays for a resize failed.
    #[error("failed to allocate arrays for {count} particles: {source}")]
    Allocation {
        count: u32,
        source: TryReserveError,
    },
}

/// Latest known state of one particle. Identity is the array index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleRecord {
    /// World-space position, or [`UNDEFINED_POSITION`] on every axis.
    pub position: [f32; 3],
    /// Classification tag from the last update.
    pub particle_type: u16,
    /// Simulation timestamp at which this record was last written.
    pub last_update_time: f32,
}

impl ParticleRecord {
    const UNDEFINED: Self = Self {
        position: [UNDEFINED_POSITION; 3],
        particle_type: 0,
        last_update_time: 0.0,
    };

    /// Whether any packet has ever carried this particle.
    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.position[0] != UNDEFINED_POSITION
    }
}

/// The client's view of the particle field and session counters.
///
/// Constructed by the supervisor and shared through
/// [`SharedParticleStore`]; never a global.
#[derive(Debug)]
pub struct ParticleStore {
    /// Field cardinality as last declared by the server.
    total_particle_count: u32,
    /// One record per particle id, length `total_particle_count`.
    particles: Vec<ParticleRecord>,
    /// High-water mark of simulation time across all applied packets.
    most_recent_timestamp: f32,
    /// Number of distinct increases of `most_recent_timestamp`.
    total_timesteps: u64,
    world_origin: [f32; 3],
    world_size: [f32; 3],
    /// Midpoint of the world box with the protocol's Y/Z axes swapped.
    rotation_center: [f32; 3],
    packets_received: u64,
    heartbeats_sent: u64,
}

impl Default for ParticleStore {
    fn default() -> Self {
        Self {
            total_particle_count: 0,
            particles: Vec::new(),
            // Seeded below any real timestamp so the first packet always
            // registers a timestep, including one at t = 0.
            most_recent_timestamp: f32::NEG_INFINITY,
            total_timesteps: 0,
            world_origin: [0.0; 3],
            world_size: [0.0; 3],
            rotation_center: [0.0; 3],
            packets_received: 0,
            heartbeats_sent: 0,
        }
    }
}

impl ParticleStore {
    /// Creates an empty store; the first applied packet sizes it.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one decoded snapshot packet.
    ///
    /// Idempotent per id (last writer wins) and order-tolerant: a stale
    /// packet still updates the ids it names but never lowers the
    /// timestamp high-water mark. A packet declaring a new field size
    /// replaces the particle arrays wholesale; every id not named by a
    /// packet since then reads as undefined.
    ///
    /// Records whose id is out of range are discarded.
    ///
    /// # Errors
    /// Returns [`StoreError::Allocation`] if a resize cannot allocate the
    /// new arrays. The store stays consistent: counters are already
    /// updated, the old arrays are kept.
    pub fn apply_snapshot(&mut self, packet: &SnapshotPacket) -> Result<(), StoreError> {
        if packet.simulation_time > self.most_recent_timestamp {
            self.most_recent_timestamp = packet.simulation_time;
            self.total_timesteps += 1;
        }
        self.packets_received += 1;

        if packet.total_particle_count != self.total_particle_count {
            self.resize(packet)?;
            self.total_particle_count = packet.total_particle_count;
        }

        for update in &packet.updates {
            let Some(record) = self.particles.get_mut(update.id as usize) else {
                warn!(
                    id = update.id,
                    total = self.total_particle_count,
                    "snapshot names out-of-range particle id, discarding record"
                );
                continue;
            };
            record.position = update.position;
            record.particle_type = update.particle_type;
            record.last_update_time = packet.simulation_time;
        }

        Ok(())
    }

    /// Replaces the particle arrays for a new field size and captures the
    /// world bounds. `rotation_center` is derived here, once per resize.
    fn resize(&mut self, packet: &SnapshotPacket) -> Result<(), StoreError> {
        let count = packet.total_particle_count;
        debug!(
            old = self.total_particle_count,
            new = count,
            "particle count changed, reallocating arrays"
        );

        let mut particles = Vec::new();
        particles
            .try_reserve_exact(count as usize)
            .map_err(|source| StoreError::Allocation { count, source })?;
        particles.resize(count as usize, ParticleRecord::UNDEFINED);
        self.particles = particles;

        self.world_origin = packet.world_origin;
        self.world_size = packet.world_size;
        // Y and Z swapped per the protocol's up-axis convention.
        self.rotation_center = [
            self.world_origin[0] + self.world_size[0] / 2.0,
            self.world_origin[2] + self.world_size[2] / 2.0,
            self.world_origin[1] + self.world_size[1] / 2.0,
        ];
        Ok(())
    }

    /// Counts one heartbeat actually handed to the OS.
    pub fn record_heartbeat(&mut self) {
        self.heartbeats_sent += 1;
    }

    /// Latest state of every particle, indexed by id.
    #[must_use]
    pub fn particles(&self) -> &[ParticleRecord] {
        &self.particles
    }

    /// Field cardinality as last declared by the server.
    #[must_use]
    pub fn total_particle_count(&self) -> u32 {
        self.total_particle_count
    }

    /// High-water mark of simulation time; `-inf` before the first packet.
    #[must_use]
    pub fn most_recent_timestamp(&self) -> f32 {
        self.most_recent_timestamp
    }

    /// Number of distinct simulation timesteps observed.
    #[must_use]
    pub fn total_timesteps(&self) -> u64 {
        self.total_timesteps
    }

    /// Origin of the simulated domain, captured at the last resize.
    #[must_use]
    pub fn world_origin(&self) -> [f32; 3] {
        self.world_origin
    }

    /// Extent of the simulated domain, captured at the last resize.
    #[must_use]
    pub fn world_size(&self) -> [f32; 3] {
        self.world_size
    }

    /// Center of rotation for the renderer's camera.
    #[must_use]
    pub fn rotation_center(&self) -> [f32; 3] {
        self.rotation_center
    }

    /// Snapshot packets applied this session.
    #[must_use]
    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    /// Heartbeats sent this session.
    #[must_use]
    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent
    }
}

/// Clonable, lock-guarded handle to the session's [`ParticleStore`].
///
/// The receiver thread writes through [`write`](Self::write); the renderer
/// and the heartbeat thread use the same lock. Writes take a `try_lock`
/// fast path and fall back to a blocking acquisition, so ingestion is
/// never starved by a polling reader and never busy-waits.
#[derive(Debug, Clone, Default)]
pub struct SharedParticleStore {
    inner: Arc<Mutex<ParticleStore>>,
}

impl SharedParticleStore {
    /// Creates a handle around an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with exclusive access to the store.
    ///
    /// Lock poisoning is recovered: a reader that panicked while holding
    /// the lock must not wedge ingestion for the rest of the session.
    pub fn write<R>(&self, f: impl FnOnce(&mut ParticleStore) -> R) -> R {
        let mut guard = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                self.inner.lock().unwrap_or_else(PoisonError::into_inner)
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Runs `f` with shared read access to the store.
    ///
    /// This is the renderer-facing view: particle arrays, counters and
    /// world bounds, consistent under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&ParticleStore) -> R) -> R {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }
}
