//! Wire codec for the particle transport protocol (PTP).
//!
//! ## Wire Format
//!
//! All multi-byte fields are little-endian. Both datagrams are fixed-size;
//! the transport accepts a snapshot only when the received length equals
//! [`SNAPSHOT_PACKET_SIZE`] exactly.
//!
//! | Datagram  | Layout |
//! |-----------|--------|
//! | Snapshot  | `[total:4][count:4][t:4][origin:12][size:12]` + [`PARTICLES_PER_PACKET`] record slots |
//! | Record    | `[id:4][x:4][y:4][z:4][type:2]` |
//! | Heartbeat | `[counter:4]` (reserved, always zero) |
//!
//! Record slots past `count` are zero padding. This pins one revision of a
//! protocol whose historical variants differed in endianness and position
//! width; peers must use the same revision.

use thiserror::Error;

/// Upper bound on the UDP payload both peers agree on.
pub const MAX_UDP_PAYLOAD: usize = 8192;

/// Snapshot header size in bytes: two u32 counts, f32 time, two 3-vectors.
pub const SNAPSHOT_HEADER_SIZE: usize = 36;

/// One particle record on the wire: u32 id, 3×f32 position, u16 type.
pub const PARTICLE_RECORD_SIZE: usize = 18;

/// Particle record capacity of one snapshot datagram.
///
/// A protocol constant derived from [`MAX_UDP_PAYLOAD`], not negotiated.
pub const PARTICLES_PER_PACKET: usize =
    (MAX_UDP_PAYLOAD - SNAPSHOT_HEADER_SIZE) / PARTICLE_RECORD_SIZE;

/// Fixed size of a snapshot datagram.
pub const SNAPSHOT_PACKET_SIZE: usize =
    SNAPSHOT_HEADER_SIZE + PARTICLES_PER_PACKET * PARTICLE_RECORD_SIZE;

/// Fixed size of a heartbeat datagram.
pub const HEARTBEAT_PACKET_SIZE: usize = 4;

/// Default port the client binds for snapshot reception.
pub const DEFAULT_CLIENT_PORT: u16 = 50000;

/// Default port the server listens on for heartbeats.
pub const DEFAULT_SERVER_PORT: u16 = 50001;

/// Errors during packet encode/decode.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Input length does not equal the fixed packet size.
    #[error("packet size mismatch: expected {expected} bytes, got {got}")]
    SizeMismatch { expected: usize, got: usize },
    /// Declared particle count exceeds the per-packet capacity.
    #[error("particle count {0} exceeds packet capacity {PARTICLES_PER_PACKET}")]
    CountExceedsCapacity(u32),
    /// Input buffer too short to decode a field.
    #[error("input buffer too small")]
    BufferTooSmall,
}

/// One particle's state as carried in a snapshot packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleUpdate {
    /// Stable particle id; index into the client's particle arrays.
    pub id: u32,
    /// World-space position.
    pub position: [f32; 3],
    /// Classification tag consumed by the renderer.
    pub particle_type: u16,
}

/// A decoded snapshot datagram: one (possibly partial) update of the
/// particle field for a simulation timestep.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPacket {
    /// Cardinality of the whole particle field as declared by the server.
    pub total_particle_count: u32,
    /// Simulation timestamp this packet belongs to.
    pub simulation_time: f32,
    /// Origin of the simulated domain's bounding box.
    pub world_origin: [f32; 3],
    /// Extent of the simulated domain's bounding box.
    pub world_size: [f32; 3],
    /// The particle records this packet carries (`particle_count` on the
    /// wire); at most [`PARTICLES_PER_PACKET`].
    pub updates: Vec<ParticleUpdate>,
}

/// Writer for encoding packets into a byte buffer.
struct PacketWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> PacketWriter<'a> {
    fn new(buf: &'a mut Vec<u8>) -> Self {
        buf.clear();
        Self { buf }
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_vec3(&mut self, v: [f32; 3]) {
        for component in v {
            self.put_f32(component);
        }
    }

    fn pad_to(&mut self, len: usize) {
        self.buf.resize(len, 0);
    }
}

/// Reader for decoding packets from a byte buffer.
struct PacketReader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> PacketReader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    fn take_u16(&mut self) -> Result<u16, CodecError> {
        if self.cursor + 2 > self.buf.len() {
            return Err(CodecError::BufferTooSmall);
        }
        let mut arr = [0u8; 2];
        arr.copy_from_slice(&self.buf[self.cursor..self.cursor + 2]);
        self.cursor += 2;
        Ok(u16::from_le_bytes(arr))
    }

    fn take_u32(&mut self) -> Result<u32, CodecError> {
        if self.cursor + 4 > self.buf.len() {
            return Err(CodecError::BufferTooSmall);
        }
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&self.buf[self.cursor..self.cursor + 4]);
        self.cursor += 4;
        Ok(u32::from_le_bytes(arr))
    }

    fn take_f32(&mut self) -> Result<f32, CodecError> {
        self.take_u32().map(f32::from_bits)
    }

    fn take_vec3(&mut self) -> Result<[f32; 3], CodecError> {
        Ok([self.take_f32()?, self.take_f32()?, self.take_f32()?])
    }
}

/// Encode a snapshot packet into `buf`, zero-padding unused record slots.
///
/// The counterpart of [`decode_snapshot`] for symmetric peers and tests.
/// Caller should reuse a preallocated `buf` to amortize the heap allocation
/// (`Vec::clear()` preserves capacity).
///
/// # Errors
/// Returns [`CodecError::CountExceedsCapacity`] if the packet carries more
/// than [`PARTICLES_PER_PACKET`] records.
pub fn encode_snapshot(packet: &SnapshotPacket, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    if packet.updates.len() > PARTICLES_PER_PACKET {
        return Err(CodecError::CountExceedsCapacity(packet.updates.len() as u32));
    }

    let mut w = PacketWriter::new(buf);
    w.put_u32(packet.total_particle_count);
    w.put_u32(packet.updates.len() as u32);
    w.put_f32(packet.simulation_time);
    w.put_vec3(packet.world_origin);
    w.put_vec3(packet.world_size);
    for update in &packet.updates {
        w.put_u32(update.id);
        w.put_vec3(update.position);
        w.put_u16(update.particle_type);
    }
    w.pad_to(SNAPSHOT_PACKET_SIZE);
    Ok(())
}

/// Decode a snapshot packet from `bytes`.
///
/// # Errors
/// - [`CodecError::SizeMismatch`] if `bytes` is not exactly
///   [`SNAPSHOT_PACKET_SIZE`] long
/// - [`CodecError::CountExceedsCapacity`] if the declared `particle_count`
///   exceeds [`PARTICLES_PER_PACKET`]
pub fn decode_snapshot(bytes: &[u8]) -> Result<SnapshotPacket, CodecError> {
    if bytes.len() != SNAPSHOT_PACKET_SIZE {
        return Err(CodecError::SizeMismatch {
            expected: SNAPSHOT_PACKET_SIZE,
            got: bytes.len(),
        });
    }

    let mut r = PacketReader::new(bytes);
    let total_particle_count = r.take_u32()?;
    let particle_count = r.take_u32()?;
    if particle_count as usize > PARTICLES_PER_PACKET {
        return Err(CodecError::CountExceedsCapacity(particle_count));
    }
    let simulation_time = r.take_f32()?;
    let world_origin = r.take_vec3()?;
    let world_size = r.take_vec3()?;

    let mut updates = Vec::with_capacity(particle_count as usize);
    for _ in 0..particle_count {
        updates.push(ParticleUpdate {
            id: r.take_u32()?,
            position: r.take_vec3()?,
            particle_type: r.take_u16()?,
        });
    }

    Ok(SnapshotPacket {
        total_particle_count,
        simulation_time,
        world_origin,
        world_size,
        updates,
    })
}

/// Encode a heartbeat datagram into `buf`.
///
/// The counter field is reserved and always zero on the wire.
pub fn encode_heartbeat(buf: &mut Vec<u8>) {
    let mut w = PacketWriter::new(buf);
    w.put_u32(0);
}

/// Decode a heartbeat datagram, returning its reserved counter field.
///
/// # Errors
/// Returns [`CodecError::SizeMismatch`] if `bytes` is not exactly
/// [`HEARTBEAT_PACKET_SIZE`] long.
pub fn decode_heartbeat(bytes: &[u8]) -> Result<u32, CodecError> {
    if bytes.len() != HEARTBEAT_PACKET_SIZE {
        return Err(CodecError::SizeMismatch {
            expected: HEARTBEAT_PACKET_SIZE,
            got: bytes.len(),
        });
    }
    PacketReader::new(bytes).take_u32()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> SnapshotPacket {
        SnapshotPacket {
            total_particle_count: 100,
            simulation_time: 1.5,
            world_origin: [0.0, -1.0, 0.5],
            world_size: [10.0, 20.0, 5.0],
            updates: vec![
                ParticleUpdate {
                    id: 5,
                    position: [1.0, 2.0, 3.0],
                    particle_type: 2,
                },
                ParticleUpdate {
                    id: 99,
                    position: [4.0, 5.0, 6.0],
                    particle_type: 0,
                },
            ],
        }
    }

    #[test]
    fn derived_sizes_are_consistent() {
        assert_eq!(PARTICLES_PER_PACKET, 453);
        assert_eq!(SNAPSHOT_PACKET_SIZE, 8190);
        assert!(SNAPSHOT_PACKET_SIZE <= MAX_UDP_PAYLOAD);
    }

    #[test]
    fn snapshot_roundtrip() {
        let packet = sample_packet();
        let mut buf = Vec::new();
        encode_snapshot(&packet, &mut buf).expect("encode");
        assert_eq!(buf.len(), SNAPSHOT_PACKET_SIZE);

        let decoded = decode_snapshot(&buf).expect("decode");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn snapshot_header_is_little_endian() {
        let packet = sample_packet();
        let mut buf = Vec::new();
        encode_snapshot(&packet, &mut buf).expect("encode");

        assert_eq!(&buf[0..4], &100u32.to_le_bytes());
        assert_eq!(&buf[4..8], &2u32.to_le_bytes());
        assert_eq!(&buf[8..12], &1.5f32.to_le_bytes());
    }

    #[test]
    fn undersized_input_is_rejected() {
        let err = decode_snapshot(&[0u8; SNAPSHOT_PACKET_SIZE - 1]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::SizeMismatch {
                expected: SNAPSHOT_PACKET_SIZE,
                got,
            } if got == SNAPSHOT_PACKET_SIZE - 1
        ));
    }

    #[test]
    fn oversized_count_is_rejected() {
        let mut buf = Vec::new();
        encode_snapshot(&sample_packet(), &mut buf).expect("encode");
        // Corrupt the count field past capacity.
        buf[4..8].copy_from_slice(&(PARTICLES_PER_PACKET as u32 + 1).to_le_bytes());

        let err = decode_snapshot(&buf).unwrap_err();
        assert!(matches!(err, CodecError::CountExceedsCapacity(_)));
    }

    #[test]
    fn encode_rejects_too_many_updates() {
        let mut packet = sample_packet();
        packet.updates = vec![
            ParticleUpdate {
                id: 0,
                position: [0.0; 3],
                particle_type: 0,
            };
            PARTICLES_PER_PACKET + 1
        ];
        let mut buf = Vec::new();
        let err = encode_snapshot(&packet, &mut buf).unwrap_err();
        assert!(matches!(err, CodecError::CountExceedsCapacity(_)));
    }

    #[test]
    fn unused_record_slots_are_zero_padding() {
        let mut buf = Vec::new();
        encode_snapshot(&sample_packet(), &mut buf).expect("encode");
        let body_used = SNAPSHOT_HEADER_SIZE + 2 * PARTICLE_RECORD_SIZE;
        assert!(buf[body_used..].iter().all(|&b| b == 0));
    }

    #[test]
    fn heartbeat_is_fixed_size_and_zeroed() {
        let mut buf = Vec::new();
        encode_heartbeat(&mut buf);
        assert_eq!(buf.len(), HEARTBEAT_PACKET_SIZE);
        assert_eq!(decode_heartbeat(&buf).expect("decode"), 0);
        assert!(decode_heartbeat(&buf[..2]).is_err());
    }
}
