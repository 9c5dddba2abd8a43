//! Position report codec.
//!
//! # Packet Format
//!
//! Fixed 22 bytes, little-endian:
//!
//! ```text
//! +---------+---------+----------+----------+-------+------------+-------------+------+-----------+
//! | version |  flags  |  lat_e7  |  lon_e7  | alt_m | speed_dmps | course_cdeg | sats | timestamp |
//! |   1B    |   2B    | 4B (i32) | 4B (i32) | 2B i16|     2B     |     2B      |  1B  |    4B     |
//! +---------+---------+----------+----------+-------+------------+-------------+------+-----------+
//! ```
//!
//! Flags only describe which optional fields the sender populated. The codec
//! writes and reads every field regardless of flag state.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::wire::WireReader;
use crate::WireError;

/// Only accepted position report version.
pub const POSITION_VERSION: u8 = 1;

/// Encoded size of a position report.
pub const POSITION_WIRE_SIZE: usize = 22;

bitflags! {
    /// Presence bits for the optional position fields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PositionFlags: u16 {
        const HAS_ALTITUDE = 1 << 0;
        const HAS_SPEED = 1 << 1;
        const HAS_COURSE = 1 << 2;
        const HAS_SATS_IN_VIEW = 1 << 3;
    }
}

impl Default for PositionFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// A single point-in-time position report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionMessage {
    pub flags: PositionFlags,
    /// Latitude in 1e-7 degrees.
    pub lat_e7: i32,
    /// Longitude in 1e-7 degrees.
    pub lon_e7: i32,
    /// Altitude in meters.
    pub alt_m: i16,
    /// Ground speed in decimeters per second.
    pub speed_dmps: u16,
    /// Course over ground in centidegrees.
    pub course_cdeg: u16,
    pub sats_in_view: u8,
    /// Fix time, seconds.
    pub timestamp: u32,
}

impl PositionMessage {
    pub fn has_altitude(&self) -> bool {
        self.flags.contains(PositionFlags::HAS_ALTITUDE)
    }

    pub fn has_speed(&self) -> bool {
        self.flags.contains(PositionFlags::HAS_SPEED)
    }

    pub fn has_course(&self) -> bool {
        self.flags.contains(PositionFlags::HAS_COURSE)
    }

    pub fn has_sats_in_view(&self) -> bool {
        self.flags.contains(PositionFlags::HAS_SATS_IN_VIEW)
    }

    pub fn latitude_deg(&self) -> f64 {
        f64::from(self.lat_e7) / 1e7
    }

    pub fn longitude_deg(&self) -> f64 {
        f64::from(self.lon_e7) / 1e7
    }
}

fn put_position<B: BufMut>(msg: &PositionMessage, buf: &mut B) {
    buf.put_u8(POSITION_VERSION);
    buf.put_u16_le(msg.flags.bits());
    buf.put_i32_le(msg.lat_e7);
    buf.put_i32_le(msg.lon_e7);
    buf.put_i16_le(msg.alt_m);
    buf.put_u16_le(msg.speed_dmps);
    buf.put_u16_le(msg.course_cdeg);
    buf.put_u8(msg.sats_in_view);
    buf.put_u32_le(msg.timestamp);
}

/// Encodes a position report into a fresh 22-byte buffer.
pub fn encode_position(msg: &PositionMessage) -> Bytes {
    let mut buf = BytesMut::with_capacity(POSITION_WIRE_SIZE);
    put_position(msg, &mut buf);
    buf.freeze()
}

/// Encodes a position report into `out`, returning the number of bytes
/// written. Nothing is written if `out` is too small.
pub fn encode_position_into(msg: &PositionMessage, out: &mut [u8]) -> Result<usize, WireError> {
    if out.len() < POSITION_WIRE_SIZE {
        return Err(WireError::BufferTooSmall {
            needed: POSITION_WIRE_SIZE,
            actual: out.len(),
        });
    }

    let mut dst = &mut out[..POSITION_WIRE_SIZE];
    put_position(msg, &mut dst);
    Ok(POSITION_WIRE_SIZE)
}

/// Decodes a position report.
///
/// Bytes past the 22-byte frame are ignored.
pub fn decode_position(buf: &[u8]) -> Result<PositionMessage, WireError> {
    if buf.len() < POSITION_WIRE_SIZE {
        tracing::trace!(len = buf.len(), "rejecting short position report");
        return Err(WireError::TooShort {
            needed: POSITION_WIRE_SIZE,
            actual: buf.len(),
        });
    }

    let mut reader = WireReader::new(&buf[..POSITION_WIRE_SIZE]);
    reader.version(POSITION_VERSION)?;

    Ok(PositionMessage {
        flags: PositionFlags::from_bits_retain(reader.u16_le("flags")?),
        lat_e7: reader.i32_le("lat_e7")?,
        lon_e7: reader.i32_le("lon_e7")?,
        alt_m: reader.i16_le("alt_m")?,
        speed_dmps: reader.u16_le("speed_dmps")?,
        course_cdeg: reader.u16_le("course_cdeg")?,
        sats_in_view: reader.u8("sats_in_view")?,
        timestamp: reader.u32_le("timestamp")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PositionMessage {
        PositionMessage {
            flags: PositionFlags::HAS_ALTITUDE | PositionFlags::HAS_SATS_IN_VIEW,
            lat_e7: 473_977_420,
            lon_e7: -1_222_345_678,
            alt_m: -12,
            speed_dmps: 153,
            course_cdeg: 27_000,
            sats_in_view: 9,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_position_roundtrip() {
        let msg = sample();
        let encoded = encode_position(&msg);
        assert_eq!(encoded.len(), POSITION_WIRE_SIZE);
        assert_eq!(decode_position(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_field_offsets() {
        let encoded = encode_position(&sample());

        assert_eq!(encoded[0], POSITION_VERSION);
        assert_eq!(&encoded[1..3], &[0x09, 0x00]);
        assert_eq!(&encoded[3..7], &473_977_420i32.to_le_bytes());
        assert_eq!(&encoded[7..11], &(-1_222_345_678i32).to_le_bytes());
        // alt_m = -12 in two's complement
        assert_eq!(&encoded[11..13], &[0xF4, 0xFF]);
        assert_eq!(&encoded[13..15], &153u16.to_le_bytes());
        assert_eq!(&encoded[15..17], &27_000u16.to_le_bytes());
        assert_eq!(encoded[17], 9);
        assert_eq!(&encoded[18..22], &1_700_000_000u32.to_le_bytes());
    }

    #[test]
    fn test_decode_one_byte_short() {
        let encoded = encode_position(&sample());
        assert_eq!(
            decode_position(&encoded[..POSITION_WIRE_SIZE - 1]),
            Err(WireError::TooShort {
                needed: 22,
                actual: 21
            })
        );
    }

    #[test]
    fn test_decode_wrong_version() {
        let mut encoded = encode_position(&sample()).to_vec();
        encoded[0] = POSITION_VERSION + 1;
        assert!(matches!(
            decode_position(&encoded),
            Err(WireError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_decode_ignores_bytes_after_frame() {
        let mut encoded = encode_position(&sample()).to_vec();
        encoded.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(decode_position(&encoded).unwrap(), sample());
    }

    #[test]
    fn test_flags_do_not_gate_fields() {
        let msg = PositionMessage {
            flags: PositionFlags::empty(),
            ..sample()
        };
        let decoded = decode_position(&encode_position(&msg)).unwrap();

        assert!(!decoded.has_altitude());
        assert_eq!(decoded.alt_m, -12);
        assert_eq!(decoded.sats_in_view, 9);
    }

    #[test]
    fn test_unknown_flag_bits_survive() {
        let msg = PositionMessage {
            flags: PositionFlags::from_bits_retain(0x8001),
            ..sample()
        };
        let decoded = decode_position(&encode_position(&msg)).unwrap();
        assert_eq!(decoded.flags.bits(), 0x8001);
        assert!(decoded.has_altitude());
    }

    #[test]
    fn test_encode_into_small_buffer() {
        let mut out = [0u8; POSITION_WIRE_SIZE - 1];
        assert!(matches!(
            encode_position_into(&sample(), &mut out),
            Err(WireError::BufferTooSmall { .. })
        ));
        assert_eq!(out, [0u8; POSITION_WIRE_SIZE - 1]);
    }

    #[test]
    fn test_encode_into_matches_encode() {
        let mut out = [0u8; 32];
        let len = encode_position_into(&sample(), &mut out).unwrap();
        assert_eq!(&out[..len], &encode_position(&sample())[..]);
        assert_eq!(&out[len..], &[0u8; 10]);
    }

    #[test]
    fn test_degree_accessors() {
        let msg = sample();
        assert!((msg.latitude_deg() - 47.397742).abs() < 1e-9);
        assert!((msg.longitude_deg() + 122.2345678).abs() < 1e-9);
    }
}
