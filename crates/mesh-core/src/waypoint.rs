//! Waypoint codec.
//!
//! # Packet Format
//!
//! ```text
//! +---------+-------+----+--------+--------+-----------+-----------+
//! | version | flags | id | lat_e7 | lon_e7 | expire_ts | locked_to |
//! |   1B    |  2B   | 4B |   4B   |   4B   |    4B     |    4B     |
//! +---------+-------+----+--------+--------+-----------+-----------+
//! | name_len (2B) | name | desc_len (2B) | desc | icon_len (2B) | icon |
//! +---------------+------+---------------+------+---------------+------+
//! ```
//!
//! The buffer must be consumed exactly. `expire_ts` and `locked_to` are
//! carried as-is; nothing here interprets them.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::wire::{check_text, put_text, text_len, WireReader, TEXT_LEN_PREFIX_SIZE};
use crate::WireError;

/// Only accepted waypoint version.
pub const WAYPOINT_VERSION: u8 = 1;

/// Maximum waypoint name length in bytes.
pub const MAX_NAME_BYTES: usize = 30;

/// Maximum waypoint description length in bytes.
pub const MAX_DESCRIPTION_BYTES: usize = 100;

/// Maximum icon token length in bytes.
pub const MAX_ICON_BYTES: usize = 24;

/// Fixed header: version, flags, id, lat, lon, expiry, lock.
const WAYPOINT_HEADER_SIZE: usize = 1 + 2 + 4 + 4 + 4 + 4 + 4;

/// Smallest valid waypoint: the header plus three empty text fields.
pub const WAYPOINT_MIN_WIRE_SIZE: usize = WAYPOINT_HEADER_SIZE + 3 * TEXT_LEN_PREFIX_SIZE;

/// Largest valid waypoint.
pub const WAYPOINT_MAX_WIRE_SIZE: usize =
    WAYPOINT_MIN_WIRE_SIZE + MAX_NAME_BYTES + MAX_DESCRIPTION_BYTES + MAX_ICON_BYTES;

bitflags! {
    /// Presence bits for the optional waypoint fields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct WaypointFlags: u16 {
        const HAS_LOCATION = 1 << 0;
    }
}

impl Default for WaypointFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// A named point of interest shared across the mesh by its `id`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WaypointMessage {
    pub flags: WaypointFlags,
    pub id: u32,
    pub lat_e7: i32,
    pub lon_e7: i32,
    /// Expiry time in seconds; advisory.
    pub expire_ts: u32,
    /// Owning node, or 0 when unlocked; advisory.
    pub locked_to: u32,
    pub name: String,
    pub description: String,
    pub icon: String,
}

impl WaypointMessage {
    pub fn has_location(&self) -> bool {
        self.flags.contains(WaypointFlags::HAS_LOCATION)
    }

    pub fn is_locked(&self) -> bool {
        self.locked_to != 0
    }

    /// Checks every text field against its maximum.
    pub fn validate(&self) -> Result<(), WireError> {
        check_text("name", &self.name, MAX_NAME_BYTES)?;
        check_text("description", &self.description, MAX_DESCRIPTION_BYTES)?;
        check_text("icon", &self.icon, MAX_ICON_BYTES)?;
        Ok(())
    }

    /// Number of bytes `encode_waypoint` produces for this message.
    pub fn encoded_len(&self) -> usize {
        WAYPOINT_HEADER_SIZE
            + text_len(&self.name)
            + text_len(&self.description)
            + text_len(&self.icon)
    }
}

fn put_waypoint<B: BufMut>(msg: &WaypointMessage, buf: &mut B) {
    buf.put_u8(WAYPOINT_VERSION);
    buf.put_u16_le(msg.flags.bits());
    buf.put_u32_le(msg.id);
    buf.put_i32_le(msg.lat_e7);
    buf.put_i32_le(msg.lon_e7);
    buf.put_u32_le(msg.expire_ts);
    buf.put_u32_le(msg.locked_to);
    put_text(buf, &msg.name);
    put_text(buf, &msg.description);
    put_text(buf, &msg.icon);
}

/// Encodes a waypoint. Fails without producing output if any text field
/// exceeds its maximum.
pub fn encode_waypoint(msg: &WaypointMessage) -> Result<Bytes, WireError> {
    msg.validate()?;

    let mut buf = BytesMut::with_capacity(msg.encoded_len());
    put_waypoint(msg, &mut buf);
    Ok(buf.freeze())
}

/// Encodes a waypoint into `out`, returning the number of bytes written.
///
/// `out` is left untouched on any error.
pub fn encode_waypoint_into(msg: &WaypointMessage, out: &mut [u8]) -> Result<usize, WireError> {
    msg.validate()?;

    let len = msg.encoded_len();
    if out.len() < len {
        return Err(WireError::BufferTooSmall {
            needed: len,
            actual: out.len(),
        });
    }

    let mut dst = &mut out[..len];
    put_waypoint(msg, &mut dst);
    Ok(len)
}

/// Decodes a waypoint, requiring the buffer to be consumed exactly.
pub fn decode_waypoint(buf: &[u8]) -> Result<WaypointMessage, WireError> {
    if buf.len() < WAYPOINT_MIN_WIRE_SIZE {
        tracing::trace!(len = buf.len(), "rejecting short waypoint");
        return Err(WireError::TooShort {
            needed: WAYPOINT_MIN_WIRE_SIZE,
            actual: buf.len(),
        });
    }

    let mut reader = WireReader::new(buf);
    reader.version(WAYPOINT_VERSION)?;

    let msg = WaypointMessage {
        flags: WaypointFlags::from_bits_retain(reader.u16_le("flags")?),
        id: reader.u32_le("id")?,
        lat_e7: reader.i32_le("lat_e7")?,
        lon_e7: reader.i32_le("lon_e7")?,
        expire_ts: reader.u32_le("expire_ts")?,
        locked_to: reader.u32_le("locked_to")?,
        name: reader.text("name", MAX_NAME_BYTES)?,
        description: reader.text("description", MAX_DESCRIPTION_BYTES)?,
        icon: reader.text("icon", MAX_ICON_BYTES)?,
    };
    reader.finish()?;

    Ok(msg)
}
