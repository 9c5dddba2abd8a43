//! Mesh wire formats, framing, and constants.
//!
//! This crate provides:
//! - Position report codec (fixed 22-byte layout)
//! - Waypoint codec (fixed header plus length-prefixed text)
//! - Shared little-endian read/write primitives
//! - A minimal protobuf varint/fixed32 helper for the third-party subset
//!
//! Every message starts with a one-byte version followed by a 16-bit flags
//! bitfield. Decoders accept exactly one version per message type.

#![forbid(unsafe_code)]

pub mod pb;
pub mod position;
pub mod waypoint;
pub mod wire;

pub use position::{
    decode_position, encode_position, encode_position_into, PositionFlags, PositionMessage,
    POSITION_VERSION, POSITION_WIRE_SIZE,
};
pub use waypoint::{
    decode_waypoint, encode_waypoint, encode_waypoint_into, WaypointFlags, WaypointMessage,
    MAX_DESCRIPTION_BYTES, MAX_ICON_BYTES, MAX_NAME_BYTES, WAYPOINT_MIN_WIRE_SIZE,
    WAYPOINT_VERSION,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message too short: {actual} bytes, minimum {needed}")]
    TooShort { needed: usize, actual: usize },
    #[error("output buffer too small: {actual} bytes, need {needed}")]
    BufferTooSmall { needed: usize, actual: usize },
    #[error("unsupported version: {got}, expected {expected}")]
    UnsupportedVersion { got: u8, expected: u8 },
    #[error("{field} is {len} bytes, maximum {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("{field} declares {declared} bytes but only {remaining} remain")]
    Truncated {
        field: &'static str,
        declared: usize,
        remaining: usize,
    },
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),
    #[error("protobuf decode error: {0}")]
    Proto(String),
}
