//! Minimal protobuf helpers for the third-party field subset.
//!
//! Only varint, fixed32 and length-delimited fields are handled. This is a
//! leaf utility; the position and waypoint formats do not use it.

use bytes::{Buf, BufMut};
use prost::encoding::{decode_key, decode_varint, encode_key, encode_varint};

pub use prost::encoding::{encoded_len_varint, WireType};

use crate::WireError;

fn proto_err(err: prost::DecodeError) -> WireError {
    WireError::Proto(err.to_string())
}

pub fn put_varint_field(tag: u32, value: u64, buf: &mut impl BufMut) {
    encode_key(tag, WireType::Varint, buf);
    encode_varint(value, buf);
}

pub fn put_fixed32_field(tag: u32, value: u32, buf: &mut impl BufMut) {
    encode_key(tag, WireType::ThirtyTwoBit, buf);
    buf.put_u32_le(value);
}

pub fn put_bytes_field(tag: u32, value: &[u8], buf: &mut impl BufMut) {
    encode_key(tag, WireType::LengthDelimited, buf);
    encode_varint(value.len() as u64, buf);
    buf.put_slice(value);
}

/// Reads a field key, returning its tag and wire type.
pub fn read_key(buf: &mut &[u8]) -> Result<(u32, WireType), WireError> {
    decode_key(buf).map_err(proto_err)
}

pub fn read_varint(buf: &mut &[u8]) -> Result<u64, WireError> {
    decode_varint(buf).map_err(proto_err)
}

pub fn read_fixed32(buf: &mut &[u8]) -> Result<u32, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::Truncated {
            field: "fixed32",
            declared: 4,
            remaining: buf.remaining(),
        });
    }
    Ok(buf.get_u32_le())
}

/// Reads a length-delimited field body without copying.
pub fn read_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], WireError> {
    let len = read_varint(buf)?;
    let remaining = buf.remaining();
    let len = usize::try_from(len)
        .ok()
        .filter(|&len| len <= remaining)
        .ok_or(WireError::Truncated {
            field: "bytes",
            declared: usize::try_from(len).unwrap_or(usize::MAX),
            remaining,
        })?;

    let (body, rest) = buf.split_at(len);
    *buf = rest;
    Ok(body)
}

/// Skips the body of a field with the given wire type.
pub fn skip_field(wire_type: WireType, buf: &mut &[u8]) -> Result<(), WireError> {
    let len = match wire_type {
        WireType::Varint => return read_varint(buf).map(|_| ()),
        WireType::LengthDelimited => return read_bytes(buf).map(|_| ()),
        WireType::ThirtyTwoBit => 4,
        WireType::SixtyFourBit => 8,
        WireType::StartGroup | WireType::EndGroup => {
            return Err(WireError::Proto("groups are not supported".into()))
        }
    };

    if buf.remaining() < len {
        return Err(WireError::Truncated {
            field: "skipped",
            declared: len,
            remaining: buf.remaining(),
        });
    }
    buf.advance(len);
    Ok(())
}
