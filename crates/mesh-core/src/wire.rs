//! Shared framing primitives.
//!
//! All multi-byte integers are little-endian; signed fields are two's
//! complement of the same width. Text fields carry a `u16` byte count
//! followed by raw UTF-8 bytes, with no terminator.

use bytes::{Buf, BufMut};

use crate::WireError;

/// Size of the length prefix in front of every text field.
pub const TEXT_LEN_PREFIX_SIZE: usize = 2;

/// Checked little-endian reader over a borrowed byte slice.
///
/// Every read checks the remaining length first, so a short buffer yields
/// [`WireError::Truncated`] rather than a panic from `bytes`.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, field: &'static str, needed: usize) -> Result<(), WireError> {
        if self.buf.remaining() < needed {
            return Err(WireError::Truncated {
                field,
                declared: needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8, WireError> {
        self.ensure(field, 1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16_le(&mut self, field: &'static str) -> Result<u16, WireError> {
        self.ensure(field, 2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn i16_le(&mut self, field: &'static str) -> Result<i16, WireError> {
        self.ensure(field, 2)?;
        Ok(self.buf.get_i16_le())
    }

    pub fn u32_le(&mut self, field: &'static str) -> Result<u32, WireError> {
        self.ensure(field, 4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn i32_le(&mut self, field: &'static str) -> Result<i32, WireError> {
        self.ensure(field, 4)?;
        Ok(self.buf.get_i32_le())
    }

    /// Reads the version byte and rejects anything but `expected`.
    pub fn version(&mut self, expected: u8) -> Result<u8, WireError> {
        let got = self.u8("version")?;
        if got != expected {
            return Err(WireError::UnsupportedVersion { got, expected });
        }
        Ok(got)
    }

    /// Reads a length-prefixed text field of at most `max` bytes.
    pub fn text(&mut self, field: &'static str, max: usize) -> Result<String, WireError> {
        let len = self.u16_le(field)? as usize;
        if len > max {
            return Err(WireError::FieldTooLong { field, len, max });
        }
        if len > self.buf.remaining() {
            return Err(WireError::Truncated {
                field,
                declared: len,
                remaining: self.buf.remaining(),
            });
        }

        let text = std::str::from_utf8(&self.buf[..len])
            .map_err(|_| WireError::InvalidUtf8(field))?
            .to_owned();
        self.buf.advance(len);
        Ok(text)
    }

    /// Consumes the reader, failing if any bytes were left unread.
    pub fn finish(self) -> Result<(), WireError> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }
}

/// Rejects a text value longer than its declared maximum.
pub fn check_text(field: &'static str, value: &str, max: usize) -> Result<(), WireError> {
    if value.len() > max {
        return Err(WireError::FieldTooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

/// Writes a length-prefixed text field.
///
/// Callers validate the length with [`check_text`] first; every declared
/// maximum fits in the `u16` prefix.
pub fn put_text<B: BufMut>(buf: &mut B, value: &str) {
    buf.put_u16_le(value.len() as u16);
    buf.put_slice(value.as_bytes());
}

/// Encoded size of a text field including its prefix.
pub fn text_len(value: &str) -> usize {
    TEXT_LEN_PREFIX_SIZE + value.len()
}
