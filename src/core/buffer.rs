//! Cursor-based binary buffer underlying packet (de)serialization.
//!
//! Wraps a growable byte vector with an explicit read/write cursor. All
//! multi-byte integers are little-endian. Strings come in two encodings:
//! null-terminated (`*_string_nt`, for ordinary text) and length-prefixed
//! (`*_bytes_lp`, a 2-byte length followed by raw bytes, used for key
//! material blobs). Reading past the end yields
//! [`ProtocolError::BufferUnderrun`]. This component is pure and performs
//! no I/O.

use crate::error::{ProtocolError, Result};

/// Growable byte buffer with a single read/write cursor.
#[derive(Debug, Default, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
    cursor: usize,
}

impl ByteBuffer {
    /// Create an empty buffer positioned at offset zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap existing bytes for reading, cursor at the start.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            cursor: 0,
        }
    }

    /// Consume the buffer, returning the underlying bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Total number of bytes in the buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left between the cursor and the end.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.cursor)
    }

    fn take(&mut self, amount: usize) -> Result<&[u8]> {
        if self.remaining() < amount {
            return Err(ProtocolError::BufferUnderrun {
                needed: amount,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.cursor..self.cursor + amount];
        self.cursor += amount;
        Ok(slice)
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Fixed 8-byte IEEE-754 double.
    pub fn write_f64(&mut self, value: f64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// UTF-8 bytes followed by a single 0x00 terminator. The string must
    /// not contain an embedded NUL.
    pub fn write_string_nt(&mut self, value: &str) -> Result<()> {
        if value.as_bytes().contains(&0) {
            return Err(ProtocolError::InvalidString);
        }
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        Ok(())
    }

    /// 2-byte little-endian length prefix followed by raw bytes, no
    /// terminator. Used for key material blobs that may be large.
    pub fn write_bytes_lp(&mut self, value: &[u8]) -> Result<()> {
        if value.len() > u16::MAX as usize {
            return Err(ProtocolError::OversizedBlob(value.len()));
        }
        self.write_u16(value.len() as u16);
        self.data.extend_from_slice(value);
        Ok(())
    }

    /// Raw bytes with no framing; length is implied by the caller.
    pub fn write_raw(&mut self, value: &[u8]) {
        self.data.extend_from_slice(value);
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().map_err(|_| {
            ProtocolError::BufferUnderrun {
                needed: 8,
                available: 0,
            }
        })?;
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().map_err(|_| {
            ProtocolError::BufferUnderrun {
                needed: 8,
                available: 0,
            }
        })?;
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().map_err(|_| {
            ProtocolError::BufferUnderrun {
                needed: 8,
                available: 0,
            }
        })?;
        Ok(f64::from_le_bytes(bytes))
    }

    /// Read bytes up to (and consuming) the 0x00 terminator.
    pub fn read_string_nt(&mut self) -> Result<String> {
        let start = self.cursor;
        let terminator = self.data[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::BufferUnderrun {
                needed: 1,
                available: 0,
            })?;
        let bytes = self.data[start..start + terminator].to_vec();
        self.cursor = start + terminator + 1;
        String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidString)
    }

    /// Read a 2-byte length prefix then that many raw bytes.
    pub fn read_bytes_lp(&mut self) -> Result<Vec<u8>> {
        let length = self.read_u16()? as usize;
        Ok(self.take(length)?.to_vec())
    }

    /// Read exactly `amount` raw bytes.
    pub fn read_raw(&mut self, amount: usize) -> Result<Vec<u8>> {
        Ok(self.take(amount)?.to_vec())
    }
}
