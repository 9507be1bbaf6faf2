//! Frame payload compression.
//!
//! Every frame payload is compressed before encryption; the algorithm is
//! configured per deployment (both ends must agree). Decompression
//! validates claimed sizes before allocating to block decompression bombs.

use serde::{Deserialize, Serialize};

use crate::config::MAX_PACKET_SIZE;
use crate::error::{ProtocolError, Result};

/// Maximum output size for decompression, aligned with the packet limit.
const MAX_DECOMPRESSION_SIZE: usize = MAX_PACKET_SIZE;

/// Supported compression algorithms.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    Lz4,
    Zstd,
}

/// Compresses data using the specified compression algorithm.
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if compression fails
pub fn compress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(data, &mut out, 1)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            Ok(out)
        }
    }
}

/// Decompresses data that was compressed with the specified algorithm.
///
/// Enforces a maximum output size to prevent decompression bombs. The
/// claimed size is validated before any allocation happens.
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if:
/// - Decompression fails
/// - Output size exceeds the packet size limit
pub fn decompress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => {
            // lz4_flex prepends the uncompressed size as 4-byte LE;
            // validate the claim before it drives an allocation
            if data.len() < 4 {
                return Err(ProtocolError::DecompressionFailure);
            }
            let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed_size > MAX_DECOMPRESSION_SIZE {
                return Err(ProtocolError::DecompressionFailure);
            }

            let decompressed = lz4_flex::decompress_size_prepended(data)
                .map_err(|_| ProtocolError::DecompressionFailure)?;
            if decompressed.len() > MAX_DECOMPRESSION_SIZE {
                return Err(ProtocolError::DecompressionFailure);
            }
            Ok(decompressed)
        }
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            let mut reader = zstd::stream::Decoder::new(data)
                .map_err(|_| ProtocolError::DecompressionFailure)?;

            // read in chunks to enforce the size limit incrementally
            use std::io::Read;
            let mut buffer = [0u8; 8192];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        out.extend_from_slice(&buffer[..n]);
                        if out.len() > MAX_DECOMPRESSION_SIZE {
                            return Err(ProtocolError::DecompressionFailure);
                        }
                    }
                    Err(_) => return Err(ProtocolError::DecompressionFailure),
                }
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn lz4_roundtrip() {
        let original = b"Hello, World! This is a test of LZ4 compression.";
        let compressed = compress(original, CompressionKind::Lz4).unwrap();
        let decompressed = decompress(&compressed, CompressionKind::Lz4).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    fn zstd_roundtrip() {
        let original = b"Hello, World! This is a test of Zstd compression.";
        let compressed = compress(original, CompressionKind::Zstd).unwrap();
        let decompressed = decompress(&compressed, CompressionKind::Zstd).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    fn empty_payload_roundtrip() {
        let compressed = compress(b"", CompressionKind::Lz4).unwrap();
        assert_eq!(decompress(&compressed, CompressionKind::Lz4).unwrap(), b"");
    }

    #[test]
    fn lz4_bomb_rejected() {
        // claims to decompress to 3+ GB
        let malicious = vec![0x2b, 0x60, 0xbb, 0xbb];
        assert!(decompress(&malicious, CompressionKind::Lz4).is_err());
    }

    #[test]
    fn lz4_oversized_claim_rejected() {
        let claimed = (MAX_DECOMPRESSION_SIZE + 1) as u32;
        let mut malicious = claimed.to_le_bytes().to_vec();
        malicious.extend_from_slice(&[0u8; 16]);
        assert!(decompress(&malicious, CompressionKind::Lz4).is_err());
    }

    #[test]
    fn lz4_short_input_rejected() {
        assert!(decompress(&[0x2b, 0x60], CompressionKind::Lz4).is_err());
    }

    #[test]
    fn malformed_data_rejected() {
        let malformed = vec![0x10, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff];
        assert!(decompress(&malformed, CompressionKind::Lz4).is_err());
    }
}
