//! Tokio codec for the outermost wire framing.
//!
//! One frame is `[2-byte LE total length][ciphertext]`. The ciphertext is
//! opaque at this layer: encryption, compression, and packet decoding all
//! happen above the codec. Length validation occurs before any allocation.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_FRAME_SIZE;
use crate::error::ProtocolError;

/// Length-delimited frame codec with a 2-byte little-endian prefix.
pub struct FrameCodec;

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::OversizedFrame(item.len()));
        }
        dst.reserve(2 + item.len());
        dst.put_u16_le(item.len() as u16);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }
        let length = u16::from_le_bytes([src[0], src[1]]) as usize;
        if src.len() < 2 + length {
            // partial frame, wait for more bytes
            src.reserve(2 + length - src.len());
            return Ok(None);
        }
        src.advance(2);
        Ok(Some(src.split_to(length).freeze()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let mut buf = BytesMut::new();
        FrameCodec
            .encode(Bytes::from_static(b"payload"), &mut buf)
            .unwrap();
        assert_eq!(&buf[..2], &[7, 0]);

        let frame = FrameCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], b"payload");
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits() {
        let mut buf = BytesMut::new();
        FrameCodec
            .encode(Bytes::from_static(b"abcdef"), &mut buf)
            .unwrap();
        let mut partial = buf.split_to(4);
        assert!(FrameCodec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);
        let frame = FrameCodec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(&frame[..], b"abcdef");
    }

    #[test]
    fn two_frames_in_one_read() {
        let mut buf = BytesMut::new();
        FrameCodec.encode(Bytes::from_static(b"a"), &mut buf).unwrap();
        FrameCodec.encode(Bytes::from_static(b"bb"), &mut buf).unwrap();

        assert_eq!(&FrameCodec.decode(&mut buf).unwrap().unwrap()[..], b"a");
        assert_eq!(&FrameCodec.decode(&mut buf).unwrap().unwrap()[..], b"bb");
        assert!(FrameCodec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn empty_frame_is_legal() {
        let mut buf = BytesMut::new();
        FrameCodec.encode(Bytes::new(), &mut buf).unwrap();
        let frame = FrameCodec.decode(&mut buf).unwrap().unwrap();
        assert!(frame.is_empty());
    }
}
