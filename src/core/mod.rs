//! # Core Wire Components
//!
//! Low-level binary serialization and frame framing.
//!
//! ## Components
//! - **ByteBuffer**: cursor-based binary buffer for packet field encoding
//! - **FrameCodec**: tokio codec for length-prefixed wire frames
//!
//! ## Wire Format
//! ```text
//! [Length(2, LE)] [Ciphertext(N)]
//! ```
//! where the ciphertext decrypts to a compressed, serialized packet.

pub mod buffer;
pub mod codec;
