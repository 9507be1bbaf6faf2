//! # Error Types
//!
//! Error taxonomy for the chat protocol stack.
//!
//! Faults fall into five families:
//! - **Transport faults**: connection loss, timeouts, use of a closed socket.
//!   These travel as [`crate::transport::SocketStatus`] values at the
//!   transport boundary and only become errors one layer up, inside the
//!   connection state machine.
//! - **Protocol violations**: unknown packet ids, malformed field encodings,
//!   unexpected packets mid-handshake.
//! - **Negotiation failures**: no common cipher suite, missing keypairs,
//!   key-exchange failures on malformed peer material.
//! - **Liveness failures**: the heartbeat miss limit was reached.
//! - **Handler failures**: an event handler returned an error; these are
//!   isolated by the event bus and never surface here.
//!
//! All variants implement `std::error::Error` via `thiserror`.

use std::io;
use thiserror::Error;

use crate::protocol::packet::Side;

/// Primary error type for all protocol operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("buffer underrun: needed {needed} bytes, {available} available")]
    BufferUnderrun { needed: usize, available: usize },

    #[error("string contains an embedded NUL byte")]
    InvalidString,

    #[error("length-prefixed blob too large: {0} bytes")]
    OversizedBlob(usize),

    #[error("packet id {id} already registered for {side}")]
    PacketAlreadyRegistered { side: Side, id: u16 },

    #[error("packet kind is not registered")]
    PacketUnregistered,

    #[error("unknown packet id {id} for {side}")]
    UnknownPacketId { side: Side, id: u16 },

    #[error("frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("compression failed")]
    CompressionFailure,

    #[error("decompression failed")]
    DecompressionFailure,

    #[error("encryption failed")]
    EncryptionFailure,

    #[error("decryption failed")]
    DecryptionFailure,

    #[error("key exchange failed: {0}")]
    KeyExchange(String),

    #[error("cipher suite not supported: {0}")]
    UnsupportedSuite(String),

    #[error("no mutually supported cipher suite")]
    NoCommonSuite,

    #[error("no keypair loaded for suite {0}")]
    NoKeyLoaded(String),

    #[error("unexpected packet: expected {expected}, got {got}")]
    UnexpectedPacket {
        expected: &'static str,
        got: &'static str,
    },

    #[error("mismatched versions: client={client}, server={server}")]
    VersionMismatch { client: u16, server: u16 },

    #[error("username contains unallowed characters")]
    InvalidUsername,

    #[error("kicked: {0}")]
    Kicked(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("operation timed out")]
    Timeout,

    #[error("connection timed out (heartbeat miss limit reached)")]
    ConnectionTimedOut,

    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using ProtocolError.
pub type Result<T> = std::result::Result<T, ProtocolError>;
