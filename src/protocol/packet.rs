//! Packet model: every wire message as one closed enum.
//!
//! Each variant encodes its fields in declaration order against the
//! [`ByteBuffer`]; decoding mirrors the same order exactly (positional, not
//! tagged). Which numeric id a variant travels under is decided by the
//! [`crate::protocol::registry::ProtocolRegistry`], keyed by direction.
//!
//! List and map fields carry an 8-byte little-endian element count. Maps
//! are `BTreeMap` so encoding order is deterministic.

use std::collections::BTreeMap;
use std::fmt;

use crate::core::buffer::ByteBuffer;
use crate::error::Result;

/// Kick reason used when none is given.
pub const DEFAULT_KICK_REASON: &str = "no reason specified";

/// Direction a packet travels in. Each direction has its own id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Client → server
    Serverbound,
    /// Server → client
    Clientbound,
}

impl Side {
    /// The opposite direction.
    pub fn flipped(self) -> Self {
        match self {
            Side::Serverbound => Side::Clientbound,
            Side::Clientbound => Side::Serverbound,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Serverbound => write!(f, "serverbound"),
            Side::Clientbound => write!(f, "clientbound"),
        }
    }
}

/// A connected peer as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Display name, unique per server after collision renaming.
    pub username: String,
    /// Key fingerprint, stable across reconnects.
    pub fingerprint: u64,
}

/// Every message this protocol can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    // --- serverbound ---
    /// Opens the handshake with the client's protocol version.
    HelloRequest { version: u16 },
    /// Full list of cipher suite names the client supports.
    EncryptionSupported { suites: Vec<String> },
    /// Client's public key material for the selected suite.
    ClientPubKey { key: Vec<u8> },
    /// Desired username; the server may rename on collision.
    LoginRequest { username: String },
    /// Probe asking the server to prove liveness.
    ServerHeartbeat { nonce: u16 },
    /// Echo of a server-issued client probe.
    ClientHeartbeatAck { nonce: u16 },
    /// Client implementation tag, exchanged post-login.
    ClientImplementation { tag: String },
    /// Chat message addressed to a channel.
    SendMessage { channel: u64, content: String },
    /// Ask for the connected user list.
    UserListRequest,
    /// Ask for the channel list.
    ChannelListRequest,

    // --- clientbound ---
    /// Server's half of the hello exchange.
    HelloReply { version: u16 },
    /// Index into the client's offered suite list.
    EncryptionSelect { index: u16 },
    /// Server's public key material for the selected suite.
    ServerPubKey { key: Vec<u8> },
    /// Final (possibly renamed) username.
    LoginReply { username: String },
    /// Echo of a client-issued server probe.
    ServerHeartbeatAck { nonce: u16 },
    /// Probe asking the client to prove liveness.
    ClientHeartbeat { nonce: u16 },
    /// Server implementation tag, exchanged post-login.
    ServerImplementation { tag: String },
    /// Connection termination with a human-readable reason.
    Kick { reason: String },
    /// A user's chat message fanned out to the channel.
    UserMessage {
        mid: u64,
        channel: u64,
        author: u64,
        content: String,
    },
    /// Server-authored message (no author fingerprint).
    ServerMessage {
        mid: u64,
        channel: u64,
        content: String,
    },
    /// Fingerprint → username for every connected user.
    UserListResponse { users: BTreeMap<u64, String> },
    /// Channel id → name for every channel.
    ChannelListResponse { channels: BTreeMap<u64, String> },
    /// A user connected.
    UserJoined { user: User },
    /// A user disconnected.
    UserLeft { fingerprint: u64 },
}

/// Fieldless mirror of [`Packet`], used as the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    HelloRequest,
    EncryptionSupported,
    ClientPubKey,
    LoginRequest,
    ServerHeartbeat,
    ClientHeartbeatAck,
    ClientImplementation,
    SendMessage,
    UserListRequest,
    ChannelListRequest,
    HelloReply,
    EncryptionSelect,
    ServerPubKey,
    LoginReply,
    ServerHeartbeatAck,
    ClientHeartbeat,
    ServerImplementation,
    Kick,
    UserMessage,
    ServerMessage,
    UserListResponse,
    ChannelListResponse,
    UserJoined,
    UserLeft,
}

impl PacketKind {
    /// Direction this packet kind travels in.
    pub fn side(self) -> Side {
        match self {
            PacketKind::HelloRequest
            | PacketKind::EncryptionSupported
            | PacketKind::ClientPubKey
            | PacketKind::LoginRequest
            | PacketKind::ServerHeartbeat
            | PacketKind::ClientHeartbeatAck
            | PacketKind::ClientImplementation
            | PacketKind::SendMessage
            | PacketKind::UserListRequest
            | PacketKind::ChannelListRequest => Side::Serverbound,
            PacketKind::HelloReply
            | PacketKind::EncryptionSelect
            | PacketKind::ServerPubKey
            | PacketKind::LoginReply
            | PacketKind::ServerHeartbeatAck
            | PacketKind::ClientHeartbeat
            | PacketKind::ServerImplementation
            | PacketKind::Kick
            | PacketKind::UserMessage
            | PacketKind::ServerMessage
            | PacketKind::UserListResponse
            | PacketKind::ChannelListResponse
            | PacketKind::UserJoined
            | PacketKind::UserLeft => Side::Clientbound,
        }
    }

    /// Stable name for log and error messages.
    pub fn name(self) -> &'static str {
        match self {
            PacketKind::HelloRequest => "HelloRequest",
            PacketKind::EncryptionSupported => "EncryptionSupported",
            PacketKind::ClientPubKey => "ClientPubKey",
            PacketKind::LoginRequest => "LoginRequest",
            PacketKind::ServerHeartbeat => "ServerHeartbeat",
            PacketKind::ClientHeartbeatAck => "ClientHeartbeatAck",
            PacketKind::ClientImplementation => "ClientImplementation",
            PacketKind::SendMessage => "SendMessage",
            PacketKind::UserListRequest => "UserListRequest",
            PacketKind::ChannelListRequest => "ChannelListRequest",
            PacketKind::HelloReply => "HelloReply",
            PacketKind::EncryptionSelect => "EncryptionSelect",
            PacketKind::ServerPubKey => "ServerPubKey",
            PacketKind::LoginReply => "LoginReply",
            PacketKind::ServerHeartbeatAck => "ServerHeartbeatAck",
            PacketKind::ClientHeartbeat => "ClientHeartbeat",
            PacketKind::ServerImplementation => "ServerImplementation",
            PacketKind::Kick => "Kick",
            PacketKind::UserMessage => "UserMessage",
            PacketKind::ServerMessage => "ServerMessage",
            PacketKind::UserListResponse => "UserListResponse",
            PacketKind::ChannelListResponse => "ChannelListResponse",
            PacketKind::UserJoined => "UserJoined",
            PacketKind::UserLeft => "UserLeft",
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Packet {
    /// A kick with the default reason.
    pub fn kick_default() -> Self {
        Packet::Kick {
            reason: DEFAULT_KICK_REASON.to_string(),
        }
    }

    /// The kind tag of this packet.
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::HelloRequest { .. } => PacketKind::HelloRequest,
            Packet::EncryptionSupported { .. } => PacketKind::EncryptionSupported,
            Packet::ClientPubKey { .. } => PacketKind::ClientPubKey,
            Packet::LoginRequest { .. } => PacketKind::LoginRequest,
            Packet::ServerHeartbeat { .. } => PacketKind::ServerHeartbeat,
            Packet::ClientHeartbeatAck { .. } => PacketKind::ClientHeartbeatAck,
            Packet::ClientImplementation { .. } => PacketKind::ClientImplementation,
            Packet::SendMessage { .. } => PacketKind::SendMessage,
            Packet::UserListRequest => PacketKind::UserListRequest,
            Packet::ChannelListRequest => PacketKind::ChannelListRequest,
            Packet::HelloReply { .. } => PacketKind::HelloReply,
            Packet::EncryptionSelect { .. } => PacketKind::EncryptionSelect,
            Packet::ServerPubKey { .. } => PacketKind::ServerPubKey,
            Packet::LoginReply { .. } => PacketKind::LoginReply,
            Packet::ServerHeartbeatAck { .. } => PacketKind::ServerHeartbeatAck,
            Packet::ClientHeartbeat { .. } => PacketKind::ClientHeartbeat,
            Packet::ServerImplementation { .. } => PacketKind::ServerImplementation,
            Packet::Kick { .. } => PacketKind::Kick,
            Packet::UserMessage { .. } => PacketKind::UserMessage,
            Packet::ServerMessage { .. } => PacketKind::ServerMessage,
            Packet::UserListResponse { .. } => PacketKind::UserListResponse,
            Packet::ChannelListResponse { .. } => PacketKind::ChannelListResponse,
            Packet::UserJoined { .. } => PacketKind::UserJoined,
            Packet::UserLeft { .. } => PacketKind::UserLeft,
        }
    }

    /// Direction this packet travels in.
    pub fn side(&self) -> Side {
        self.kind().side()
    }

    /// Stable name for log and error messages.
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Write this packet's fields (id excluded) in declaration order.
    pub(crate) fn write_fields(&self, buf: &mut ByteBuffer) -> Result<()> {
        match self {
            Packet::HelloRequest { version } | Packet::HelloReply { version } => {
                buf.write_u16(*version);
            }
            Packet::EncryptionSupported { suites } => {
                buf.write_u64(suites.len() as u64);
                for suite in suites {
                    buf.write_string_nt(suite)?;
                }
            }
            Packet::ClientPubKey { key } | Packet::ServerPubKey { key } => {
                buf.write_bytes_lp(key)?;
            }
            Packet::LoginRequest { username } | Packet::LoginReply { username } => {
                buf.write_string_nt(username)?;
            }
            Packet::ServerHeartbeat { nonce }
            | Packet::ServerHeartbeatAck { nonce }
            | Packet::ClientHeartbeat { nonce }
            | Packet::ClientHeartbeatAck { nonce } => {
                buf.write_u16(*nonce);
            }
            Packet::ClientImplementation { tag } | Packet::ServerImplementation { tag } => {
                buf.write_string_nt(tag)?;
            }
            Packet::SendMessage { channel, content } => {
                buf.write_u64(*channel);
                buf.write_string_nt(content)?;
            }
            Packet::UserListRequest | Packet::ChannelListRequest => {}
            Packet::EncryptionSelect { index } => {
                buf.write_u16(*index);
            }
            Packet::Kick { reason } => {
                buf.write_string_nt(reason)?;
            }
            Packet::UserMessage {
                mid,
                channel,
                author,
                content,
            } => {
                buf.write_u64(*mid);
                buf.write_u64(*channel);
                buf.write_u64(*author);
                buf.write_string_nt(content)?;
            }
            Packet::ServerMessage {
                mid,
                channel,
                content,
            } => {
                buf.write_u64(*mid);
                buf.write_u64(*channel);
                buf.write_string_nt(content)?;
            }
            Packet::UserListResponse { users } => {
                write_id_map(buf, users)?;
            }
            Packet::ChannelListResponse { channels } => {
                write_id_map(buf, channels)?;
            }
            Packet::UserJoined { user } => {
                buf.write_string_nt(&user.username)?;
                buf.write_u64(user.fingerprint);
            }
            Packet::UserLeft { fingerprint } => {
                buf.write_u64(*fingerprint);
            }
        }
        Ok(())
    }

    /// Read the fields of `kind` (id already consumed) and build the packet.
    pub(crate) fn read_fields(kind: PacketKind, buf: &mut ByteBuffer) -> Result<Packet> {
        Ok(match kind {
            PacketKind::HelloRequest => Packet::HelloRequest {
                version: buf.read_u16()?,
            },
            PacketKind::EncryptionSupported => {
                let count = buf.read_u64()?;
                let mut suites = Vec::with_capacity(count.min(64) as usize);
                for _ in 0..count {
                    suites.push(buf.read_string_nt()?);
                }
                Packet::EncryptionSupported { suites }
            }
            PacketKind::ClientPubKey => Packet::ClientPubKey {
                key: buf.read_bytes_lp()?,
            },
            PacketKind::LoginRequest => Packet::LoginRequest {
                username: buf.read_string_nt()?,
            },
            PacketKind::ServerHeartbeat => Packet::ServerHeartbeat {
                nonce: buf.read_u16()?,
            },
            PacketKind::ClientHeartbeatAck => Packet::ClientHeartbeatAck {
                nonce: buf.read_u16()?,
            },
            PacketKind::ClientImplementation => Packet::ClientImplementation {
                tag: buf.read_string_nt()?,
            },
            PacketKind::SendMessage => Packet::SendMessage {
                channel: buf.read_u64()?,
                content: buf.read_string_nt()?,
            },
            PacketKind::UserListRequest => Packet::UserListRequest,
            PacketKind::ChannelListRequest => Packet::ChannelListRequest,
            PacketKind::HelloReply => Packet::HelloReply {
                version: buf.read_u16()?,
            },
            PacketKind::EncryptionSelect => Packet::EncryptionSelect {
                index: buf.read_u16()?,
            },
            PacketKind::ServerPubKey => Packet::ServerPubKey {
                key: buf.read_bytes_lp()?,
            },
            PacketKind::LoginReply => Packet::LoginReply {
                username: buf.read_string_nt()?,
            },
            PacketKind::ServerHeartbeatAck => Packet::ServerHeartbeatAck {
                nonce: buf.read_u16()?,
            },
            PacketKind::ClientHeartbeat => Packet::ClientHeartbeat {
                nonce: buf.read_u16()?,
            },
            PacketKind::ServerImplementation => Packet::ServerImplementation {
                tag: buf.read_string_nt()?,
            },
            PacketKind::Kick => Packet::Kick {
                reason: buf.read_string_nt()?,
            },
            PacketKind::UserMessage => Packet::UserMessage {
                mid: buf.read_u64()?,
                channel: buf.read_u64()?,
                author: buf.read_u64()?,
                content: buf.read_string_nt()?,
            },
            PacketKind::ServerMessage => Packet::ServerMessage {
                mid: buf.read_u64()?,
                channel: buf.read_u64()?,
                content: buf.read_string_nt()?,
            },
            PacketKind::UserListResponse => Packet::UserListResponse {
                users: read_id_map(buf)?,
            },
            PacketKind::ChannelListResponse => Packet::ChannelListResponse {
                channels: read_id_map(buf)?,
            },
            PacketKind::UserJoined => Packet::UserJoined {
                user: User {
                    username: buf.read_string_nt()?,
                    fingerprint: buf.read_u64()?,
                },
            },
            PacketKind::UserLeft => Packet::UserLeft {
                fingerprint: buf.read_u64()?,
            },
        })
    }
}

fn write_id_map(buf: &mut ByteBuffer, map: &BTreeMap<u64, String>) -> Result<()> {
    buf.write_u64(map.len() as u64);
    for (id, name) in map {
        buf.write_u64(*id);
        buf.write_string_nt(name)?;
    }
    Ok(())
}

fn read_id_map(buf: &mut ByteBuffer) -> Result<BTreeMap<u64, String>> {
    let count = buf.read_u64()?;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let id = buf.read_u64()?;
        let name = buf.read_string_nt()?;
        map.insert(id, name);
    }
    Ok(map)
}
