//! Per-direction packet id registry and the encode/decode entry points.
//!
//! A registry is an owned context object, not a process-global: tests and
//! embedders can host several independent protocol instances in one
//! process. Each direction's id space is append-only and collision-checked
//! at registration time.

use std::collections::HashMap;

use crate::core::buffer::ByteBuffer;
use crate::error::{ProtocolError, Result};
use crate::protocol::packet::{Packet, PacketKind, Side};

/// Canonical serverbound registration order. Ids are assigned by position.
const SERVERBOUND_CATALOG: &[PacketKind] = &[
    PacketKind::HelloRequest,
    PacketKind::EncryptionSupported,
    PacketKind::ClientPubKey,
    PacketKind::LoginRequest,
    PacketKind::ServerHeartbeat,
    PacketKind::ClientHeartbeatAck,
    PacketKind::ClientImplementation,
    PacketKind::SendMessage,
    PacketKind::UserListRequest,
    PacketKind::ChannelListRequest,
];

/// Canonical clientbound registration order. Ids are assigned by position.
const CLIENTBOUND_CATALOG: &[PacketKind] = &[
    PacketKind::HelloReply,
    PacketKind::EncryptionSelect,
    PacketKind::ServerPubKey,
    PacketKind::LoginReply,
    PacketKind::ServerHeartbeatAck,
    PacketKind::ClientHeartbeat,
    PacketKind::ServerImplementation,
    PacketKind::Kick,
    PacketKind::UserMessage,
    PacketKind::ServerMessage,
    PacketKind::UserListResponse,
    PacketKind::ChannelListResponse,
    PacketKind::UserJoined,
    PacketKind::UserLeft,
];

/// Maps (direction, numeric id) to packet kinds and back.
#[derive(Debug, Default)]
pub struct ProtocolRegistry {
    by_id: HashMap<(Side, u16), PacketKind>,
    ids: HashMap<PacketKind, u16>,
}

impl ProtocolRegistry {
    /// An empty registry with no packets known.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry holding the full standard catalog.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for &kind in SERVERBOUND_CATALOG.iter().chain(CLIENTBOUND_CATALOG) {
            // catalog entries are distinct, registration cannot collide
            let _ = registry.register(kind, None);
        }
        registry
    }

    /// Register `kind` under `id`, or under the next free id of its
    /// direction when `id` is `None` (`max(existing) + 1`, starting at 0).
    ///
    /// Returns the id assigned. Fails with `PacketAlreadyRegistered` when
    /// the id is taken for that direction or the kind is already known.
    pub fn register(&mut self, kind: PacketKind, id: Option<u16>) -> Result<u16> {
        let side = kind.side();
        if let Some(existing) = self.ids.get(&kind) {
            return Err(ProtocolError::PacketAlreadyRegistered {
                side,
                id: *existing,
            });
        }
        let id = match id {
            Some(id) => {
                if self.by_id.contains_key(&(side, id)) {
                    return Err(ProtocolError::PacketAlreadyRegistered { side, id });
                }
                id
            }
            None => self
                .by_id
                .keys()
                .filter(|(s, _)| *s == side)
                .map(|(_, id)| *id)
                .max()
                .map_or(0, |max| max + 1),
        };
        self.by_id.insert((side, id), kind);
        self.ids.insert(kind, id);
        Ok(id)
    }

    /// The id assigned to `kind`, if registered.
    pub fn id_of(&self, kind: PacketKind) -> Option<u16> {
        self.ids.get(&kind).copied()
    }

    /// Serialize a packet: 2-byte LE id, then fields in declaration order.
    ///
    /// A packet with no fields encodes to exactly its 2-byte id.
    pub fn encode(&self, packet: &Packet) -> Result<Vec<u8>> {
        let id = self
            .ids
            .get(&packet.kind())
            .ok_or(ProtocolError::PacketUnregistered)?;
        let mut buf = ByteBuffer::new();
        buf.write_u16(*id);
        packet.write_fields(&mut buf)?;
        Ok(buf.into_bytes())
    }

    /// Deserialize a packet arriving on `side`.
    pub fn decode(&self, side: Side, data: &[u8]) -> Result<Packet> {
        let mut buf = ByteBuffer::from_bytes(data.to_vec());
        let id = buf.read_u16()?;
        let kind = self
            .by_id
            .get(&(side, id))
            .copied()
            .ok_or(ProtocolError::UnknownPacketId { side, id })?;
        Packet::read_fields(kind, &mut buf)
    }
}
