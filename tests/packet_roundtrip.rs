//! Integration tests for the packet codec and registry.
//!
//! Covers the registry's id-assignment semantics, round-trips for the
//! full catalog, and the golden byte vector carried over from the
//! original protocol's test suite.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeMap;

use chat_protocol::core::buffer::ByteBuffer;
use chat_protocol::protocol::packet::{Packet, PacketKind, Side, User};
use chat_protocol::protocol::registry::ProtocolRegistry;
use chat_protocol::ProtocolError;

fn catalog_fixtures() -> Vec<Packet> {
    let mut users = BTreeMap::new();
    users.insert(0xAABBCCDD_u64, "googer_".to_string());
    users.insert(0x11223344_u64, "alice".to_string());
    let mut channels = BTreeMap::new();
    channels.insert(16_u64, "main".to_string());
    channels.insert(32_u64, "random".to_string());

    vec![
        Packet::HelloRequest { version: 1 },
        Packet::EncryptionSupported {
            suites: vec!["dhaes".to_string(), "future".to_string()],
        },
        Packet::ClientPubKey {
            key: vec![0x01, 0x02, 0x03, 0xFF],
        },
        Packet::LoginRequest {
            username: "googer_".to_string(),
        },
        Packet::ServerHeartbeat { nonce: 0xBEEF },
        Packet::ClientHeartbeatAck { nonce: 7 },
        Packet::ClientImplementation {
            tag: "chat0".to_string(),
        },
        Packet::SendMessage {
            channel: 16,
            content: "hello there".to_string(),
        },
        Packet::UserListRequest,
        Packet::ChannelListRequest,
        Packet::HelloReply { version: 1 },
        Packet::EncryptionSelect { index: 2 },
        Packet::ServerPubKey {
            key: vec![0u8; 256],
        },
        Packet::LoginReply {
            username: "googer__1".to_string(),
        },
        Packet::ServerHeartbeatAck { nonce: 0xBEEF },
        Packet::ClientHeartbeat { nonce: 512 },
        Packet::ServerImplementation {
            tag: "chat0".to_string(),
        },
        Packet::Kick {
            reason: "no reason specified".to_string(),
        },
        Packet::UserMessage {
            mid: 17,
            channel: 16,
            author: 0xAABBCCDD,
            content: "hi".to_string(),
        },
        Packet::ServerMessage {
            mid: 33,
            channel: 16,
            content: "server says hi".to_string(),
        },
        Packet::UserListResponse { users },
        Packet::ChannelListResponse { channels },
        Packet::UserJoined {
            user: User {
                username: "alice".to_string(),
                fingerprint: 0x11223344,
            },
        },
        Packet::UserLeft {
            fingerprint: 0x11223344,
        },
    ]
}

#[test]
fn every_catalog_packet_roundtrips() {
    let registry = ProtocolRegistry::standard();
    for packet in catalog_fixtures() {
        let encoded = registry.encode(&packet).expect("encode");
        let decoded = registry
            .decode(packet.side(), &encoded)
            .unwrap_or_else(|e| panic!("decode {}: {e}", packet.name()));
        assert_eq!(packet, decoded, "round-trip mismatch for {}", packet.name());
    }
}

#[test]
fn empty_schema_packet_encodes_to_its_id_alone() {
    let mut registry = ProtocolRegistry::new();
    registry.register(PacketKind::UserListRequest, Some(0)).unwrap();
    let encoded = registry.encode(&Packet::UserListRequest).unwrap();
    assert_eq!(encoded, b"\x00\x00");
}

#[test]
fn golden_vector_from_original_suite() {
    // id 1, then {i64 1, "hi", b"hello", 0.5, ["hi", "again"]} with the
    // original field encodings: NT strings, u64-length blobs, u64 counts
    let expected: &[u8] =
        b"\x01\x00\x01\x00\x00\x00\x00\x00\x00\x00hi\x00\x05\x00\x00\x00\x00\x00\x00\x00hello\x00\x00\x00\x00\x00\x00\xe0?\x02\x00\x00\x00\x00\x00\x00\x00hi\x00again\x00";

    let mut buf = ByteBuffer::new();
    buf.write_u16(1);
    buf.write_i64(1);
    buf.write_string_nt("hi").unwrap();
    buf.write_u64(5);
    buf.write_raw(b"hello");
    buf.write_f64(0.5);
    buf.write_u64(2);
    buf.write_string_nt("hi").unwrap();
    buf.write_string_nt("again").unwrap();

    assert_eq!(buf.clone().into_bytes(), expected);

    // and back out again
    let mut buf = ByteBuffer::from_bytes(expected.to_vec());
    assert_eq!(buf.read_u16().unwrap(), 1);
    assert_eq!(buf.read_i64().unwrap(), 1);
    assert_eq!(buf.read_string_nt().unwrap(), "hi");
    let blob_len = buf.read_u64().unwrap();
    assert_eq!(buf.read_raw(blob_len as usize).unwrap(), b"hello");
    assert_eq!(buf.read_f64().unwrap(), 0.5);
    assert_eq!(buf.read_u64().unwrap(), 2);
    assert_eq!(buf.read_string_nt().unwrap(), "hi");
    assert_eq!(buf.read_string_nt().unwrap(), "again");
    assert_eq!(buf.remaining(), 0);
}

#[test]
fn standard_catalog_ids_are_stable() {
    let registry = ProtocolRegistry::standard();
    // handshake openers sit at id 0 on both sides
    assert_eq!(registry.id_of(PacketKind::HelloRequest), Some(0));
    assert_eq!(registry.id_of(PacketKind::HelloReply), Some(0));
    // liveness pair straddles both direction spaces at 4/5
    assert_eq!(registry.id_of(PacketKind::ServerHeartbeat), Some(4));
    assert_eq!(registry.id_of(PacketKind::ServerHeartbeatAck), Some(4));
    assert_eq!(registry.id_of(PacketKind::ClientHeartbeatAck), Some(5));
    assert_eq!(registry.id_of(PacketKind::ClientHeartbeat), Some(5));
    assert_eq!(registry.id_of(PacketKind::Kick), Some(7));
    assert_eq!(registry.id_of(PacketKind::UserLeft), Some(13));
}

#[test]
fn duplicate_registration_reports_side_and_id() {
    let mut registry = ProtocolRegistry::standard();
    match registry.register(PacketKind::Kick, None) {
        Err(ProtocolError::PacketAlreadyRegistered {
            side: Side::Clientbound,
            id: 7,
        }) => {}
        other => panic!("expected PacketAlreadyRegistered, got {other:?}"),
    }
}

#[test]
fn truncated_packet_fails_to_decode() {
    let registry = ProtocolRegistry::standard();
    let encoded = registry
        .encode(&Packet::UserMessage {
            mid: 1,
            channel: 2,
            author: 3,
            content: "text".to_string(),
        })
        .unwrap();
    let err = registry
        .decode(Side::Clientbound, &encoded[..encoded.len() / 2])
        .unwrap_err();
    assert!(matches!(err, ProtocolError::BufferUnderrun { .. }));
}
