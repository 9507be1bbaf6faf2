//! Liveness tests for the steady-state receive loop: miss accounting,
//! probe echoing, and the six-miss disconnect.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use chat_protocol::protocol::events::{Event, EventArgs, EventBus};
use chat_protocol::protocol::packet::{Packet, Side};
use chat_protocol::protocol::registry::ProtocolRegistry;
use chat_protocol::service::{Connection, Role};
use chat_protocol::transport::socket::{ProtoSocket, SocketStatus};
use chat_protocol::utils::compression::CompressionKind;
use chat_protocol::ProtocolError;

/// A connected (client socket, server socket) pair over loopback.
async fn socket_pair(
    client_recv_timeout: Duration,
) -> (ProtoSocket, ProtoSocket) {
    let registry = Arc::new(ProtocolRegistry::standard());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let client_socket = ProtoSocket::from_stream(
        client.unwrap(),
        registry.clone(),
        Side::Clientbound,
        CompressionKind::Lz4,
    )
    .with_timeouts(Duration::from_secs(1), client_recv_timeout);
    let server_socket = ProtoSocket::from_stream(
        accepted.unwrap().0,
        registry,
        Side::Serverbound,
        CompressionKind::Lz4,
    )
    .with_timeouts(Duration::from_secs(1), Duration::from_secs(1));

    (client_socket, server_socket)
}

fn miss_recorder(events: &EventBus) -> Arc<Mutex<Vec<u32>>> {
    let misses = Arc::new(Mutex::new(Vec::new()));
    let sink = misses.clone();
    events.on(
        Event::HeartbeatMissed,
        Arc::new(move |args| {
            if let EventArgs::Missed(count) = args {
                sink.lock().unwrap().push(*count);
            }
            Ok(())
        }),
    );
    misses
}

#[tokio::test]
async fn silent_peer_is_dropped_on_the_sixth_miss() {
    let (client_socket, _peer) = socket_pair(Duration::from_millis(40)).await;
    let events = Arc::new(EventBus::new());
    let misses = miss_recorder(&events);

    let mut conn = Connection::new(client_socket, events, Role::Client);
    let result = conn.recv_batch().await;

    assert!(matches!(result, Err(ProtocolError::ConnectionTimedOut)));
    // exactly six rounds, not five, not seven
    assert_eq!(*misses.lock().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    assert!(!conn.is_open());
}

#[tokio::test]
async fn answered_probes_reset_the_miss_counter() {
    let (client_socket, mut peer) = socket_pair(Duration::from_millis(40)).await;
    let events = Arc::new(EventBus::new());
    let misses = miss_recorder(&events);

    // echo the first three probes, then go quiet
    tokio::spawn(async move {
        let mut answered = 0;
        while answered < 3 {
            match peer.recv_packet().await {
                Ok((SocketStatus::Success, Some(Packet::ServerHeartbeat { nonce }))) => {
                    peer.send_packet(&Packet::ServerHeartbeatAck { nonce })
                        .await
                        .unwrap();
                    answered += 1;
                }
                Ok((SocketStatus::TimedOut, _)) => continue,
                _ => return,
            }
        }
        // stay connected but unresponsive
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let mut conn = Connection::new(client_socket, events, Role::Client);
    let result = conn.recv_batch().await;
    assert!(matches!(result, Err(ProtocolError::ConnectionTimedOut)));

    let recorded = misses.lock().unwrap().clone();
    // the final stretch is an unbroken climb to six
    assert_eq!(recorded[recorded.len() - 6..], [1, 2, 3, 4, 5, 6]);
    // each answered probe reset the counter back to one
    let ones = recorded.iter().filter(|&&m| m == 1).count();
    assert!(ones >= 4, "expected resets in {recorded:?}");
}

#[tokio::test]
async fn peer_probes_are_echoed_without_touching_the_counter() {
    let (client_socket, mut peer) = socket_pair(Duration::from_millis(200)).await;
    let events = Arc::new(EventBus::new());
    let misses = miss_recorder(&events);
    let probed = Arc::new(Mutex::new(None::<u16>));
    {
        let probed = probed.clone();
        events.on(
            Event::Heartbeat,
            Arc::new(move |args| {
                if let EventArgs::Nonce(nonce) = args {
                    *probed.lock().unwrap() = Some(*nonce);
                }
                Ok(())
            }),
        );
    }

    let (ack_tx, ack_rx) = oneshot::channel();
    tokio::spawn(async move {
        // probe the client, collect the echo, then deliver an app packet
        peer.send_packet(&Packet::ClientHeartbeat { nonce: 77 })
            .await
            .unwrap();
        loop {
            if let Ok((SocketStatus::Success, Some(Packet::ClientHeartbeatAck { nonce }))) =
                peer.recv_packet().await
            {
                let _ = ack_tx.send(nonce);
                break;
            }
        }
        peer.send_packet(&Packet::ServerMessage {
            mid: 17,
            channel: 16,
            content: "still here".to_string(),
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let mut conn = Connection::new(client_socket, events, Role::Client);
    let batch = conn.recv_batch().await.unwrap();

    // the echo carried the peer's nonce back
    assert_eq!(ack_rx.await.unwrap(), 77);
    assert_eq!(*probed.lock().unwrap(), Some(77));
    // the app packet was delivered as a healthy-link batch
    assert_eq!(
        batch,
        vec![Packet::ServerMessage {
            mid: 17,
            channel: 16,
            content: "still here".to_string(),
        }]
    );
    // prompt echoes never cost a miss
    assert!(misses.lock().unwrap().is_empty());
}

#[tokio::test]
async fn broken_peer_surfaces_as_connection_closed() {
    let (client_socket, mut peer) = socket_pair(Duration::from_millis(200)).await;
    peer.close().await;

    let events = Arc::new(EventBus::new());
    let broken = Arc::new(Mutex::new(false));
    {
        let broken = broken.clone();
        events.on(
            Event::SocketBroken,
            Arc::new(move |_| {
                *broken.lock().unwrap() = true;
                Ok(())
            }),
        );
    }

    let mut conn = Connection::new(client_socket, events, Role::Client);
    let result = conn.recv_batch().await;
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    assert!(*broken.lock().unwrap());
}
