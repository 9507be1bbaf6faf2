//! Connection core shared by client and server.
//!
//! Both roles run the same steady-state loop over one
//! [`ProtoSocket`]: receive with a timeout, count missed heartbeat rounds,
//! echo the peer's probes, and hand application packets back in batches.
//! Outbound traffic from other tasks (broadcasts, UI commands) arrives
//! through a command channel drained by this loop — one task owns the
//! socket, cross-task delivery is message passing only.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::HEARTBEAT_MISS_LIMIT;
use crate::error::{ProtocolError, Result};
use crate::protocol::events::{Event, EventArgs, EventBus};
use crate::protocol::packet::{Packet, PacketKind};
use crate::transport::socket::{ProtoSocket, SocketStatus};

/// Which side of the link this connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Request marshalled into the connection's loop from another task.
pub enum Command {
    /// Write a packet; the optional reply resolves once the send finished.
    Send {
        packet: Packet,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    /// Shut the connection down.
    Close { reply: Option<oneshot::Sender<()>> },
}

/// One side of an established link, owning the socket and the heartbeat
/// bookkeeping.
pub struct Connection {
    socket: ProtoSocket,
    events: Arc<EventBus>,
    role: Role,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    misses: u32,
    expected_nonce: Option<u16>,
    close_requested: bool,
}

impl Connection {
    pub fn new(socket: ProtoSocket, events: Arc<EventBus>, role: Role) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            socket,
            events,
            role,
            commands_tx,
            commands_rx,
            misses: 0,
            expected_nonce: None,
            close_requested: false,
        }
    }

    /// Sender other tasks use to marshal work into this connection's loop.
    pub fn command_sender(&self) -> mpsc::UnboundedSender<Command> {
        self.commands_tx.clone()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// True when the loop ended because a `Close` command asked it to.
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_open()
    }

    /// Swap the transport cipher (post key-exchange).
    pub fn set_cipher(&mut self, cipher: Box<dyn crate::crypto::FrameCipher>) {
        self.socket.set_cipher(cipher);
    }

    /// Close the link. Idempotent.
    pub async fn close(&mut self) {
        self.socket.close().await;
    }

    /// Send one packet, emitting `PacketSent` on success. Any transport
    /// fault surfaces as `ConnectionClosed` after `SocketBroken` fires.
    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        match self.socket.send_packet(packet).await? {
            SocketStatus::Success => {
                self.events
                    .emit(Event::PacketSent, &EventArgs::Packet(packet.clone()));
                Ok(())
            }
            status => {
                debug!(?status, "send failed");
                self.events.emit(Event::SocketBroken, &EventArgs::None);
                self.socket.close().await;
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Receive one packet, emitting `PacketReceived`. Protocol violations
    /// close the connection (a server tells the peer why first).
    pub async fn recv(&mut self) -> Result<(SocketStatus, Option<Packet>)> {
        match self.socket.recv_packet().await {
            Ok((status, packet)) => {
                if let Some(packet) = &packet {
                    self.events
                        .emit(Event::PacketReceived, &EventArgs::Packet(packet.clone()));
                }
                Ok((status, packet))
            }
            Err(e) => {
                if self.role == Role::Server {
                    let kick = Packet::Kick {
                        reason: format!("Protocol violation: {e}"),
                    };
                    let _ = self.socket.send_packet(&kick).await;
                }
                self.socket.close().await;
                Err(e)
            }
        }
    }

    /// Receive and require a packet of `expected` kind.
    ///
    /// A Kick terminates with the peer's reason; anything else unexpected
    /// is a protocol violation (a server replies with a Kick naming both
    /// kinds, a client just closes).
    pub async fn recv_expect(&mut self, expected: PacketKind) -> Result<Packet> {
        let (status, packet) = self.recv().await?;
        let packet = match status {
            SocketStatus::Success => packet.ok_or(ProtocolError::ConnectionClosed)?,
            SocketStatus::TimedOut => return Err(ProtocolError::Timeout),
            SocketStatus::Broken | SocketStatus::Unbound => {
                self.events.emit(Event::SocketBroken, &EventArgs::None);
                return Err(ProtocolError::ConnectionClosed);
            }
        };

        if packet.kind() == expected {
            return Ok(packet);
        }
        if let Packet::Kick { reason } = &packet {
            self.events
                .emit(Event::Kicked, &EventArgs::Reason(reason.clone()));
            self.socket.close().await;
            return Err(ProtocolError::Kicked(reason.clone()));
        }

        let got = packet.name();
        if self.role == Role::Server {
            self.kick(format!("Expected {}, got {}", expected.name(), got))
                .await;
        } else {
            self.socket.close().await;
        }
        Err(ProtocolError::UnexpectedPacket {
            expected: expected.name(),
            got,
        })
    }

    /// Send a Kick carrying `reason`, then tear down. Server role only.
    pub async fn kick(&mut self, reason: String) {
        let _ = self.socket.send_packet(&Packet::Kick { reason }).await;
        self.socket.close().await;
    }

    /// Steady-state receive loop.
    ///
    /// Returns the next batch of application packets once a receive cycle
    /// completes on a healthy link (zero pending heartbeat misses). Every
    /// cycle first drains marshalled commands, so broadcasts and UI sends
    /// never wait longer than one receive window.
    pub async fn recv_batch(&mut self) -> Result<Vec<Packet>> {
        let mut queue = Vec::new();
        loop {
            self.drain_commands().await?;

            let (status, packet) = self.recv().await?;
            match status {
                SocketStatus::TimedOut => {
                    let nonce = rand::random::<u16>();
                    self.expected_nonce = Some(nonce);
                    let request = self.heartbeat_request(nonce);
                    self.send(&request).await?;
                    self.misses += 1;
                    self.events
                        .emit(Event::HeartbeatMissed, &EventArgs::Missed(self.misses));
                    if self.misses >= HEARTBEAT_MISS_LIMIT {
                        warn!(misses = self.misses, "peer unresponsive, disconnecting");
                        self.socket.close().await;
                        return Err(ProtocolError::ConnectionTimedOut);
                    }
                    continue;
                }
                SocketStatus::Broken | SocketStatus::Unbound => {
                    self.events.emit(Event::SocketBroken, &EventArgs::None);
                    return Err(ProtocolError::ConnectionClosed);
                }
                SocketStatus::Success => {}
            }
            let Some(packet) = packet else { continue };

            if let Some(nonce) = self.probe_ack_nonce(&packet) {
                if self.expected_nonce == Some(nonce) {
                    self.misses = 0;
                    self.expected_nonce = None;
                }
                continue;
            }
            if let Some(nonce) = self.peer_probe_nonce(&packet) {
                self.events.emit(Event::Heartbeat, &EventArgs::Nonce(nonce));
                let reply = self.heartbeat_reply(nonce);
                self.send(&reply).await?;
                continue;
            }
            if let Packet::Kick { reason } = &packet {
                self.events
                    .emit(Event::Kicked, &EventArgs::Reason(reason.clone()));
                let reason = reason.clone();
                self.socket.close().await;
                return Err(ProtocolError::Kicked(reason));
            }

            queue.push(packet);
            if self.misses == 0 {
                return Ok(queue);
            }
        }
    }

    async fn drain_commands(&mut self) -> Result<()> {
        loop {
            match self.commands_rx.try_recv() {
                Ok(Command::Send { packet, reply }) => {
                    let result = self.send(&packet).await;
                    let failed = result.is_err();
                    if let Some(tx) = reply {
                        let _ = tx.send(result);
                    }
                    if failed {
                        return Err(ProtocolError::ConnectionClosed);
                    }
                }
                Ok(Command::Close { reply }) => {
                    self.close_requested = true;
                    self.socket.close().await;
                    if let Some(tx) = reply {
                        let _ = tx.send(());
                    }
                    return Err(ProtocolError::ConnectionClosed);
                }
                Err(_) => return Ok(()),
            }
        }
    }

    /// Our liveness probe toward the peer.
    fn heartbeat_request(&self, nonce: u16) -> Packet {
        match self.role {
            Role::Client => Packet::ServerHeartbeat { nonce },
            Role::Server => Packet::ClientHeartbeat { nonce },
        }
    }

    /// Echo of a probe the peer sent us.
    fn heartbeat_reply(&self, nonce: u16) -> Packet {
        match self.role {
            Role::Client => Packet::ClientHeartbeatAck { nonce },
            Role::Server => Packet::ServerHeartbeatAck { nonce },
        }
    }

    /// Nonce inside an ack answering our own probe, if this is one.
    fn probe_ack_nonce(&self, packet: &Packet) -> Option<u16> {
        match (self.role, packet) {
            (Role::Client, Packet::ServerHeartbeatAck { nonce }) => Some(*nonce),
            (Role::Server, Packet::ClientHeartbeatAck { nonce }) => Some(*nonce),
            _ => None,
        }
    }

    /// Nonce inside a probe the peer wants echoed, if this is one.
    fn peer_probe_nonce(&self, packet: &Packet) -> Option<u16> {
        match (self.role, packet) {
            (Role::Client, Packet::ClientHeartbeat { nonce }) => Some(*nonce),
            (Role::Server, Packet::ServerHeartbeat { nonce }) => Some(*nonce),
            _ => None,
        }
    }
}
