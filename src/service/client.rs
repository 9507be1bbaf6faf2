//! Client side of the protocol: handshake, login, and the serve loop.
//!
//! A [`Client`] drives one connection through
//! `Hello → EncryptionNegotiating → KeyExchanging → Encrypted → LoggingIn →
//! Connected`. Application code observes it through the event bus and a
//! [`ClientApp`] hook object, and steers it from other tasks through a
//! [`ClientHandle`] command channel.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::config::{NetworkConfig, IMPLEMENTATION, PROTOCOL_VERSION};
use crate::crypto::{establish, fingerprint, supported_suite_names, KeyStore};
use crate::error::{ProtocolError, Result};
use crate::protocol::events::{Event, EventArgs, EventBus, Handler};
use crate::protocol::packet::{Packet, PacketKind};
use crate::protocol::registry::ProtocolRegistry;
use crate::service::connection::{Command, Connection, Role};
use crate::transport::socket::ProtoSocket;

/// Hook object a client application implements. The default methods make
/// every hook optional. Hook failures are isolated like event handler
/// failures: routed to [`Event::Exception`], never fatal.
pub trait ClientApp: Send {
    /// Runs once the handshake and login both finished, before registered
    /// `LoginComplete` handlers.
    fn on_login_complete(&mut self, _cx: &ClientContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs for every application packet in a delivered batch.
    fn handle_packet(&mut self, _cx: &ClientContext<'_>, _packet: &Packet) -> Result<()> {
        Ok(())
    }
}

impl ClientApp for () {}

/// What a [`ClientApp`] hook can see and do.
pub struct ClientContext<'a> {
    /// Final username after server-side collision renaming.
    pub username: &'a str,
    /// The server's implementation tag, for feature gating.
    pub server_implementation: Option<&'a str>,
    /// Fingerprint of the server's public key.
    pub server_fingerprint: Option<u64>,
    /// The connection's event bus.
    pub events: &'a Arc<EventBus>,
    commands: &'a mpsc::UnboundedSender<Command>,
}

impl ClientContext<'_> {
    /// Queue a packet; it is written on the next receive cycle.
    pub fn send(&self, packet: Packet) {
        let _ = self.commands.send(Command::Send {
            packet,
            reply: None,
        });
    }
}

/// Cloneable handle for driving a connection from another task.
///
/// Each call marshals a request into the connection's own loop and waits
/// on a per-call reply channel, so no task but the loop ever touches the
/// socket.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ClientHandle {
    /// Send a packet and wait until it is written.
    pub async fn send(&self, packet: Packet) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                packet,
                reply: Some(tx),
            })
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        rx.await.map_err(|_| ProtocolError::ConnectionClosed)?
    }

    /// Send a chat message to a channel.
    pub async fn send_message(&self, channel: u64, content: impl Into<String>) -> Result<()> {
        self.send(Packet::SendMessage {
            channel,
            content: content.into(),
        })
        .await
    }

    /// Ask the server for the connected user list.
    pub async fn request_user_list(&self) -> Result<()> {
        self.send(Packet::UserListRequest).await
    }

    /// Ask the server for the channel list.
    pub async fn request_channel_list(&self) -> Result<()> {
        self.send(Packet::ChannelListRequest).await
    }

    /// Close the connection and wait for the loop to acknowledge.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Close { reply: Some(tx) })
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

/// One client endpoint.
pub struct Client {
    config: NetworkConfig,
    registry: Arc<ProtocolRegistry>,
    keys: KeyStore,
    events: Arc<EventBus>,
    username: String,
    original_username: String,
    server_implementation: Option<String>,
    server_fingerprint: Option<u64>,
    conn: Option<Connection>,
}

impl Client {
    /// Build a client from configuration; the desired username comes from
    /// `config.client.username`.
    pub fn new(config: NetworkConfig) -> Self {
        let username = config.client.username.clone();
        Self {
            config,
            registry: Arc::new(ProtocolRegistry::standard()),
            keys: KeyStore::new(),
            events: Arc::new(EventBus::new()),
            username: username.clone(),
            original_username: username,
            server_implementation: None,
            server_fingerprint: None,
            conn: None,
        }
    }

    /// Generate a fresh keypair for `suite`.
    pub fn generate_key(&mut self, suite: &str) -> Result<()> {
        self.keys.generate_key(suite)
    }

    /// Load a persisted keypair for `suite`.
    pub fn load_key(&mut self, suite: &str, key_bytes: &[u8]) -> Result<()> {
        self.keys.load_key(suite, key_bytes)
    }

    /// Register an event handler.
    pub fn on(&self, event: Event, handler: Handler) {
        self.events.on(event, handler);
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Username after negotiation (may differ from the requested one).
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The server's implementation tag, known after login.
    pub fn server_implementation(&self) -> Option<&str> {
        self.server_implementation.as_deref()
    }

    /// Fingerprint of the server's public key, known once encrypted.
    pub fn server_fingerprint(&self) -> Option<u64> {
        self.server_fingerprint
    }

    /// A command handle for other tasks. Available once connected.
    pub fn handle(&self) -> Option<ClientHandle> {
        self.conn.as_ref().map(|conn| ClientHandle {
            commands: conn.command_sender(),
        })
    }

    /// Connect, handshake, and log in. A no-op when already connected.
    pub async fn connect(&mut self) -> Result<()> {
        if self.conn.is_none() {
            self.establish_session().await?;
            self.events.emit(Event::LoginComplete, &EventArgs::None);
        }
        Ok(())
    }

    /// Connect, then process inbound batches through `app` until the
    /// connection ends. A close requested via [`ClientHandle::close`]
    /// returns `Ok(())`; every other exit is the terminating error.
    pub async fn serve<A: ClientApp>(&mut self, app: &mut A) -> Result<()> {
        if self.conn.is_none() {
            self.establish_session().await?;
        }

        let commands = match &self.conn {
            Some(conn) => conn.command_sender(),
            None => return Err(ProtocolError::ConnectionClosed),
        };

        let cx = ClientContext {
            username: &self.username,
            server_implementation: self.server_implementation.as_deref(),
            server_fingerprint: self.server_fingerprint,
            events: &self.events,
            commands: &commands,
        };
        if let Err(e) = app.on_login_complete(&cx) {
            warn!(error = %e, "login hook failed, ignoring");
            self.events
                .emit(Event::Exception, &EventArgs::Error(e.to_string()));
        }
        self.events.emit(Event::LoginComplete, &EventArgs::None);

        loop {
            let conn = self
                .conn
                .as_mut()
                .ok_or(ProtocolError::ConnectionClosed)?;
            let batch = match conn.recv_batch().await {
                Ok(batch) => batch,
                Err(ProtocolError::ConnectionClosed) if conn.close_requested() => {
                    info!("connection closed on request");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            for packet in batch {
                let cx = ClientContext {
                    username: &self.username,
                    server_implementation: self.server_implementation.as_deref(),
                    server_fingerprint: self.server_fingerprint,
                    events: &self.events,
                    commands: &commands,
                };
                if let Err(e) = app.handle_packet(&cx, &packet) {
                    warn!(error = %e, kind = %packet.kind(), "packet hook failed, ignoring");
                    self.events
                        .emit(Event::Exception, &EventArgs::Error(e.to_string()));
                }
            }
        }
    }

    /// Close the connection, if any. Idempotent.
    pub async fn close(&mut self) {
        if let Some(conn) = &mut self.conn {
            conn.close().await;
        }
        self.conn = None;
    }

    /// Run the full opening sequence: hello, encryption negotiation, key
    /// exchange, login, implementation-tag exchange.
    #[instrument(skip(self), fields(addr = %self.config.client.address))]
    async fn establish_session(&mut self) -> Result<()> {
        let socket = ProtoSocket::connect(
            &self.config.client.address,
            self.registry.clone(),
            self.config.transport.compression,
            self.config.client.connect_timeout,
        )
        .await?
        .with_timeouts(
            self.config.client.send_timeout,
            self.config.client.recv_timeout,
        );
        let mut conn = Connection::new(socket, self.events.clone(), Role::Client);

        // hello: versions must match exactly, the server enforces it
        conn.send(&Packet::HelloRequest {
            version: PROTOCOL_VERSION,
        })
        .await?;
        conn.recv_expect(PacketKind::HelloReply).await?;
        self.events.emit(Event::Hello, &EventArgs::None);
        debug!("hello exchange complete");

        // encryption negotiation: offer everything we support
        let offered = supported_suite_names();
        conn.send(&Packet::EncryptionSupported {
            suites: offered.clone(),
        })
        .await?;
        let index = match conn.recv_expect(PacketKind::EncryptionSelect).await? {
            Packet::EncryptionSelect { index } => index as usize,
            packet => {
                return Err(ProtocolError::UnexpectedPacket {
                    expected: "EncryptionSelect",
                    got: packet.name(),
                })
            }
        };
        let suite = offered
            .get(index)
            .cloned()
            .ok_or_else(|| {
                ProtocolError::KeyExchange("selected suite index out of range".to_string())
            })?;
        debug!(suite = %suite, "cipher suite negotiated");

        // key exchange under the selected suite
        let keypair = self
            .keys
            .get(&suite)
            .ok_or_else(|| ProtocolError::NoKeyLoaded(suite.clone()))?;
        conn.send(&Packet::ClientPubKey {
            key: keypair.public_material(),
        })
        .await?;
        let server_key = match conn.recv_expect(PacketKind::ServerPubKey).await? {
            Packet::ServerPubKey { key } => key,
            packet => {
                return Err(ProtocolError::UnexpectedPacket {
                    expected: "ServerPubKey",
                    got: packet.name(),
                })
            }
        };
        conn.set_cipher(establish(&suite, keypair, &server_key)?);
        self.server_fingerprint = Some(fingerprint(&server_key));
        self.events
            .emit(Event::Encrypted, &EventArgs::KeyMaterial(server_key));
        debug!("transport encrypted");

        // login: the server may rename us on collision
        conn.send(&Packet::LoginRequest {
            username: self.original_username.clone(),
        })
        .await?;
        let username = match conn.recv_expect(PacketKind::LoginReply).await? {
            Packet::LoginReply { username } => username,
            packet => {
                return Err(ProtocolError::UnexpectedPacket {
                    expected: "LoginReply",
                    got: packet.name(),
                })
            }
        };
        self.username = username;
        self.events.emit(
            Event::UinfoNegotiated,
            &EventArgs::Username(self.username.clone()),
        );

        // implementation tags: server first, then ours
        let tag = match conn.recv_expect(PacketKind::ServerImplementation).await? {
            Packet::ServerImplementation { tag } => tag,
            packet => {
                return Err(ProtocolError::UnexpectedPacket {
                    expected: "ServerImplementation",
                    got: packet.name(),
                })
            }
        };
        self.server_implementation = Some(tag);
        conn.send(&Packet::ClientImplementation {
            tag: IMPLEMENTATION.to_string(),
        })
        .await?;

        info!(username = %self.username, "logged in");
        self.conn = Some(conn);
        Ok(())
    }
}
