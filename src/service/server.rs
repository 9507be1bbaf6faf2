//! Server side of the protocol: accept loop, per-connection sessions,
//! and best-effort broadcast.
//!
//! Every accepted connection gets its own tokio task running the mirrored
//! handshake, login, and steady-state loop. Sessions never touch each
//! other's sockets: cross-session delivery (broadcast, kicks) goes through
//! each session's command channel and is drained by that session's own
//! loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{NetworkConfig, IMPLEMENTATION, PROTOCOL_VERSION};
use crate::crypto::{establish, fingerprint, select_suite, KeyStore, SUPPORTED_SUITES};
use crate::error::{ProtocolError, Result};
use crate::protocol::events::{Event, EventArgs, EventBus, Handler};
use crate::protocol::packet::{Packet, PacketKind, Side, User};
use crate::protocol::registry::ProtocolRegistry;
use crate::service::connection::{Command, Connection, Role};
use crate::transport::socket::ProtoSocket;

/// Characters a username may contain.
fn username_allowed(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
}

/// Hook object a server application implements. All hooks are optional
/// and failure-isolated.
pub trait ServerApp: Send + Sync {
    /// Runs when a session finishes login, before registered handlers.
    fn on_login_complete(&self, _cx: &SessionContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs when a logged-in session ends, for any reason.
    fn on_disconnect(&self, _cx: &SessionContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs for every application packet a session delivers.
    fn handle_packet(&self, _cx: &SessionContext<'_>, _packet: &Packet) -> Result<()> {
        Ok(())
    }
}

impl ServerApp for () {}

/// What a [`ServerApp`] hook can see and do for one session.
pub struct SessionContext<'a> {
    pub session_id: u64,
    pub username: &'a str,
    pub fingerprint: u64,
    /// The client's implementation tag, for feature gating.
    pub client_implementation: Option<&'a str>,
    pub sessions: &'a Sessions,
    pub events: &'a Arc<EventBus>,
}

impl SessionContext<'_> {
    /// This session's user identity.
    pub fn user(&self) -> User {
        User {
            username: self.username.to_string(),
            fingerprint: self.fingerprint,
        }
    }

    /// Queue a packet back to this session's client.
    pub fn reply(&self, packet: Packet) {
        self.sessions.send_to(self.session_id, packet);
    }

    /// Queue a packet to every connected client except `except`.
    pub fn broadcast(&self, packet: &Packet, except: &[u64]) {
        self.sessions.broadcast(packet, except);
    }
}

/// Shared registry of live sessions.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub id: u64,
    pub addr: SocketAddr,
    pub username: String,
    pub original_username: String,
    pub username_n: u32,
    pub fingerprint: u64,
    pub logged_in: bool,
    commands: mpsc::UnboundedSender<Command>,
}

#[derive(Default)]
pub struct Sessions {
    inner: Mutex<HashMap<u64, SessionHandle>>,
}

impl Sessions {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, SessionHandle>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn insert(&self, handle: SessionHandle) {
        self.lock().insert(handle.id, handle);
    }

    fn remove(&self, id: u64) -> Option<SessionHandle> {
        self.lock().remove(&id)
    }

    fn update<F: FnOnce(&mut SessionHandle)>(&self, id: u64, mutate: F) {
        if let Some(handle) = self.lock().get_mut(&id) {
            mutate(handle);
        }
    }

    /// Number of live sessions, logged in or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of one session.
    pub fn get(&self, id: u64) -> Option<SessionHandle> {
        self.lock().get(&id).cloned()
    }

    /// Snapshot of every logged-in session.
    pub fn logged_in(&self) -> Vec<SessionHandle> {
        self.lock()
            .values()
            .filter(|handle| handle.logged_in)
            .cloned()
            .collect()
    }

    /// Queue a packet to one session. Returns false if it is gone.
    pub fn send_to(&self, id: u64, packet: Packet) -> bool {
        match self.lock().get(&id) {
            Some(handle) => handle
                .commands
                .send(Command::Send {
                    packet,
                    reply: None,
                })
                .is_ok(),
            None => false,
        }
    }

    /// Best-effort fan-out to every logged-in session except `except`.
    /// Individual failures are ignored; other peers still receive theirs.
    pub fn broadcast(&self, packet: &Packet, except: &[u64]) {
        for handle in self.lock().values() {
            if !handle.logged_in || except.contains(&handle.id) {
                continue;
            }
            let _ = handle.commands.send(Command::Send {
                packet: packet.clone(),
                reply: None,
            });
        }
    }

    /// Kick one session: its loop sends the reason, then tears down.
    pub fn kick(&self, id: u64, reason: String) {
        if let Some(handle) = self.lock().get(&id) {
            let _ = handle.commands.send(Command::Send {
                packet: Packet::Kick { reason },
                reply: None,
            });
            let _ = handle.commands.send(Command::Close { reply: None });
        }
    }

    fn kick_all(&self, reason: &str) {
        let ids: Vec<u64> = self.lock().keys().copied().collect();
        for id in ids {
            self.kick(id, reason.to_string());
        }
    }
}

/// One server endpoint.
pub struct Server {
    config: NetworkConfig,
    registry: Arc<ProtocolRegistry>,
    keys: KeyStore,
    events: Arc<EventBus>,
    sessions: Arc<Sessions>,
    listener: Option<TcpListener>,
}

impl Server {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            registry: Arc::new(ProtocolRegistry::standard()),
            keys: KeyStore::new(),
            events: Arc::new(EventBus::new()),
            sessions: Arc::new(Sessions::default()),
            listener: None,
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

    /// Register an event handler on the server-wide bus.
    pub fn on(&self, event: Event, handler: Handler) {
        self.events.on(event, handler);
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// The live session registry, usable for broadcast from outside hooks.
    pub fn sessions(&self) -> Arc<Sessions> {
        self.sessions.clone()
    }

    /// Bind the listen socket and return the bound address (useful with
    /// an ephemeral port).
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.config.server.address).await?;
        let addr = listener.local_addr()?;
        info!(address = %addr, "listening");
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Serve until CTRL+C.
    pub async fn serve(self, app: Arc<dyn ServerApp>) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });
        self.serve_with_shutdown(app, shutdown_rx).await
    }

    /// Serve until the shutdown channel fires, then disconnect clients
    /// and drain with a timeout.
    #[instrument(skip_all)]
    pub async fn serve_with_shutdown(
        mut self,
        app: Arc<dyn ServerApp>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => {
                let listener = TcpListener::bind(&self.config.server.address).await?;
                info!(address = %listener.local_addr()?, "listening");
                listener
            }
        };

        let keys = Arc::new(std::mem::take(&mut self.keys));
        let next_id = Arc::new(AtomicU64::new(1));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("shutting down, disconnecting clients");
                    self.sessions.kick_all("Server closed");

                    let deadline = tokio::time::sleep(self.config.server.shutdown_timeout);
                    tokio::pin!(deadline);
                    loop {
                        tokio::select! {
                            _ = &mut deadline => {
                                warn!("shutdown timeout reached, forcing exit");
                                break;
                            }
                            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                                if self.sessions.is_empty() {
                                    info!("all sessions closed");
                                    break;
                                }
                            }
                        }
                    }
                    return Ok(());
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            self.spawn_session(stream, addr, app.clone(), keys.clone(), &next_id);
                        }
                        Err(e) => {
                            error!(error = %e, "error accepting connection");
                        }
                    }
                }
            }
        }
    }

    fn spawn_session(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        app: Arc<dyn ServerApp>,
        keys: Arc<KeyStore>,
        next_id: &Arc<AtomicU64>,
    ) {
        let id = next_id.fetch_add(1, Ordering::Relaxed);
        debug!(peer = %addr, session = id, "connection accepted");

        let socket = ProtoSocket::from_stream(
            stream,
            self.registry.clone(),
            Side::Serverbound,
            self.config.transport.compression,
        )
        .with_timeouts(
            self.config.server.recv_timeout,
            self.config.server.recv_timeout,
        );
        let conn = Connection::new(socket, self.events.clone(), Role::Server);

        let over_capacity = self.sessions.len() >= self.config.server.max_connections;
        self.sessions.insert(SessionHandle {
            id,
            addr,
            username: String::new(),
            original_username: String::new(),
            username_n: 0,
            fingerprint: 0,
            logged_in: false,
            commands: conn.command_sender(),
        });

        let mut session = Session {
            id,
            addr,
            conn,
            app,
            keys,
            sessions: self.sessions.clone(),
            events: self.events.clone(),
            username: String::new(),
            client_implementation: None,
            fingerprint: 0,
            logged_in: false,
        };

        tokio::spawn(async move {
            if over_capacity {
                session.conn.kick("Server is full".to_string()).await;
                session.sessions.remove(session.id);
                return;
            }
            let outcome = session.run().await;
            session.finish(outcome).await;
        });
    }
}

/// One accepted connection, driven by its own task.
struct Session {
    id: u64,
    addr: SocketAddr,
    conn: Connection,
    app: Arc<dyn ServerApp>,
    keys: Arc<KeyStore>,
    sessions: Arc<Sessions>,
    events: Arc<EventBus>,
    username: String,
    client_implementation: Option<String>,
    fingerprint: u64,
    logged_in: bool,
}

impl Session {
    async fn run(&mut self) -> Result<()> {
        self.handshake().await?;
        self.login().await?;

        self.invoke_hook(|app, cx| app.on_login_complete(cx));
        self.events.emit(
            Event::LoginComplete,
            &EventArgs::User(User {
                username: self.username.clone(),
                fingerprint: self.fingerprint,
            }),
        );

        loop {
            let batch = self.conn.recv_batch().await?;
            for packet in batch {
                self.invoke_hook(|app, cx| app.handle_packet(cx, &packet));
            }
        }
    }

    /// Mirror of the client's opening sequence.
    #[instrument(skip(self), fields(peer = %self.addr, session = self.id))]
    async fn handshake(&mut self) -> Result<()> {
        let version = match self.conn.recv_expect(PacketKind::HelloRequest).await? {
            Packet::HelloRequest { version } => version,
            packet => {
                return Err(ProtocolError::UnexpectedPacket {
                    expected: "HelloRequest",
                    got: packet.name(),
                })
            }
        };
        if version != PROTOCOL_VERSION {
            let reason =
                format!("Mismatched versions: Client={version}, Server={PROTOCOL_VERSION}");
            self.conn.kick(reason).await;
            return Err(ProtocolError::VersionMismatch {
                client: version,
                server: PROTOCOL_VERSION,
            });
        }
        self.conn
            .send(&Packet::HelloReply {
                version: PROTOCOL_VERSION,
            })
            .await?;
        self.events.emit(Event::Hello, &EventArgs::None);

        let suites = match self.conn.recv_expect(PacketKind::EncryptionSupported).await? {
            Packet::EncryptionSupported { suites } => suites,
            packet => {
                return Err(ProtocolError::UnexpectedPacket {
                    expected: "EncryptionSupported",
                    got: packet.name(),
                })
            }
        };
        let Some(index) = select_suite(&suites, SUPPORTED_SUITES) else {
            self.conn
                .kick("Couldn't agree on encryption".to_string())
                .await;
            return Err(ProtocolError::NoCommonSuite);
        };
        self.conn
            .send(&Packet::EncryptionSelect {
                index: index as u16,
            })
            .await?;
        let suite = suites[index].clone();
        debug!(suite = %suite, "cipher suite negotiated");

        let Some(keypair) = self.keys.get(&suite) else {
            self.conn
                .kick(format!("Server has no key for suite {suite}"))
                .await;
            return Err(ProtocolError::NoKeyLoaded(suite));
        };
        let client_key = match self.conn.recv_expect(PacketKind::ClientPubKey).await? {
            Packet::ClientPubKey { key } => key,
            packet => {
                return Err(ProtocolError::UnexpectedPacket {
                    expected: "ClientPubKey",
                    got: packet.name(),
                })
            }
        };
        let cipher = match establish(&suite, keypair, &client_key) {
            Ok(cipher) => cipher,
            Err(e) => {
                self.conn.kick("Key exchange failed".to_string()).await;
                return Err(e);
            }
        };
        self.conn
            .send(&Packet::ServerPubKey {
                key: keypair.public_material(),
            })
            .await?;
        self.conn.set_cipher(cipher);
        self.fingerprint = fingerprint(&client_key);
        self.events
            .emit(Event::Encrypted, &EventArgs::KeyMaterial(client_key));
        debug!("transport encrypted");
        Ok(())
    }

    async fn login(&mut self) -> Result<()> {
        let requested = match self.conn.recv_expect(PacketKind::LoginRequest).await? {
            Packet::LoginRequest { username } => username,
            packet => {
                return Err(ProtocolError::UnexpectedPacket {
                    expected: "LoginRequest",
                    got: packet.name(),
                })
            }
        };
        if !username_allowed(&requested) {
            self.conn
                .kick("Unallowed characters in username".to_string())
                .await;
            return Err(ProtocolError::InvalidUsername);
        }

        // rename on collision: one past the highest suffix already in use
        // among sessions that requested the same original name
        let mut suffix = 0;
        for handle in self.sessions.lock().values() {
            if handle.id == self.id || handle.original_username != requested {
                continue;
            }
            suffix = suffix.max(handle.username_n + 1);
        }
        self.username = if suffix == 0 {
            requested.clone()
        } else {
            format!("{requested}_{suffix}")
        };

        self.conn
            .send(&Packet::LoginReply {
                username: self.username.clone(),
            })
            .await?;

        // implementation tags: ours first, then the client's
        self.conn
            .send(&Packet::ServerImplementation {
                tag: IMPLEMENTATION.to_string(),
            })
            .await?;
        let tag = match self
            .conn
            .recv_expect(PacketKind::ClientImplementation)
            .await?
        {
            Packet::ClientImplementation { tag } => tag,
            packet => {
                return Err(ProtocolError::UnexpectedPacket {
                    expected: "ClientImplementation",
                    got: packet.name(),
                })
            }
        };
        self.client_implementation = Some(tag);
        self.logged_in = true;

        let username = self.username.clone();
        let fingerprint = self.fingerprint;
        self.sessions.update(self.id, |handle| {
            handle.username = username.clone();
            handle.original_username = requested.clone();
            handle.username_n = suffix;
            handle.fingerprint = fingerprint;
            handle.logged_in = true;
        });
        self.events.emit(
            Event::UinfoNegotiated,
            &EventArgs::Username(self.username.clone()),
        );
        info!(peer = %self.addr, username = %self.username, "login complete");
        Ok(())
    }

    fn invoke_hook<F>(&self, hook: F)
    where
        F: FnOnce(&dyn ServerApp, &SessionContext<'_>) -> Result<()>,
    {
        let cx = SessionContext {
            session_id: self.id,
            username: &self.username,
            fingerprint: self.fingerprint,
            client_implementation: self.client_implementation.as_deref(),
            sessions: &self.sessions,
            events: &self.events,
        };
        if let Err(e) = hook(self.app.as_ref(), &cx) {
            warn!(error = %e, "server hook failed, ignoring");
            self.events
                .emit(Event::Exception, &EventArgs::Error(e.to_string()));
        }
    }

    /// Tear down after the loop ends, for any reason.
    async fn finish(&mut self, outcome: Result<()>) {
        match &outcome {
            Ok(()) => debug!(peer = %self.addr, "session ended"),
            Err(e) => debug!(peer = %self.addr, error = %e, "session ended"),
        }
        self.conn.close().await;
        self.sessions.remove(self.id);
        if self.logged_in {
            self.invoke_hook(|app, cx| app.on_disconnect(cx));
        }
    }
}
