//! Chat state built on top of the protocol: users, channels, and message
//! history, in mirrored server and client applications.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::config::IMPLEMENTATION;
use crate::error::Result;
use crate::protocol::events::{Event, EventArgs};
use crate::protocol::packet::{Packet, User};
use crate::service::client::{ClientApp, ClientContext};
use crate::service::server::{ServerApp, SessionContext, Sessions};
use crate::utils::identifier::{IdAllocator, Universe};

/// One chat message. `author` of `None` means the server wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub mid: u64,
    pub channel: u64,
    pub author: Option<u64>,
    pub content: String,
}

/// A channel and its append-only message history.
#[derive(Debug, Clone)]
pub struct Channel {
    pub cid: u64,
    pub name: String,
    pub messages: Vec<ChatMessage>,
}

impl Channel {
    pub fn new(cid: u64, name: impl Into<String>) -> Self {
        Self {
            cid,
            name: name.into(),
            messages: Vec::new(),
        }
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }
}

#[derive(Default)]
struct ChatState {
    users: Vec<User>,
    channels: Vec<Channel>,
}

/// Server-side chat application: answers list requests, mints message
/// ids, keeps history, and fans out joins, leaves, and messages.
pub struct ChatServer {
    sessions: Arc<Sessions>,
    ids: IdAllocator,
    state: Mutex<ChatState>,
}

impl ChatServer {
    /// Build the app with a default "main" channel.
    pub fn new(sessions: Arc<Sessions>) -> Self {
        let ids = IdAllocator::new();
        let mut state = ChatState::default();
        let cid = ids.next(Universe::Channel);
        state.channels.push(Channel::new(cid, "main"));
        Self {
            sessions,
            ids,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Create a channel and return its id.
    pub fn add_channel(&self, name: impl Into<String>) -> u64 {
        let cid = self.ids.next(Universe::Channel);
        self.lock().channels.push(Channel::new(cid, name));
        cid
    }

    /// Snapshot of the connected users.
    pub fn users(&self) -> Vec<User> {
        self.lock().users.clone()
    }

    /// Snapshot of (id, name) for every channel.
    pub fn channels(&self) -> Vec<(u64, String)> {
        self.lock()
            .channels
            .iter()
            .map(|channel| (channel.cid, channel.name.clone()))
            .collect()
    }

    /// Snapshot of one channel's history.
    pub fn channel_history(&self, cid: u64) -> Option<Vec<ChatMessage>> {
        self.lock()
            .channels
            .iter()
            .find(|channel| channel.cid == cid)
            .map(|channel| channel.messages.clone())
    }

    /// Post a server-authored message to a channel and fan it out.
    /// Returns the minted message id, or `None` for an unknown channel.
    pub fn server_message(&self, channel: u64, content: impl Into<String>) -> Option<u64> {
        let content = content.into();
        let mid = {
            let mut state = self.lock();
            let target = state.channels.iter_mut().find(|c| c.cid == channel)?;
            let mid = self.ids.next(Universe::Message);
            target.push_message(ChatMessage {
                mid,
                channel,
                author: None,
                content: content.clone(),
            });
            mid
        };
        self.sessions.broadcast(
            &Packet::ServerMessage {
                mid,
                channel,
                content,
            },
            &[],
        );
        Some(mid)
    }
}

impl ServerApp for ChatServer {
    fn on_login_complete(&self, cx: &SessionContext<'_>) -> Result<()> {
        let user = cx.user();
        self.lock().users.push(user.clone());
        cx.broadcast(&Packet::UserJoined { user }, &[]);
        debug!(username = %cx.username, "user joined");
        Ok(())
    }

    fn on_disconnect(&self, cx: &SessionContext<'_>) -> Result<()> {
        let fingerprint = cx.fingerprint;
        self.lock().users.retain(|user| user.fingerprint != fingerprint);
        cx.broadcast(&Packet::UserLeft { fingerprint }, &[cx.session_id]);
        debug!(username = %cx.username, "user left");
        Ok(())
    }

    fn handle_packet(&self, cx: &SessionContext<'_>, packet: &Packet) -> Result<()> {
        match packet {
            Packet::UserListRequest => {
                let users = self
                    .lock()
                    .users
                    .iter()
                    .map(|user| (user.fingerprint, user.username.clone()))
                    .collect();
                cx.reply(Packet::UserListResponse { users });
            }
            Packet::ChannelListRequest => {
                let channels = self
                    .lock()
                    .channels
                    .iter()
                    .map(|channel| (channel.cid, channel.name.clone()))
                    .collect();
                cx.reply(Packet::ChannelListResponse { channels });
            }
            Packet::SendMessage { channel, content } => {
                let mid = {
                    let mut state = self.lock();
                    let Some(target) = state.channels.iter_mut().find(|c| c.cid == *channel)
                    else {
                        debug!(channel, "message to unknown channel ignored");
                        return Ok(());
                    };
                    let mid = self.ids.next(Universe::Message);
                    target.push_message(ChatMessage {
                        mid,
                        channel: *channel,
                        author: Some(cx.fingerprint),
                        content: content.clone(),
                    });
                    mid
                };
                let fanout = Packet::UserMessage {
                    mid,
                    channel: *channel,
                    author: cx.fingerprint,
                    content: content.clone(),
                };
                cx.events
                    .emit(Event::Message, &EventArgs::Packet(fanout.clone()));
                cx.broadcast(&fanout, &[]);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Client-side chat application: mirrors the server's user and channel
/// lists and surfaces chat traffic as events.
#[derive(Default)]
pub struct ChatClient {
    pub users: Vec<User>,
    pub channels: Vec<Channel>,
}

impl ChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_user(&self, fingerprint: u64) -> Option<&User> {
        self.users.iter().find(|user| user.fingerprint == fingerprint)
    }

    pub fn find_channel(&self, cid: u64) -> Option<&Channel> {
        self.channels.iter().find(|channel| channel.cid == cid)
    }
}

impl ClientApp for ChatClient {
    fn on_login_complete(&mut self, cx: &ClientContext<'_>) -> Result<()> {
        // list state only exists on servers speaking our implementation
        if cx.server_implementation == Some(IMPLEMENTATION) {
            cx.send(Packet::UserListRequest);
            cx.send(Packet::ChannelListRequest);
        }
        Ok(())
    }

    fn handle_packet(&mut self, cx: &ClientContext<'_>, packet: &Packet) -> Result<()> {
        match packet {
            Packet::UserListResponse { users } => {
                self.users = users
                    .iter()
                    .map(|(fingerprint, username)| User {
                        username: username.clone(),
                        fingerprint: *fingerprint,
                    })
                    .collect();
                cx.events.emit(Event::UserListReceived, &EventArgs::None);
            }
            Packet::ChannelListResponse { channels } => {
                self.channels = channels
                    .iter()
                    .map(|(cid, name)| Channel::new(*cid, name.clone()))
                    .collect();
                cx.events.emit(Event::ChannelListReceived, &EventArgs::None);
            }
            Packet::UserJoined { user } => {
                cx.events
                    .emit(Event::UserJoined, &EventArgs::User(user.clone()));
                if self.find_user(user.fingerprint).is_none() {
                    self.users.push(user.clone());
                }
            }
            Packet::UserLeft { fingerprint } => {
                cx.events
                    .emit(Event::UserLeft, &EventArgs::Fingerprint(*fingerprint));
                self.users.retain(|user| user.fingerprint != *fingerprint);
            }
            Packet::ServerMessage {
                mid,
                channel,
                content,
            } => {
                if let Some(target) = self.channels.iter_mut().find(|c| c.cid == *channel) {
                    target.push_message(ChatMessage {
                        mid: *mid,
                        channel: *channel,
                        author: None,
                        content: content.clone(),
                    });
                }
                cx.events
                    .emit(Event::Message, &EventArgs::Packet(packet.clone()));
            }
            Packet::UserMessage {
                mid,
                channel,
                author,
                content,
            } => {
                if let Some(target) = self.channels.iter_mut().find(|c| c.cid == *channel) {
                    target.push_message(ChatMessage {
                        mid: *mid,
                        channel: *channel,
                        author: Some(*author),
                        content: content.clone(),
                    });
                }
                cx.events
                    .emit(Event::Message, &EventArgs::Packet(packet.clone()));
            }
            _ => {}
        }
        Ok(())
    }
}
