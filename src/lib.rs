//! # chat-protocol
//!
//! Encrypted chat protocol core: a binary packet codec, a Diffie-Hellman +
//! AEAD encrypted transport, and the client/server handshake state machine
//! with bidirectional heartbeats.
//!
//! ## Layers
//! - [`core`]: cursor-based binary buffer and length-prefixed framing
//! - [`protocol`]: the packet catalog, per-direction id registry, events
//! - [`crypto`]: pluggable frame encryption (finite-field DH + AES-256-GCM)
//! - [`transport`]: compressed, encrypted packet transport with
//!   status-based fault reporting
//! - [`service`]: client and server state machines and the chat layer
//!
//! ## Quick start
//! ```no_run
//! use std::sync::Arc;
//! use chat_protocol::config::NetworkConfig;
//! use chat_protocol::service::{ChatServer, Server};
//!
//! #[tokio::main]
//! async fn main() -> chat_protocol::error::Result<()> {
//!     let mut server = Server::new(NetworkConfig::default());
//!     server.generate_key("dhaes")?;
//!     let app = Arc::new(ChatServer::new(server.sessions()));
//!     server.serve(app).await
//! }
//! ```
//!
//! A client mirrors the shape: build a
//! [`Client`](service::Client), load or generate a `"dhaes"` key, register
//! event handlers, then `serve` a [`ChatClient`](service::ChatClient).
//!
//! ## Wire format
//! ```text
//! frame      = [2-byte LE length][ciphertext]
//! ciphertext = AEAD(nonce(12) || tag(16) || encrypted payload)
//! payload    = compressed([2-byte LE packet id][fields...])
//! ```

pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};
pub use protocol::{Event, EventArgs, EventBus, Packet, PacketKind, ProtocolRegistry, Side, User};
pub use service::{ChatClient, ChatServer, Client, Server};
pub use transport::{ProtoSocket, SocketStatus};
