//! # Connection Services
//!
//! The handshake/login state machine and steady-state loop, in mirrored
//! client and server form, plus the chat application built on top.
//!
//! ## Components
//! - **connection**: shared receive loop with heartbeat liveness
//! - **client**: client state machine, command handle, app hooks
//! - **server**: accept loop, session registry, broadcast
//! - **chat**: users, channels, and message history

pub mod chat;
pub mod client;
pub mod connection;
pub mod server;

pub use chat::{ChatClient, ChatMessage, ChatServer, Channel};
pub use client::{Client, ClientApp, ClientContext, ClientHandle};
pub use connection::{Command, Connection, Role};
pub use server::{Server, ServerApp, SessionContext, Sessions};
