//! # Protocol Layer
//!
//! The packet model, the per-direction id registry, and event dispatch.
//!
//! ## Components
//! - **packet**: closed enum over every wire message + field codecs
//! - **registry**: (direction, id) → packet kind mapping, encode/decode
//! - **events**: named lifecycle events with failure-isolated handlers

pub mod events;
pub mod packet;
pub mod registry;

pub use events::{Event, EventArgs, EventBus, Handler};
pub use packet::{Packet, PacketKind, Side, User};
pub use registry::ProtocolRegistry;
