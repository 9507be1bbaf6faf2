//! # Utility Modules
//!
//! Supporting utilities for compression, identifiers, logging, and timing.
//!
//! ## Components
//! - **Compression**: LZ4 and Zstd with decompression bomb guards
//! - **Identifier**: universe-tagged id allocation for channels/messages
//! - **Logging**: structured logging bootstrap
//! - **Timeout**: async timeout wrappers and default durations

pub mod compression;
pub mod identifier;
pub mod logging;
pub mod timeout;

pub use identifier::{IdAllocator, Universe};
