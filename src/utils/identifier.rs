//! Process-wide identifier allocation.
//!
//! Channel and message ids are minted from independent sequences keyed by
//! an "identifier universe". The universe tag lives in the low bits:
//! `id = (sequence << UNIVERSE_BITS) | universe`, so ids from different
//! universes can never collide.

use std::collections::HashMap;
use std::sync::Mutex;

/// Low bits reserved for the universe tag.
pub const UNIVERSE_BITS: u32 = 4;

/// Namespaces for generated identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Universe {
    Channel = 0,
    Message = 1,
}

/// Mutex-guarded per-universe sequence counters.
#[derive(Debug, Default)]
pub struct IdAllocator {
    state: Mutex<HashMap<u8, u64>>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from previously persisted sequence state.
    pub fn from_state(state: HashMap<u8, u64>) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Mint the next identifier in `universe`. Sequences start at 1.
    pub fn next(&self, universe: Universe) -> u64 {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let sequence = state.entry(universe as u8).or_insert(0);
        *sequence += 1;
        (*sequence << UNIVERSE_BITS) | universe as u64
    }
}
