//! Lifecycle event dispatch.
//!
//! Application code observes the connection through named events. Handlers
//! run in registration order and are failure-isolated: an error from one
//! handler is redirected to [`Event::Exception`] and never prevents the
//! remaining handlers (or protocol progress) from running.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::protocol::packet::{Packet, User};
use tracing::{error, warn};

/// Named lifecycle events a connection can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Hello exchange completed.
    Hello,
    /// Key exchange completed; payload carries the peer's public material.
    Encrypted,
    /// Username negotiation finished; payload carries the final name.
    UinfoNegotiated,
    /// Handshake and login both done; steady state begins.
    LoginComplete,
    /// A packet was written to the wire.
    PacketSent,
    /// A packet arrived from the wire.
    PacketReceived,
    /// The peer probed us; payload carries the echoed nonce.
    Heartbeat,
    /// A heartbeat round expired unanswered; payload carries the count.
    HeartbeatMissed,
    /// The peer issued a Kick; payload carries the reason verbatim.
    Kicked,
    /// The transport failed underneath the connection.
    SocketBroken,
    /// A user joined the server.
    UserJoined,
    /// A user left the server.
    UserLeft,
    /// A chat message was delivered.
    Message,
    /// The user list arrived.
    UserListReceived,
    /// The channel list arrived.
    ChannelListReceived,
    /// A handler failed; payload carries the error text.
    Exception,
}

/// Payload accompanying an event.
#[derive(Debug, Clone)]
pub enum EventArgs {
    None,
    Reason(String),
    Username(String),
    Nonce(u16),
    Missed(u32),
    KeyMaterial(Vec<u8>),
    Packet(Packet),
    User(User),
    Fingerprint(u64),
    Error(String),
}

/// Handler signature shared by every event.
pub type Handler = Arc<dyn Fn(&EventArgs) -> Result<()> + Send + Sync>;

/// Ordered, failure-isolated handler registry.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<Event, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Registering the identical handler (same `Arc`)
    /// twice is a no-op.
    pub fn on(&self, event: Event, handler: Handler) {
        let mut handlers = match self.handlers.write() {
            Ok(guard) => guard,
            Err(_) => {
                error!("event handler registry poisoned, dropping registration");
                return;
            }
        };
        let list = handlers.entry(event).or_default();
        if list.iter().any(|existing| Arc::ptr_eq(existing, &handler)) {
            return;
        }
        list.push(handler);
    }

    /// Invoke every handler registered for `event`, in registration order.
    ///
    /// Handler failures are forwarded to [`Event::Exception`]; a failing
    /// exception handler is only logged, never re-dispatched.
    pub fn emit(&self, event: Event, args: &EventArgs) {
        for handler in self.handlers_for(event) {
            if let Err(e) = handler(args) {
                if event == Event::Exception {
                    error!(error = %e, "exception handler itself failed");
                } else {
                    self.emit_exception(e.to_string());
                }
            }
        }
    }

    fn emit_exception(&self, message: String) {
        // built-in default: log and swallow
        warn!(error = %message, "event handler failed, ignoring");
        self.emit(Event::Exception, &EventArgs::Error(message));
    }

    fn handlers_for(&self, event: Event) -> Vec<Handler> {
        match self.handlers.read() {
            Ok(guard) => guard.get(&event).cloned().unwrap_or_default(),
            Err(_) => {
                error!("event handler registry poisoned, skipping dispatch");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::error::ProtocolError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(RwLock::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.on(
                Event::Hello,
                Arc::new(move |_| {
                    order.write().unwrap().push(tag);
                    Ok(())
                }),
            );
        }

        bus.emit(Event::Hello, &EventArgs::None);
        assert_eq!(*order.read().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn duplicate_registration_is_noop() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handler: Handler = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.on(Event::Hello, handler.clone());
        bus.on(Event::Hello, handler);
        bus.emit(Event::Hello, &EventArgs::None);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_handler_does_not_stop_siblings() {
        let bus = EventBus::new();
        let ran = Arc::new(AtomicUsize::new(0));

        bus.on(
            Event::Kicked,
            Arc::new(|_| Err(ProtocolError::ConnectionClosed)),
        );
        let counter = ran.clone();
        bus.on(
            Event::Kicked,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.emit(Event::Kicked, &EventArgs::Reason("bye".to_string()));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_failure_reaches_exception_event() {
        let bus = EventBus::new();
        let seen = Arc::new(RwLock::new(String::new()));

        let sink = seen.clone();
        bus.on(
            Event::Exception,
            Arc::new(move |args| {
                if let EventArgs::Error(message) = args {
                    *sink.write().unwrap() = message.clone();
                }
                Ok(())
            }),
        );
        bus.on(
            Event::Hello,
            Arc::new(|_| Err(ProtocolError::ConnectionClosed)),
        );

        bus.emit(Event::Hello, &EventArgs::None);
        assert_eq!(*seen.read().unwrap(), "connection closed");
    }

    #[test]
    fn failing_exception_handler_does_not_recurse() {
        let bus = EventBus::new();
        bus.on(
            Event::Exception,
            Arc::new(|_| Err(ProtocolError::ConnectionClosed)),
        );
        bus.on(
            Event::Hello,
            Arc::new(|_| Err(ProtocolError::ConnectionClosed)),
        );
        // must terminate without overflowing the stack
        bus.emit(Event::Hello, &EventArgs::None);
    }
}
