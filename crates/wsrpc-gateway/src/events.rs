//! Connection lifecycle events.
//!
//! A broadcast of connections opening, registering and closing, for
//! observers that want more than the close callback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle event of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// A socket was upgraded and attached.
    Connected {
        /// Connection sequence number.
        seq: u64,
    },

    /// A connection was bound to an identifier.
    Registered {
        /// Connection sequence number.
        seq: u64,
        /// Identifier.
        client_id: String,
    },

    /// A connection was torn down.
    Closed {
        /// Connection sequence number.
        seq: u64,
        /// Identifier, if the connection was registered.
        client_id: Option<String>,
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
        /// Pending requests dropped with the connection.
        abandoned: usize,
    },
}

/// A wrapper for lifecycle events with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event ID.
    pub id: String,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
    /// The event payload.
    pub event: ConnectionEvent,
}

impl EventEnvelope {
    /// Create a new event envelope.
    #[must_use]
    pub fn new(event: ConnectionEvent) -> Self {
        Self {
            id: wsrpc_core::new_request_id(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Default channel capacity for event broadcasts.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Event broadcaster for distributing lifecycle events to subscribers.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBroadcaster {
    /// Create a new event broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event broadcaster with custom capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Broadcast an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn broadcast(&self, event: ConnectionEvent) -> usize {
        // No subscribers is not an error
        self.sender.send(EventEnvelope::new(event)).unwrap_or(0)
    }

    /// Subscribe to receive events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
