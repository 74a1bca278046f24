//! Client Channels
//!
//! Outbound handle to one client connection. Each connection owns a bounded
//! queue drained by a single writer task, so any number of producers
//! (broadcaster, relay) can target a client without sharing its socket.
//! Producers never wait: a full queue drops the message.

use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::network::protocol::ServerMessage;

/// Default per-connection queue bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Identity of one accepted connection (not of the player behind it).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Fresh random connection id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell connections apart in logs.
        let full = self.0.simple().to_string();
        write!(f, "{}", &full[..8])
    }
}

/// Delivery failures. Neither is fatal to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Queue is full; the message was dropped.
    #[error("connection {0} is not keeping up, message dropped")]
    Backpressure(ConnectionId),
    /// Writer task has gone away.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// Cloneable outbound handle to one client connection.
#[derive(Clone)]
pub struct ClientChannel {
    id: ConnectionId,
    sender: mpsc::Sender<ServerMessage>,
}

impl ClientChannel {
    /// Create a channel and the receiver its writer task drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let channel = Self {
            id: ConnectionId::new(),
            sender,
        };
        (channel, receiver)
    }

    /// Connection this channel belongs to.
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message without waiting.
    pub fn try_deliver(&self, msg: ServerMessage) -> Result<(), DeliveryError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backpressure(self.id),
            TrySendError::Closed(_) => DeliveryError::Closed(self.id),
        })
    }

    /// Whether the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Whether two handles point at the same connection.
    #[inline]
    pub fn same_connection(&self, other: &ClientChannel) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for ClientChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientChannel")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
