//! Client struct definition
//!
//! Represents a live connection in the registry: its id, the display
//! name bound to it (if any), and the bounded outbound message buffer.

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::ClientId;

/// Connected client information
///
/// Holds all state related to a live connection. The sender is the
/// connection's bounded outbound buffer; the write task on the other
/// end drains it onto the WebSocket.
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// Bound display name (None while Anonymous)
    pub username: Option<String>,
    /// Server → Client message buffer
    pub sender: mpsc::Sender<ServerMessage>,
}

impl Client {
    /// Create a new client with the given ID and sender channel
    pub fn new(id: ClientId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            username: None,
            sender,
        }
    }

    /// Deliver a message to this connection without blocking.
    ///
    /// A full buffer means the connection cannot keep up with fan-out;
    /// the caller applies the overload policy (forced disconnect).
    pub fn try_send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Get the display name for this connection
    ///
    /// Returns the username if bound, otherwise "Unknown".
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or("Unknown")
    }

    /// Check if this connection has bound a display name
    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    /// Bind the connection's display name
    pub fn set_username(&mut self, username: String) {
        self.username = Some(username);
    }
}
