//! Error types for the chat broker
//!
//! Defines application-level errors and message send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// business errors (send error message to client).
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Display name already bound to another live connection
    #[error("Name '{0}' is already taken")]
    NameTaken(String),

    /// Display name is blank after trimming
    #[error("Display name is empty")]
    EmptyName,

    /// Room name is blank after trimming
    #[error("Room name is empty")]
    EmptyRoomName,

    /// Message body is blank after trimming
    #[error("Message body is empty")]
    EmptyMessage,

    /// Login is required before room operations
    #[error("Login required")]
    LoginRequired,

    /// Client is not in any room
    #[error("Not in room")]
    NotInRoom,

    /// Room lookup failed (unreachable in normal flow - rooms are
    /// created on join)
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Per-connection send buffer exceeded, connection will be dropped
    #[error("Connection send buffer exceeded")]
    ConnectionOverloaded,
}

/// Message send errors
///
/// Occurs when attempting to deliver a message to a connection's
/// bounded outbound buffer.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The connection's bounded send buffer is full
    #[error("Send buffer full")]
    BufferFull,
}
