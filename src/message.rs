//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Client → Server message
///
/// All messages from client to server. Uses tagged enum with snake_case naming.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind a display name (required before room operations)
    Login { username: String },
    /// Join a room by name, creating it if absent
    JoinRoom { room: String },
    /// Leave the current room
    LeaveRoom,
    /// Send a chat message to the current room
    ///
    /// `room` and `timestamp` are advisory: the broker's view of the
    /// connection's current room is authoritative, and messages are
    /// stamped with a server-assigned timestamp.
    Chat {
        #[serde(default)]
        room: Option<String>,
        message: String,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
}

/// Server → Client message
///
/// All messages from server to client. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection successful, connection ID issued
    Connected { client_id: String },
    /// Display name bound successfully
    LoggedIn { username: String },
    /// Chat message fan-out, stamped with the room's sequence number
    Chat {
        user: String,
        room: String,
        message: String,
        sequence: u64,
        server_timestamp: DateTime<Utc>,
    },
    /// Membership changed: someone joined. Broadcast to all members,
    /// carrying a display-name snapshot of the room.
    RoomJoined {
        room: String,
        user: String,
        members: Vec<String>,
    },
    /// Membership changed: someone left
    RoomLeft { room: String, user: String },
    /// Unsequenced server notice (welcome text on join)
    System { room: String, message: String },
    /// Error occurred
    Error { code: ErrorCode, message: String },
}

/// Error codes for ServerMessage::Error
///
/// Represents different error scenarios that can be communicated to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Display name already bound to another live connection
    NameTaken,
    /// Blank display name
    EmptyName,
    /// Blank room name
    EmptyRoomName,
    /// Blank message body
    EmptyMessage,
    /// Attempted room operation without logging in
    LoginRequired,
    /// Attempted chat/leave without joining a room
    NotInRoom,
    /// Room lookup failed
    RoomNotFound,
    /// Send buffer exceeded, connection dropped
    Overloaded,
    /// Invalid message format
    InvalidMessage,
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        let (code, message) = match &err {
            AppError::NameTaken(name) => {
                (ErrorCode::NameTaken, format!("Name '{}' is already taken", name))
            }
            AppError::EmptyName => {
                (ErrorCode::EmptyName, "Display name must not be empty".to_string())
            }
            AppError::EmptyRoomName => {
                (ErrorCode::EmptyRoomName, "Room name must not be empty".to_string())
            }
            AppError::EmptyMessage => {
                (ErrorCode::EmptyMessage, "Message must not be empty".to_string())
            }
            AppError::LoginRequired => {
                (ErrorCode::LoginRequired, "Login is required first".to_string())
            }
            AppError::NotInRoom => {
                (ErrorCode::NotInRoom, "You are not in a room".to_string())
            }
            AppError::RoomNotFound(room) => {
                (ErrorCode::RoomNotFound, format!("Room '{}' not found", room))
            }
            AppError::ConnectionOverloaded => {
                (ErrorCode::Overloaded, "Send buffer exceeded".to_string())
            }
            AppError::Json(e) => {
                (ErrorCode::InvalidMessage, format!("Invalid message format: {}", e))
            }
            // Fatal errors are not typically converted (connection closes)
            _ => {
                (ErrorCode::InvalidMessage, "Internal error".to_string())
            }
        };
        ServerMessage::Error { code, message }
    }
}
