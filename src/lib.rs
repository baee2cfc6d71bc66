//! Room-based WebSocket chat broker
//!
//! A chat message broker built with tokio-tungstenite using the Actor
//! pattern for state management: rooms with any number of members,
//! per-room ordered message delivery, and reconnect-safe sessions.
//!
//! # Features
//! - WebSocket connection handling
//! - Display name login with duplicate rejection
//! - Named rooms, created on first join and deleted when empty
//! - Per-room gap-free message sequencing (fan-out to all members)
//! - Membership broadcasts with member snapshots
//! - Reconnect grace window that restores room membership
//! - Backpressure: overloaded connections are dropped, not waited on
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor managing all state
//! - Each connection has a `handler` task communicating with the server
//! - No locks needed - all state access goes through message passing,
//!   so sequencing and fan-out for a room are never interleaved
//!
//! # Example
//! ```ignore
//! use std::time::Duration;
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//! use chat_broker::{ChatServer, handle_connection};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let (cmd_tx, cmd_rx) = mpsc::channel(256);
//!
//!     tokio::spawn(ChatServer::new(cmd_rx, Duration::from_secs(30)).run());
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         let cmd_tx = cmd_tx.clone();
//!         tokio::spawn(handle_connection(stream, cmd_tx));
//!     }
//! }
//! ```

pub mod client;
pub mod error;
pub mod handler;
pub mod message;
pub mod room;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use client::Client;
pub use error::{AppError, SendError};
pub use handler::handle_connection;
pub use message::{ClientMessage, ErrorCode, ServerMessage};
pub use room::Room;
pub use server::{ChatServer, ServerCommand};
pub use session::SessionManager;
pub use types::{ClientId, RoomName};
