//! ChatServer Actor implementation
//!
//! The central actor that manages all state: connections, rooms, the
//! name index, and reconnect sessions. Uses the Actor pattern with mpsc
//! channels for message passing; because every event is processed to
//! completion before the next, room mutation, sequencing, and fan-out
//! for a room are never interleaved.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::{AppError, SendError};
use crate::message::{ErrorCode, ServerMessage};
use crate::room::Room;
use crate::session::SessionManager;
use crate::types::{ClientId, RoomName};

/// Commands sent from handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New connection accepted
    Connect {
        client_id: ClientId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Connection closed
    Disconnect {
        client_id: ClientId,
    },
    /// Bind a display name to the connection
    Login {
        client_id: ClientId,
        username: String,
    },
    /// Join a room by name, creating it if absent
    JoinRoom {
        client_id: ClientId,
        room: String,
    },
    /// Leave the current room
    LeaveRoom {
        client_id: ClientId,
    },
    /// Send a chat message to the current room
    Chat {
        client_id: ClientId,
        /// Advisory room name from the client; the broker's own view of
        /// the connection's current room is authoritative
        room: Option<String>,
        content: String,
    },
    /// Client sent a payload that could not be parsed
    Malformed {
        client_id: ClientId,
        detail: String,
    },
}

/// The main ChatServer actor
///
/// Manages all state and processes commands from connection handlers.
/// HashMaps give O(1) lookups on connections, rooms, names, and the
/// connection-room mapping.
pub struct ChatServer {
    /// All live connections: ClientId -> Client
    clients: HashMap<ClientId, Client>,
    /// All active rooms: RoomName -> Room
    rooms: HashMap<RoomName, Room>,
    /// Connection to room mapping for fast lookup
    client_rooms: HashMap<ClientId, RoomName>,
    /// Display name index, enforcing one live connection per name
    names: HashMap<String, ClientId>,
    /// Reconnect grace-window bookkeeping
    sessions: SessionManager,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver and
    /// reconnect grace window
    pub fn new(receiver: mpsc::Receiver<ServerCommand>, grace_window: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            rooms: HashMap::new(),
            client_rooms: HashMap::new(),
            names: HashMap::new(),
            sessions: SessionManager::new(grace_window),
            receiver,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!("ChatServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect { client_id, sender } => {
                self.handle_connect(client_id, sender);
            }
            ServerCommand::Disconnect { client_id } => {
                self.handle_disconnect(client_id);
            }
            ServerCommand::Login { client_id, username } => {
                self.handle_login(client_id, username);
            }
            ServerCommand::JoinRoom { client_id, room } => {
                self.handle_join_room(client_id, room);
            }
            ServerCommand::LeaveRoom { client_id } => {
                self.handle_leave_room(client_id);
            }
            ServerCommand::Chat { client_id, room, content } => {
                self.handle_chat(client_id, room, content);
            }
            ServerCommand::Malformed { client_id, detail } => {
                self.send_to(
                    client_id,
                    ServerMessage::Error {
                        code: ErrorCode::InvalidMessage,
                        message: format!("Invalid message format: {}", detail),
                    },
                );
            }
        }
    }

    /// Handle new connection
    fn handle_connect(&mut self, client_id: ClientId, sender: mpsc::Sender<ServerMessage>) {
        info!("Client {} connected", client_id);
        let client = Client::new(client_id, sender);
        self.clients.insert(client_id, client);
        debug!(
            "Total clients: {}, Total rooms: {}",
            self.clients.len(),
            self.rooms.len()
        );
    }

    /// Handle connection close
    fn handle_disconnect(&mut self, client_id: ClientId) {
        info!("Client {} disconnected", client_id);

        let overloaded = self.drop_client(client_id);
        self.reap_overloaded(overloaded);

        debug!(
            "Total clients: {}, Total rooms: {}",
            self.clients.len(),
            self.rooms.len()
        );
    }

    /// Handle display name binding
    fn handle_login(&mut self, client_id: ClientId, username: String) {
        let current_name = match self.clients.get(&client_id) {
            Some(c) => c.username.clone(),
            None => return,
        };

        let username = username.trim().to_string();
        if username.is_empty() {
            self.send_to(client_id, AppError::EmptyName.into());
            return;
        }

        // Re-login with the bound name is idempotent; a second identity
        // on the same connection is rejected.
        if let Some(current) = current_name {
            if current == username {
                self.send_to(client_id, ServerMessage::LoggedIn { username });
            } else {
                self.send_to(
                    client_id,
                    ServerMessage::Error {
                        code: ErrorCode::InvalidMessage,
                        message: format!("Connection already logged in as '{}'", current),
                    },
                );
            }
            return;
        }

        // Duplicate login: the name stays claimed by the other live
        // connection; this one remains Anonymous.
        if let Some(holder) = self.names.get(&username) {
            if *holder != client_id {
                self.send_to(client_id, AppError::NameTaken(username).into());
                return;
            }
        }

        if let Some(client) = self.clients.get_mut(&client_id) {
            client.set_username(username.clone());
        }
        self.names.insert(username.clone(), client_id);
        info!("Client {} logged in as '{}'", client_id, username);

        self.send_to(client_id, ServerMessage::LoggedIn { username: username.clone() });

        // Reconnect inside the grace window: rejoin the saved room
        // before any further client-issued commands are processed.
        if let Some(room) = self.sessions.try_restore(&username) {
            info!("Restoring '{}' to room {} after reconnect", username, room);
            let overloaded = self.join_room_inner(client_id, room);
            self.reap_overloaded(overloaded);
        }
    }

    /// Handle room join (create-if-absent)
    fn handle_join_room(&mut self, client_id: ClientId, room: String) {
        let authenticated = match self.clients.get(&client_id) {
            Some(c) => c.is_authenticated(),
            None => return,
        };

        if !authenticated {
            self.send_to(client_id, AppError::LoginRequired.into());
            return;
        }

        let Some(room_name) = RoomName::parse(&room) else {
            self.send_to(client_id, AppError::EmptyRoomName.into());
            return;
        };

        let overloaded = self.join_room_inner(client_id, room_name);
        self.reap_overloaded(overloaded);
    }

    /// Join a room: implicit leave of the old room, create-if-absent,
    /// membership broadcast, welcome notice to the joiner.
    ///
    /// Returns connections whose send buffer overflowed during the
    /// broadcasts.
    fn join_room_inner(&mut self, client_id: ClientId, room_name: RoomName) -> Vec<ClientId> {
        let username = match self.clients.get(&client_id) {
            Some(c) => c.display_name().to_string(),
            None => return Vec::new(),
        };

        let mut overloaded = Vec::new();

        match self.client_rooms.get(&client_id).cloned() {
            // Already there: success, refresh the joiner's snapshot
            Some(current) if current == room_name => {
                let members = self.member_names(&room_name);
                self.send_to(
                    client_id,
                    ServerMessage::RoomJoined {
                        room: room_name.to_string(),
                        user: username,
                        members,
                    },
                );
                return overloaded;
            }
            // Switching rooms: leave the old one first
            Some(_) => {
                overloaded.extend(self.leave_room_inner(client_id, &username));
            }
            None => {}
        }

        let room = self
            .rooms
            .entry(room_name.clone())
            .or_insert_with(|| Room::new(room_name.clone()));
        room.join(client_id);
        self.client_rooms.insert(client_id, room_name.clone());

        info!("Client {} ('{}') joined room {}", client_id, username, room_name);

        let members = self.member_names(&room_name);
        overloaded.extend(self.broadcast(
            &room_name,
            ServerMessage::RoomJoined {
                room: room_name.to_string(),
                user: username,
                members,
            },
        ));

        self.send_to(
            client_id,
            ServerMessage::System {
                room: room_name.to_string(),
                message: format!("Welcome to the {} room!", room_name),
            },
        );

        overloaded
    }

    /// Handle voluntary room leave. No-op if not in a room.
    fn handle_leave_room(&mut self, client_id: ClientId) {
        let username = match self.clients.get(&client_id) {
            Some(c) => c.display_name().to_string(),
            None => return,
        };

        let Some(room) = self.client_rooms.get(&client_id) else {
            debug!("Client {} left room while not in one", client_id);
            return;
        };
        let room = room.to_string();

        info!("Client {} ('{}') left room {}", client_id, username, room);

        let overloaded = self.leave_room_inner(client_id, &username);
        // Confirmation to the leaver; remaining members were notified
        // by leave_room_inner.
        self.send_to(
            client_id,
            ServerMessage::RoomLeft { room, user: username },
        );
        self.reap_overloaded(overloaded);
    }

    /// Handle chat message: validate, stamp with the room sequencer,
    /// fan out to every member including the sender.
    fn handle_chat(&mut self, client_id: ClientId, room: Option<String>, content: String) {
        let sender_name = match self.clients.get(&client_id) {
            Some(c) => c.display_name().to_string(),
            None => return,
        };

        let Some(room_name) = self.client_rooms.get(&client_id).cloned() else {
            self.send_to(client_id, AppError::NotInRoom.into());
            return;
        };

        if let Some(claimed) = room {
            if claimed.trim() != room_name.as_str() {
                debug!(
                    "Client {} claimed room '{}' but is in {}",
                    client_id, claimed, room_name
                );
            }
        }

        let body = content.trim().to_string();
        if body.is_empty() {
            // No sequence number is consumed for rejected sends
            self.send_to(client_id, AppError::EmptyMessage.into());
            return;
        }

        let Some(room) = self.rooms.get_mut(&room_name) else {
            self.send_to(client_id, AppError::RoomNotFound(room_name.to_string()).into());
            return;
        };

        let sequence = room.next_seq();
        let message = ServerMessage::Chat {
            user: sender_name,
            room: room_name.to_string(),
            message: body,
            sequence,
            server_timestamp: Utc::now(),
        };

        let overloaded = self.broadcast(&room_name, message);
        self.reap_overloaded(overloaded);
    }

    /// Remove a connection from its room, notifying the remaining
    /// members. Deletes the room when the last member leaves.
    fn leave_room_inner(&mut self, client_id: ClientId, username: &str) -> Vec<ClientId> {
        let Some(room_name) = self.client_rooms.remove(&client_id) else {
            return Vec::new();
        };

        let Some(room) = self.rooms.get_mut(&room_name) else {
            return Vec::new();
        };

        if room.leave(client_id) {
            let age = room.created_at.elapsed();
            self.rooms.remove(&room_name);
            debug!("Room {} deleted (empty) after {:?}", room_name, age);
            return Vec::new();
        }

        self.broadcast(
            &room_name,
            ServerMessage::RoomLeft {
                room: room_name.to_string(),
                user: username.to_string(),
            },
        )
    }

    /// Tear down a connection: snapshot its session for the grace
    /// window, perform the implicit leave, release the name.
    ///
    /// Tolerates already-removed connections (a forced disconnect may
    /// race the handler's Disconnect command).
    fn drop_client(&mut self, client_id: ClientId) -> Vec<ClientId> {
        let Some(client) = self.clients.remove(&client_id) else {
            return Vec::new();
        };

        let mut overloaded = Vec::new();
        if let Some(username) = client.username {
            self.sessions.prune_expired();
            let room = self.client_rooms.get(&client_id).cloned();
            self.sessions.save(&username, room);
            if self.names.get(&username) == Some(&client_id) {
                self.names.remove(&username);
            }
            overloaded.extend(self.leave_room_inner(client_id, &username));
        } else {
            overloaded.extend(self.leave_room_inner(client_id, "Unknown"));
        }
        overloaded
    }

    /// Fan out a message to every member of a room.
    ///
    /// Delivery is non-blocking: a member whose buffer is full is
    /// returned for forced disconnect rather than stalling the room.
    fn broadcast(&mut self, room_name: &RoomName, msg: ServerMessage) -> Vec<ClientId> {
        let Some(room) = self.rooms.get(room_name) else {
            return Vec::new();
        };

        let mut overloaded = Vec::new();
        for member_id in room.members() {
            let Some(member) = self.clients.get(&member_id) else {
                continue;
            };
            match member.try_send(msg.clone()) {
                Ok(()) => {}
                Err(SendError::BufferFull) => {
                    warn!(
                        "Dropped delivery to {} in {}: send buffer full",
                        member_id, room_name
                    );
                    overloaded.push(member_id);
                }
                Err(SendError::ChannelClosed) => {
                    // Disconnect already in flight; the handler's
                    // Disconnect command will clean up.
                    debug!("Dropped delivery to {}: channel closed", member_id);
                }
            }
        }
        overloaded
    }

    /// Deliver a message to a single connection, applying the overload
    /// policy on a full buffer.
    fn send_to(&mut self, client_id: ClientId, msg: ServerMessage) {
        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        match client.try_send(msg) {
            Ok(()) => {}
            Err(SendError::BufferFull) => {
                self.reap_overloaded(vec![client_id]);
            }
            Err(SendError::ChannelClosed) => {
                debug!("Dropped delivery to {}: channel closed", client_id);
            }
        }
    }

    /// Force-disconnect overloaded connections, following any further
    /// overloads caused by the resulting leave notifications.
    fn reap_overloaded(&mut self, mut overloaded: Vec<ClientId>) {
        while let Some(client_id) = overloaded.pop() {
            warn!("Client {} overloaded, forcing disconnect", client_id);
            // Best-effort notice; the buffer is usually still full, but
            // the write task may have drained a slot in the meantime.
            if let Some(client) = self.clients.get(&client_id) {
                let _ = client.try_send(AppError::ConnectionOverloaded.into());
            }
            overloaded.extend(self.drop_client(client_id));
        }
    }

    /// Display-name snapshot of a room's members
    fn member_names(&self, room_name: &RoomName) -> Vec<String> {
        let Some(room) = self.rooms.get(room_name) else {
            return Vec::new();
        };
        let mut names: Vec<String> = room
            .members()
            .iter()
            .filter_map(|id| self.clients.get(id))
            .map(|c| c.display_name().to_string())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ErrorCode;

    /// A fake connection: the broker side of a client, plus the receiver
    /// a real handler's write task would drain.
    struct TestClient {
        id: ClientId,
        rx: mpsc::Receiver<ServerMessage>,
    }

    impl TestClient {
        fn recv(&mut self) -> ServerMessage {
            self.rx.try_recv().expect("expected a message")
        }

        fn drain(&mut self) {
            while self.rx.try_recv().is_ok() {}
        }

        fn assert_empty(&mut self) {
            assert!(self.rx.try_recv().is_err(), "expected no more messages");
        }

        /// Assert the broker has dropped its sender: once the buffer is
        /// drained the channel reports disconnected, which is what ends
        /// a real handler's write task.
        fn assert_closed(&mut self) {
            self.drain();
            assert!(matches!(
                self.rx.try_recv(),
                Err(mpsc::error::TryRecvError::Disconnected)
            ));
        }
    }

    fn server(grace: Duration) -> ChatServer {
        let (_tx, rx) = mpsc::channel(8);
        ChatServer::new(rx, grace)
    }

    fn connect(srv: &mut ChatServer) -> TestClient {
        connect_with_buffer(srv, 32)
    }

    fn connect_with_buffer(srv: &mut ChatServer, buffer: usize) -> TestClient {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(buffer);
        srv.handle_command(ServerCommand::Connect { client_id: id, sender: tx });
        TestClient { id, rx }
    }

    fn login(srv: &mut ChatServer, client: &TestClient, name: &str) {
        srv.handle_command(ServerCommand::Login {
            client_id: client.id,
            username: name.to_string(),
        });
    }

    fn join(srv: &mut ChatServer, client: &TestClient, room: &str) {
        srv.handle_command(ServerCommand::JoinRoom {
            client_id: client.id,
            room: room.to_string(),
        });
    }

    fn chat(srv: &mut ChatServer, client: &TestClient, content: &str) {
        srv.handle_command(ServerCommand::Chat {
            client_id: client.id,
            room: None,
            content: content.to_string(),
        });
    }

    fn expect_error(client: &mut TestClient, expected: ErrorCode) {
        match client.recv() {
            ServerMessage::Error { code, .. } => assert_eq!(code, expected),
            other => panic!("expected error {:?}, got {:?}", expected, other),
        }
    }

    fn expect_chat(client: &mut TestClient) -> (String, String, u64) {
        match client.recv() {
            ServerMessage::Chat { user, message, sequence, .. } => (user, message, sequence),
            other => panic!("expected chat, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_login_join_send_scenario() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);
        let mut bob = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        match alice.recv() {
            ServerMessage::LoggedIn { username } => assert_eq!(username, "alice"),
            other => panic!("expected logged_in, got {:?}", other),
        }

        join(&mut srv, &alice, "General");
        match alice.recv() {
            ServerMessage::RoomJoined { room, user, members } => {
                assert_eq!(room, "General");
                assert_eq!(user, "alice");
                assert_eq!(members, vec!["alice"]);
            }
            other => panic!("expected room_joined, got {:?}", other),
        }
        match alice.recv() {
            ServerMessage::System { room, message } => {
                assert_eq!(room, "General");
                assert_eq!(message, "Welcome to the General room!");
            }
            other => panic!("expected system notice, got {:?}", other),
        }

        login(&mut srv, &bob, "bob");
        bob.drain();
        join(&mut srv, &bob, "General");

        // Presence broadcast reaches both members
        match alice.recv() {
            ServerMessage::RoomJoined { user, members, .. } => {
                assert_eq!(user, "bob");
                assert_eq!(members, vec!["alice", "bob"]);
            }
            other => panic!("expected room_joined, got {:?}", other),
        }
        match bob.recv() {
            ServerMessage::RoomJoined { members, .. } => {
                assert_eq!(members, vec!["alice", "bob"]);
            }
            other => panic!("expected room_joined, got {:?}", other),
        }
        // Welcome notice goes to the joiner only
        assert!(matches!(bob.recv(), ServerMessage::System { .. }));
        alice.assert_empty();

        chat(&mut srv, &alice, "hello");
        assert_eq!(expect_chat(&mut alice), ("alice".into(), "hello".into(), 1));
        assert_eq!(expect_chat(&mut bob), ("alice".into(), "hello".into(), 1));
    }

    #[tokio::test]
    async fn test_sequence_gap_free_and_identical_order() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);
        let mut bob = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        join(&mut srv, &alice, "General");
        login(&mut srv, &bob, "bob");
        join(&mut srv, &bob, "General");
        alice.drain();
        bob.drain();

        chat(&mut srv, &alice, "one");
        chat(&mut srv, &bob, "two");
        chat(&mut srv, &alice, "three");

        // Every member observes the same content in the same order,
        // with a gap-free run starting at 1.
        for member in [&mut alice, &mut bob] {
            for expected in [("alice", "one", 1), ("bob", "two", 2), ("alice", "three", 3)] {
                let (user, message, sequence) = expect_chat(member);
                assert_eq!((user.as_str(), message.as_str(), sequence), expected);
            }
        }
    }

    #[tokio::test]
    async fn test_sequencers_are_per_room() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);
        let mut bob = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        join(&mut srv, &alice, "General");
        login(&mut srv, &bob, "bob");
        join(&mut srv, &bob, "Random");
        alice.drain();
        bob.drain();

        chat(&mut srv, &alice, "in general");
        chat(&mut srv, &bob, "in random");

        assert_eq!(expect_chat(&mut alice).2, 1);
        assert_eq!(expect_chat(&mut bob).2, 1);
    }

    #[tokio::test]
    async fn test_name_taken_rejected() {
        let mut srv = server(Duration::from_secs(30));
        let bob = connect(&mut srv);
        let mut imposter = connect(&mut srv);

        login(&mut srv, &bob, "bob");
        login(&mut srv, &imposter, "bob");
        expect_error(&mut imposter, ErrorCode::NameTaken);

        // Still Anonymous: room operations are refused
        join(&mut srv, &imposter, "General");
        expect_error(&mut imposter, ErrorCode::LoginRequired);
    }

    #[tokio::test]
    async fn test_empty_room_name_rejected() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        alice.drain();

        join(&mut srv, &alice, "   ");
        expect_error(&mut alice, ErrorCode::EmptyRoomName);
    }

    #[tokio::test]
    async fn test_malformed_payload_reports_invalid_message() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);

        srv.handle_command(ServerCommand::Malformed {
            client_id: alice.id,
            detail: "missing field `username`".to_string(),
        });

        expect_error(&mut alice, ErrorCode::InvalidMessage);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);

        login(&mut srv, &alice, "   ");
        expect_error(&mut alice, ErrorCode::EmptyName);
    }

    #[tokio::test]
    async fn test_relogin_same_name_idempotent() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        login(&mut srv, &alice, "alice");

        assert!(matches!(alice.recv(), ServerMessage::LoggedIn { .. }));
        assert!(matches!(alice.recv(), ServerMessage::LoggedIn { .. }));
    }

    #[tokio::test]
    async fn test_empty_message_consumes_no_sequence() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        join(&mut srv, &alice, "General");
        alice.drain();

        chat(&mut srv, &alice, "   ");
        expect_error(&mut alice, ErrorCode::EmptyMessage);

        chat(&mut srv, &alice, "hello");
        assert_eq!(expect_chat(&mut alice).2, 1);
    }

    #[tokio::test]
    async fn test_chat_requires_room() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        alice.drain();

        chat(&mut srv, &alice, "hello");
        expect_error(&mut alice, ErrorCode::NotInRoom);
    }

    #[tokio::test]
    async fn test_switching_rooms_leaves_old_room() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);
        let mut bob = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        join(&mut srv, &alice, "General");
        login(&mut srv, &bob, "bob");
        join(&mut srv, &bob, "General");
        alice.drain();
        bob.drain();

        join(&mut srv, &alice, "Random");

        // Remaining member hears the leave
        match bob.recv() {
            ServerMessage::RoomLeft { room, user } => {
                assert_eq!(room, "General");
                assert_eq!(user, "alice");
            }
            other => panic!("expected room_left, got {:?}", other),
        }

        // At most one room at a time: a chat from alice lands in Random only
        alice.drain();
        chat(&mut srv, &alice, "hi random");
        assert_eq!(expect_chat(&mut alice).1, "hi random");
        bob.assert_empty();
    }

    #[tokio::test]
    async fn test_rejoining_same_room_is_idempotent() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);
        let mut bob = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        join(&mut srv, &alice, "General");
        login(&mut srv, &bob, "bob");
        join(&mut srv, &bob, "General");
        alice.drain();
        bob.drain();

        join(&mut srv, &alice, "General");

        // Joiner gets a fresh snapshot; nobody hears a leave/join churn
        match alice.recv() {
            ServerMessage::RoomJoined { members, .. } => {
                assert_eq!(members, vec!["alice", "bob"]);
            }
            other => panic!("expected room_joined, got {:?}", other),
        }
        alice.assert_empty();
        bob.assert_empty();
    }

    #[tokio::test]
    async fn test_leave_while_not_in_room_is_noop() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        alice.drain();

        srv.handle_command(ServerCommand::LeaveRoom { client_id: alice.id });
        alice.assert_empty();
    }

    #[tokio::test]
    async fn test_voluntary_leave_notifies_both_sides() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);
        let mut bob = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        join(&mut srv, &alice, "General");
        login(&mut srv, &bob, "bob");
        join(&mut srv, &bob, "General");
        alice.drain();
        bob.drain();

        srv.handle_command(ServerCommand::LeaveRoom { client_id: alice.id });

        assert!(matches!(alice.recv(), ServerMessage::RoomLeft { .. }));
        assert!(matches!(bob.recv(), ServerMessage::RoomLeft { .. }));
    }

    #[tokio::test]
    async fn test_reconnect_within_grace_window_rejoins() {
        let mut srv = server(Duration::from_secs(30));
        let alice = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        join(&mut srv, &alice, "General");

        srv.handle_command(ServerCommand::Disconnect { client_id: alice.id });

        let mut alice2 = connect(&mut srv);
        login(&mut srv, &alice2, "alice");

        assert!(matches!(alice2.recv(), ServerMessage::LoggedIn { .. }));
        // Rejoined automatically, no explicit join command issued
        match alice2.recv() {
            ServerMessage::RoomJoined { room, members, .. } => {
                assert_eq!(room, "General");
                assert_eq!(members, vec!["alice"]);
            }
            other => panic!("expected room_joined, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reconnect_after_grace_window_does_not_rejoin() {
        let mut srv = server(Duration::ZERO);
        let alice = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        join(&mut srv, &alice, "General");
        srv.handle_command(ServerCommand::Disconnect { client_id: alice.id });

        let mut alice2 = connect(&mut srv);
        login(&mut srv, &alice2, "alice");

        assert!(matches!(alice2.recv(), ServerMessage::LoggedIn { .. }));
        alice2.assert_empty();
    }

    #[tokio::test]
    async fn test_name_frees_on_disconnect() {
        let mut srv = server(Duration::from_secs(30));
        let alice = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        srv.handle_command(ServerCommand::Disconnect { client_id: alice.id });

        let mut alice2 = connect(&mut srv);
        login(&mut srv, &alice2, "alice");
        assert!(matches!(alice2.recv(), ServerMessage::LoggedIn { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_notifies_remaining_members() {
        let mut srv = server(Duration::from_secs(30));
        let alice = connect(&mut srv);
        let mut bob = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        join(&mut srv, &alice, "General");
        login(&mut srv, &bob, "bob");
        join(&mut srv, &bob, "General");
        bob.drain();

        srv.handle_command(ServerCommand::Disconnect { client_id: alice.id });

        match bob.recv() {
            ServerMessage::RoomLeft { user, .. } => assert_eq!(user, "alice"),
            other => panic!("expected room_left, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_overloaded_member_is_force_disconnected() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);
        // Two-slot buffer and nothing draining it
        let mut slow = connect_with_buffer(&mut srv, 2);

        login(&mut srv, &alice, "alice");
        join(&mut srv, &alice, "General");
        login(&mut srv, &slow, "slowpoke");
        slow.drain();
        join(&mut srv, &slow, "General");
        alice.drain();

        // slowpoke's buffer is now full (room_joined + welcome notice);
        // the chat fan-out overflows it.
        chat(&mut srv, &alice, "one");

        assert_eq!(expect_chat(&mut alice).2, 1);
        // Forced disconnect: alice hears the leave
        match alice.recv() {
            ServerMessage::RoomLeft { user, .. } => assert_eq!(user, "slowpoke"),
            other => panic!("expected room_left, got {:?}", other),
        }

        // Room keeps working for the survivors
        chat(&mut srv, &alice, "two");
        assert_eq!(expect_chat(&mut alice).2, 2);

        // The broker dropped its sender, so the connection's channel
        // closes and the handler's write task shuts the socket down.
        slow.assert_closed();
    }

    #[tokio::test]
    async fn test_forced_disconnect_saves_session() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);
        let mut slow = connect_with_buffer(&mut srv, 2);

        login(&mut srv, &alice, "alice");
        join(&mut srv, &alice, "General");
        login(&mut srv, &slow, "slowpoke");
        slow.drain();
        join(&mut srv, &slow, "General");
        alice.drain();

        chat(&mut srv, &alice, "one");
        slow.assert_closed();

        // Forced drops are still disconnects: a reconnect inside the
        // grace window restores the room.
        let mut slow2 = connect(&mut srv);
        login(&mut srv, &slow2, "slowpoke");
        assert!(matches!(slow2.recv(), ServerMessage::LoggedIn { .. }));
        match slow2.recv() {
            ServerMessage::RoomJoined { room, .. } => assert_eq!(room, "General"),
            other => panic!("expected room_joined, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_room_is_deleted_and_sequence_resets() {
        let mut srv = server(Duration::from_secs(30));
        let mut alice = connect(&mut srv);

        login(&mut srv, &alice, "alice");
        join(&mut srv, &alice, "General");
        alice.drain();
        chat(&mut srv, &alice, "hello");
        assert_eq!(expect_chat(&mut alice).2, 1);

        srv.handle_command(ServerCommand::LeaveRoom { client_id: alice.id });
        alice.drain();

        // Last member left: the room was garbage-collected, so a fresh
        // join creates a new room with a fresh sequencer.
        join(&mut srv, &alice, "General");
        alice.drain();
        chat(&mut srv, &alice, "hello again");
        assert_eq!(expect_chat(&mut alice).2, 1);
    }
}
