//! Room struct definition
//!
//! A named room: its member set and the per-room message sequencer.
//! Rooms are created on first join and deleted when the last member
//! leaves; all mutation happens inside the broker actor, so a plain
//! counter is enough for gap-free sequencing.

use std::collections::HashSet;
use std::time::Instant;

use crate::types::{ClientId, RoomName};

/// A chat room with any number of members
#[derive(Debug)]
pub struct Room {
    /// Room name, the unique key
    pub name: RoomName,
    /// Room creation time
    pub created_at: Instant,
    /// Current member connections
    members: HashSet<ClientId>,
    /// Sequence number of the last stamped message (0 before the first)
    last_seq: u64,
}

impl Room {
    /// Create a new empty room
    pub fn new(name: RoomName) -> Self {
        Self {
            name,
            created_at: Instant::now(),
            members: HashSet::new(),
            last_seq: 0,
        }
    }

    /// Stamp the next message: strictly increasing, starting at 1.
    ///
    /// Only called on successful sends, so validation failures never
    /// leave gaps in the run.
    pub fn next_seq(&mut self) -> u64 {
        self.last_seq += 1;
        self.last_seq
    }

    /// Add a member. Idempotent: joining a room you are already in is
    /// success, not an error (keeps client retries safe).
    pub fn join(&mut self, client_id: ClientId) {
        self.members.insert(client_id);
    }

    /// Remove a member. No-op if not a member.
    ///
    /// Returns true if the room is now empty and should be deleted.
    pub fn leave(&mut self, client_id: ClientId) -> bool {
        self.members.remove(&client_id);
        self.members.is_empty()
    }

    /// Check if a connection is a member of this room
    pub fn contains(&self, client_id: ClientId) -> bool {
        self.members.contains(&client_id)
    }

    /// Snapshot of the current member set
    ///
    /// Callers must re-fetch for freshness; this is not a live view.
    pub fn members(&self) -> Vec<ClientId> {
        self.members.iter().copied().collect()
    }

    /// Get the number of members in the room
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}
